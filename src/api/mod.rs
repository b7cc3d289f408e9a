//! Local relay: a small HTTP server exposing `POST /api/classify`, which
//! forwards the uploaded `file` field to a [`Classifier`].

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use serde_json::{json, Value};
use thiserror::Error;

use crate::error::CaptureError;
use crate::gateway::multipart::{self, Part};
use crate::gateway::Classifier;

const MAX_HEADER_BYTES: usize = 16 * 1024;
const DEFAULT_FILENAME: &str = "capture.jpg";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Largest accepted request body; larger uploads get 413.
    pub max_body_bytes: usize,
    /// Connections handled at once; further ones get 503.
    pub max_connections: usize,
    /// Form field holding the uploaded image.
    pub file_field: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8787".to_string(),
            max_body_bytes: 10 * 1024 * 1024,
            max_connections: 32,
            file_field: "file".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct RelayHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl RelayHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("relay server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct RelayServer {
    cfg: ApiConfig,
    classifier: Arc<dyn Classifier>,
}

impl RelayServer {
    pub fn new(cfg: ApiConfig, classifier: Arc<dyn Classifier>) -> Self {
        Self { cfg, classifier }
    }

    pub fn spawn(self) -> Result<RelayHandle> {
        let listener = TcpListener::bind(&self.cfg.addr)
            .with_context(|| format!("bind relay on {}", self.cfg.addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        log::info!(
            "relay listening on http://{} (classifier: {})",
            addr,
            self.classifier.name()
        );

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = Arc::new(self.cfg);
        let classifier = self.classifier;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_relay(listener, cfg, classifier, shutdown_thread) {
                log::error!("relay stopped: {}", err);
            }
        });

        Ok(RelayHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_relay(
    listener: TcpListener,
    cfg: Arc<ApiConfig>,
    classifier: Arc<dyn Classifier>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let active = Arc::new(AtomicUsize::new(0));
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let Some(slot) = ConnectionSlot::acquire(&active, cfg.max_connections) else {
                    if let Err(err) = reject_busy(stream) {
                        log::warn!("relay busy reply to {} failed: {:#}", peer, err);
                    }
                    continue;
                };
                let cfg = cfg.clone();
                let classifier = classifier.clone();
                std::thread::spawn(move || {
                    let _slot = slot;
                    if let Err(err) = handle_connection(stream, &cfg, classifier.as_ref()) {
                        log::warn!("relay connection from {} failed: {:#}", peer, err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// One of the relay's `max_connections` handler slots, released on drop.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn acquire(active: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        if active.fetch_add(1, Ordering::SeqCst) >= max {
            active.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(Self(active.clone()))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn reject_busy(mut stream: TcpStream) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(Duration::from_secs(2)))?;
    log::warn!("relay busy, turning a connection away");
    write_json_response(
        &mut stream,
        503,
        &json!({"error": "relay is busy, retry shortly"}),
    )
}

fn handle_connection(
    mut stream: TcpStream,
    cfg: &ApiConfig,
    classifier: &dyn Classifier,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request_id = new_request_id();

    let request = match read_full_request(&mut stream, cfg.max_body_bytes) {
        Ok(request) => request,
        Err(err) => {
            let status = if err.is::<PayloadTooLarge>() {
                413
            } else if err.is::<LengthRequired>() {
                411
            } else {
                400
            };
            log::warn!("[{}] request rejected: {:#}", request_id, err);
            let body = json!({"error": err.to_string(), "request_id": request_id});
            return write_json_response(&mut stream, status, &body);
        }
    };

    let (status, body) = match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => (200, json!({"status": "ok"})),
        ("POST", "/api/classify") => classify(&request, cfg, classifier, &request_id),
        (_, "/health") | (_, "/api/classify") => (
            405,
            json!({"error": "method_not_allowed", "request_id": request_id}),
        ),
        _ => (404, json!({"error": "not_found", "request_id": request_id})),
    };
    write_json_response(&mut stream, status, &body)
}

fn classify(
    request: &HttpRequest,
    cfg: &ApiConfig,
    classifier: &dyn Classifier,
    request_id: &str,
) -> (u16, Value) {
    let part = match uploaded_file(request, &cfg.file_field) {
        Ok(part) => part,
        Err(err) => {
            log::warn!("[{}] {}", request_id, err);
            return (400, json!({"error": err.to_string(), "request_id": request_id}));
        }
    };
    let filename = part
        .filename
        .clone()
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string());
    let content_type = part
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let started = Instant::now();
    let result = classifier.classify(&part.data, &filename);
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(classification) => {
            log::info!(
                "[{}] {} ({} bytes) -> {:?} in {}ms",
                request_id,
                filename,
                part.data.len(),
                classification.label,
                elapsed_ms
            );
            (
                200,
                json!({
                    "transcription": classification.label,
                    "raw": classification.raw,
                    "meta": {
                        "request_id": request_id,
                        "filename": filename,
                        "bytes": part.data.len(),
                        "content_type": content_type,
                        "elapsed_ms": elapsed_ms,
                        "confidence": classification.confidence,
                    },
                }),
            )
        }
        Err(err) => {
            log::warn!(
                "[{}] classification of {} failed after {}ms: {} ({})",
                request_id,
                filename,
                elapsed_ms,
                err,
                err.kind()
            );
            error_response(err, request_id)
        }
    }
}

/// Relay status and body for a failed classification.
pub fn error_response(err: CaptureError, request_id: &str) -> (u16, Value) {
    let status = err.http_status();
    match err {
        CaptureError::UpstreamHttpError {
            status: upstream_status,
            payload,
        } => {
            let message = payload
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("prediction service returned status {}", upstream_status));
            (
                status,
                json!({
                    "error": message,
                    "upstream_status": upstream_status,
                    "raw": payload,
                    "request_id": request_id,
                }),
            )
        }
        other => (
            status,
            json!({"error": other.to_string(), "request_id": request_id}),
        ),
    }
}

fn uploaded_file(request: &HttpRequest, field: &str) -> Result<Part, CaptureError> {
    let boundary = request
        .headers
        .get("content-type")
        .and_then(|ct| multipart::boundary_from_content_type(ct))
        .ok_or(CaptureError::NoFileProvided)?;
    let parts = multipart::parse(&request.body, &boundary)
        .map_err(|_| CaptureError::NoFileProvided)?;
    parts
        .into_iter()
        .find(|p| p.name == field && !p.data.is_empty())
        .ok_or(CaptureError::NoFileProvided)
}

fn new_request_id() -> String {
    let mut id = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut id);
    hex::encode(id)
}

/// Request body exceeds the configured limit.
#[derive(Debug, Error)]
#[error("request body of {0} bytes exceeds the limit")]
pub struct PayloadTooLarge(pub usize);

/// Body framed without `Content-Length` (e.g. chunked), which the relay
/// does not accept.
#[derive(Debug, Error)]
#[error("request body must be sent with a Content-Length header")]
pub struct LengthRequired;

#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    /// Lower-cased header names.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Read one HTTP/1.1 request, body included (`Content-Length` framing).
pub fn read_full_request(stream: &mut TcpStream, max_body_bytes: usize) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before headers ended"));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length '{}'", value))?,
        None if headers
            .get("transfer-encoding")
            .is_some_and(|v| !v.eq_ignore_ascii_case("identity")) =>
        {
            return Err(LengthRequired.into());
        }
        None => 0,
    };
    if content_length > max_body_bytes {
        return Err(PayloadTooLarge(content_length).into());
    }
    if headers
        .get("expect")
        .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
    {
        stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n")?;
    }

    let mut body = data.split_off(header_end + 4);
    body.truncate(content_length);
    if body.len() < content_length {
        let already = body.len();
        body.resize(content_length, 0);
        stream
            .read_exact(&mut body[already..])
            .context("request body ended early")?;
    }

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        body,
    })
}

pub fn write_json_response(stream: &mut TcpStream, status: u16, body: &Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
}

pub fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let header = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status = status,
        reason = reason_phrase(status),
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Payload Too Large",
        415 => "Unsupported Media Type",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}
