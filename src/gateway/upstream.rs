use std::io::Read;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::multipart::MultipartForm;
use super::{decode_body, interpret, Classification, Classifier};
use crate::error::CaptureError;

const MAX_RESPONSE_BYTES: u64 = 10 * 1024 * 1024;

/// Where and how captures are submitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub url: String,
    /// Form field carrying the image (`imagen` or `file`).
    pub image_field: String,
    pub timeout_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000/predict".to_string(),
            image_field: "imagen".to_string(),
            timeout_secs: 30,
        }
    }
}

impl GatewaySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Posts captures straight to the prediction service.
#[derive(Debug)]
pub struct UpstreamGateway {
    settings: GatewaySettings,
    agent: ureq::Agent,
}

impl UpstreamGateway {
    pub fn new(settings: GatewaySettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(settings.timeout())
            .build();
        Self { settings, agent }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }
}

impl Classifier for UpstreamGateway {
    fn name(&self) -> &'static str {
        "upstream"
    }

    fn classify(&self, image: &[u8], filename: &str) -> Result<Classification, CaptureError> {
        let form = MultipartForm::new().text("nombre", filename).file(
            &self.settings.image_field,
            filename,
            "image/jpeg",
            image,
        );
        let response = post_form(&self.agent, &self.settings.url, form, self.settings.timeout_secs)?;
        if !(200..300).contains(&response.status) {
            log::warn!(
                "prediction service answered {} for {}",
                response.status,
                filename
            );
            return Err(CaptureError::UpstreamHttpError {
                status: response.status,
                payload: response.payload_lossy(),
            });
        }
        interpret(decode_body(&response.content_type, &response.body)?)
    }
}

/// Response of one form submission, whatever its status.
#[derive(Debug)]
pub(crate) struct RawResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// JSON if it parses, the body text otherwise.
    pub fn payload_lossy(&self) -> Value {
        serde_json::from_slice(&self.body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&self.body).into_owned()))
    }
}

/// Send `form` once. Non-2xx statuses come back as a response; transport
/// failures become `UpstreamTimeout` or `Internal`.
pub(crate) fn post_form(
    agent: &ureq::Agent,
    url: &str,
    form: MultipartForm,
    timeout_secs: u64,
) -> Result<RawResponse, CaptureError> {
    let (content_type, body) = form.finish();
    let result = agent
        .post(url)
        .set("Content-Type", &content_type)
        .set("Accept", "application/json")
        .send_bytes(&body);
    let response = match result {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => response,
        Err(ureq::Error::Transport(transport)) => {
            return Err(transport_error(&transport, timeout_secs));
        }
    };

    let status = response.status();
    let content_type = response
        .header("content-type")
        .unwrap_or("application/octet-stream")
        .to_string();
    let mut body = Vec::new();
    response
        .into_reader()
        .take(MAX_RESPONSE_BYTES)
        .read_to_end(&mut body)
        .map_err(|err| {
            if is_timeout_io(&err) {
                CaptureError::UpstreamTimeout(timeout_secs)
            } else {
                CaptureError::Internal(format!("read upstream response: {}", err))
            }
        })?;
    Ok(RawResponse {
        status,
        content_type,
        body,
    })
}

fn transport_error(transport: &ureq::Transport, timeout_secs: u64) -> CaptureError {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(transport);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if is_timeout_io(io) {
                return CaptureError::UpstreamTimeout(timeout_secs);
            }
        }
        source = err.source();
    }
    if transport.to_string().contains("timed out") {
        return CaptureError::UpstreamTimeout(timeout_secs);
    }
    CaptureError::Internal(format!("prediction service unreachable: {}", transport))
}

fn is_timeout_io(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    ) || err.to_string().contains("timed out")
}
