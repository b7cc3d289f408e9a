//! Classifier gateway: sends a captured image to a prediction service and
//! normalizes whatever comes back into a label.

pub mod multipart;
mod relay_client;
mod upstream;

pub use relay_client::RelayClient;
pub use upstream::{GatewaySettings, UpstreamGateway};

use serde::Serialize;
use serde_json::Value;

use crate::error::CaptureError;

/// Normalized prediction.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Classification {
    pub label: String,
    /// Percentage in `0..=100`, when the service reports one.
    pub confidence: Option<f32>,
    /// Upstream payload as received.
    pub raw: Value,
}

/// Something that turns an encoded image into a label.
///
/// Implementations make exactly one attempt per call.
pub trait Classifier: Send + Sync {
    fn name(&self) -> &'static str;

    fn classify(&self, image: &[u8], filename: &str) -> Result<Classification, CaptureError>;
}

const CONFIDENCE_KEYS: [&str; 4] = ["score", "confidence", "porcentaje", "probability"];

/// Label from a prediction payload, first match wins:
/// `prediccion` (string), `prediccion.predicted_label`, `prediccion.label`,
/// `predicted_label`, `label`, `transcription`.
pub fn extract_label(payload: &Value) -> Option<String> {
    let prediccion = payload.get("prediccion");
    if let Some(label) = prediccion.and_then(scalar_text) {
        return Some(label);
    }
    let nested = prediccion.filter(|p| p.is_object());
    [
        nested.and_then(|p| p.get("predicted_label")),
        nested.and_then(|p| p.get("label")),
        payload.get("predicted_label"),
        payload.get("label"),
        payload.get("transcription"),
    ]
    .into_iter()
    .flatten()
    .find_map(scalar_text)
}

/// Confidence as a percentage. Fractions (`<= 1`) are scaled by 100.
pub fn extract_confidence(payload: &Value) -> Option<f32> {
    let scopes = [
        payload.get("prediccion").filter(|p| p.is_object()),
        Some(payload),
    ];
    CONFIDENCE_KEYS.iter().find_map(|key| {
        scopes
            .iter()
            .flatten()
            .find_map(|scope| scope.get(*key).and_then(numeric))
            .map(|v| {
                let percent = if v <= 1.0 { v * 100.0 } else { v };
                percent as f32
            })
    })
}

/// Build a classification from a decoded upstream payload. A plain text
/// payload is the label itself.
pub fn interpret(payload: Value) -> Result<Classification, CaptureError> {
    let label = match &payload {
        Value::String(text) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
        other => extract_label(other),
    };
    let label = label.ok_or_else(|| {
        CaptureError::UpstreamMalformedResponse("response carries no label".to_string())
    })?;
    Ok(Classification {
        label,
        confidence: extract_confidence(&payload),
        raw: payload,
    })
}

/// JSON when the content type says so, opaque text otherwise.
pub fn decode_body(content_type: &str, body: &[u8]) -> Result<Value, CaptureError> {
    if content_type.to_ascii_lowercase().contains("json") {
        serde_json::from_slice(body).map_err(|err| {
            CaptureError::UpstreamMalformedResponse(format!("invalid JSON: {}", err))
        })
    } else {
        Ok(Value::String(String::from_utf8_lossy(body).into_owned()))
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn numeric(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|v| v.is_finite() && *v >= 0.0)
}
