use std::time::Duration;

use serde_json::Value;

use super::multipart::MultipartForm;
use super::upstream::post_form;
use super::{extract_confidence, Classification, Classifier};
use crate::error::CaptureError;

/// Client for a local relay's `/api/classify`.
#[derive(Debug)]
pub struct RelayClient {
    endpoint: String,
    timeout_secs: u64,
    agent: ureq::Agent,
}

impl RelayClient {
    /// `base` is the relay origin, e.g. `http://127.0.0.1:8787`. A URL that
    /// already ends in `/api/classify` is used as is.
    pub fn new(base: &str, timeout: Duration) -> Self {
        let base = base.trim_end_matches('/');
        let endpoint = if base.ends_with("/api/classify") {
            base.to_string()
        } else {
            format!("{}/api/classify", base)
        };
        // the relay applies its own upstream timeout; leave room for it
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout + Duration::from_secs(5))
            .build();
        Self {
            endpoint,
            timeout_secs: timeout.as_secs(),
            agent,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Classifier for RelayClient {
    fn name(&self) -> &'static str {
        "relay"
    }

    fn classify(&self, image: &[u8], filename: &str) -> Result<Classification, CaptureError> {
        let form = MultipartForm::new().file("file", filename, "image/jpeg", image);
        let response = post_form(&self.agent, &self.endpoint, form, self.timeout_secs)?;
        let payload = response.payload_lossy();

        match response.status {
            200 => {
                let label = payload
                    .get("transcription")
                    .and_then(Value::as_str)
                    .filter(|t| !t.trim().is_empty())
                    .ok_or_else(|| {
                        CaptureError::UpstreamMalformedResponse(
                            "relay response has no transcription".to_string(),
                        )
                    })?
                    .to_string();
                let confidence = payload
                    .pointer("/meta/confidence")
                    .and_then(Value::as_f64)
                    .map(|c| c as f32)
                    .or_else(|| extract_confidence(&payload["raw"]));
                Ok(Classification {
                    label,
                    confidence,
                    raw: payload.get("raw").cloned().unwrap_or(Value::Null),
                })
            }
            400 => Err(CaptureError::NoFileProvided),
            status => Err(CaptureError::UpstreamHttpError { status, payload }),
        }
    }
}
