use thiserror::Error;

/// Failure taxonomy for the capture pipeline.
///
/// Per-frame variants (`DeviceNotReady`, `DetectionTransientFailure`) are
/// recovered by the tracker and never reach the caller. The remaining
/// variants are surfaced as a displayed message or an HTTP status.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera access was denied")]
    NoCameraPermission,

    #[error("video source is not ready (zero-dimension frame)")]
    DeviceNotReady,

    #[error("hand detection failed for this frame: {0}")]
    DetectionTransientFailure(String),

    #[error("camera connection lost: {0}")]
    CameraLost(String),

    #[error("no image was received")]
    NoFileProvided,

    #[error("prediction service did not answer within {0} seconds")]
    UpstreamTimeout(u64),

    #[error("prediction service returned status {status}")]
    UpstreamHttpError {
        status: u16,
        payload: serde_json::Value,
    },

    #[error("prediction service returned an unusable response: {0}")]
    UpstreamMalformedResponse(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CaptureError {
    /// HTTP status the local relay answers with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            CaptureError::NoFileProvided => 400,
            CaptureError::UpstreamHttpError { status, .. } => *status,
            _ => 500,
        }
    }

    /// Short machine-readable tag, used in logs and relay payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureError::NoCameraPermission => "no_camera_permission",
            CaptureError::DeviceNotReady => "device_not_ready",
            CaptureError::DetectionTransientFailure(_) => "detection_transient_failure",
            CaptureError::CameraLost(_) => "camera_lost",
            CaptureError::NoFileProvided => "no_file_provided",
            CaptureError::UpstreamTimeout(_) => "upstream_timeout",
            CaptureError::UpstreamHttpError { .. } => "upstream_http_error",
            CaptureError::UpstreamMalformedResponse(_) => "upstream_malformed_response",
            CaptureError::Internal(_) => "internal_error",
        }
    }
}
