//! signcap: hand-sign capture
//!
//! Acquires frames from a camera, tracks a hand, and once the hand has been
//! held still through a short countdown, crops it and sends the crop to a
//! prediction service for sign-language classification.
//!
//! # Pipeline
//!
//! camera (`ingest`) -> `tracker` (per frame) -> `orchestrator` (state
//! machine) -> `render` (on trigger) -> `gateway` (network call)
//!
//! `session` runs that loop on its own thread. `api` is the local relay that
//! exposes the gateway over HTTP as `POST /api/classify`.
//!
//! # Module Structure
//!
//! - `frame`, `geometry`: pixel buffers, landmarks, boxes and ROIs
//! - `ingest`: camera backends (synthetic, HTTP MJPEG, V4L2)
//! - `detect`: pluggable hand detection backends
//! - `tracker`: bounding box, stability and hand sessions
//! - `orchestrator`: countdown, submission guard and cooldown
//! - `render`: crop, preview and overlay rendering
//! - `gateway`: classifier clients and response normalization
//! - `api`: local relay server
//! - `session`: the capture loop
//! - `config`, `ui`, `error`: ambient plumbing

pub mod api;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod gateway;
pub mod geometry;
pub mod ingest;
pub mod orchestrator;
pub mod render;
pub mod session;
pub mod tracker;
pub mod ui;

pub use api::{ApiConfig, RelayHandle, RelayServer};
pub use config::SigncapConfig;
pub use detect::{build_backend, BackendKind, Detection, DetectorBackend, DetectorSettings};
pub use error::CaptureError;
pub use frame::Frame;
pub use gateway::{Classification, Classifier, GatewaySettings, RelayClient, UpstreamGateway};
pub use geometry::{BoundingBoxPx, Landmark, NormalizedRoi};
pub use ingest::{Camera, CameraConfig};
pub use orchestrator::{CaptureOrchestrator, CaptureState, OrchestratorSettings, SubmitRequest};
pub use render::{CaptureArtifact, PreviewFiles, PreviewStore};
pub use session::{CaptureSession, SessionEvent, SessionHandle, SessionSettings};
pub use tracker::{HandState, HandTracker, TrackerSettings};

use anyhow::Result;
use std::sync::Arc;

/// Build the classifier the `signcap` binary talks to.
pub fn build_classifier(cfg: &SigncapConfig) -> Arc<dyn Classifier> {
    if cfg.client.direct {
        Arc::new(UpstreamGateway::new(cfg.upstream.clone()))
    } else {
        Arc::new(RelayClient::new(
            &cfg.client.classify_url,
            cfg.upstream.timeout(),
        ))
    }
}

/// Wire up a capture session from configuration.
pub fn build_session(cfg: &SigncapConfig, classifier: Arc<dyn Classifier>) -> Result<CaptureSession> {
    let camera = Camera::new(cfg.camera.clone())?;
    let backend = build_backend(&cfg.detector)?;
    let tracker = HandTracker::new(backend, cfg.tracker);
    let orchestrator = CaptureOrchestrator::new(cfg.orchestrator);
    Ok(CaptureSession::new(
        camera,
        tracker,
        orchestrator,
        classifier,
        cfg.session.clone(),
    ))
}
