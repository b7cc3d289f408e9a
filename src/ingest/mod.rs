//! Capture device adapter.
//!
//! `Camera` wraps acquisition and release of a video source and still-frame
//! extraction into an encoded JPEG blob. The backend is picked from the
//! source URL:
//! - `stub://<scene>` synthetic scripted scenes (tests, demos)
//! - `http(s)://...` MJPEG or single-JPEG network cameras
//! - `/dev/videoN` local V4L2 devices (feature: ingest-v4l2)
//!
//! A stopped camera holds no device handle. Frames are handed to the caller
//! and never retained by the adapter.

pub mod http;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::frame::Frame;
use crate::geometry::NormalizedRoi;
use crate::render;

pub use http::HttpSource;
pub use synthetic::{Scene, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// Configuration for a camera.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Source URL or device path.
    pub url: String,
    /// Target frame rate. The capture loop paces itself to this rate.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            url: "stub://cycle".to_string(),
            target_fps: 30,
            width: 640,
            height: 480,
        }
    }
}

impl CameraConfig {
    pub fn frame_interval(&self) -> Duration {
        frame_interval(self.target_fps)
    }
}

/// Statistics for a camera.
#[derive(Clone, Debug)]
pub struct CameraStats {
    pub frames_captured: u64,
    pub source: String,
}

enum CameraBackend {
    Synthetic(SyntheticSource),
    Http(HttpSource),
    #[cfg(feature = "ingest-v4l2")]
    V4l2(V4l2Source),
}

/// Camera handle. Starts stopped.
pub struct Camera {
    config: CameraConfig,
    backend: Option<CameraBackend>,
}

impl Camera {
    pub fn new(config: CameraConfig) -> Result<Self> {
        source_kind(&config.url)?;
        Ok(Self {
            config,
            backend: None,
        })
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Acquire the video source. Starting an already running camera is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.backend.is_some() {
            return Ok(());
        }
        let mut backend = match source_kind(&self.config.url)? {
            SourceKind::Synthetic => {
                CameraBackend::Synthetic(SyntheticSource::new(self.config.clone())?)
            }
            SourceKind::Http => CameraBackend::Http(HttpSource::new(self.config.clone())),
            #[cfg(feature = "ingest-v4l2")]
            SourceKind::Device => CameraBackend::V4l2(V4l2Source::new(self.config.clone())),
        };
        match &mut backend {
            CameraBackend::Synthetic(source) => source.connect()?,
            CameraBackend::Http(source) => source.connect()?,
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2(source) => source.connect()?,
        }
        self.backend = Some(backend);
        log::info!("camera started: {}", self.config.url);
        Ok(())
    }

    /// Release the video source.
    pub fn stop(&mut self) {
        if self.backend.take().is_some() {
            log::info!("camera stopped: {}", self.config.url);
        }
    }

    pub fn is_on(&self) -> bool {
        self.backend.is_some()
    }

    /// Read the next frame.
    pub fn next_frame(&mut self) -> Result<Frame> {
        match self.backend.as_mut() {
            Some(CameraBackend::Synthetic(source)) => source.next_frame(),
            Some(CameraBackend::Http(source)) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            Some(CameraBackend::V4l2(source)) => source.next_frame(),
            None => Err(anyhow!("camera is not started")),
        }
    }

    /// Grab a frame and encode the pixels inside `roi` as JPEG.
    ///
    /// Returns `None` while the source is still warming up (zero-sized frame).
    pub fn capture_still(&mut self, roi: &NormalizedRoi, quality: u8) -> Result<Option<Vec<u8>>> {
        let frame = self.next_frame()?;
        let Some(bbox) = roi.to_pixels(frame.width(), frame.height()) else {
            log::warn!("video is not ready to capture yet");
            return Ok(None);
        };
        let crop = render::crop(&frame, &bbox)?;
        Ok(Some(render::encode_jpeg(&crop, quality)?))
    }

    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            Some(CameraBackend::Synthetic(source)) => source.is_healthy(),
            Some(CameraBackend::Http(source)) => source.is_healthy(),
            #[cfg(feature = "ingest-v4l2")]
            Some(CameraBackend::V4l2(source)) => source.is_healthy(),
            None => false,
        }
    }

    pub fn stats(&self) -> CameraStats {
        let frames_captured = match &self.backend {
            Some(CameraBackend::Synthetic(source)) => source.frames_captured(),
            Some(CameraBackend::Http(source)) => source.frames_captured(),
            #[cfg(feature = "ingest-v4l2")]
            Some(CameraBackend::V4l2(source)) => source.frames_captured(),
            None => 0,
        };
        CameraStats {
            frames_captured,
            source: self.config.url.clone(),
        }
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.stop();
    }
}

enum SourceKind {
    Synthetic,
    Http,
    #[cfg(feature = "ingest-v4l2")]
    Device,
}

fn source_kind(url: &str) -> Result<SourceKind> {
    if url.starts_with("stub://") {
        return Ok(SourceKind::Synthetic);
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(SourceKind::Http);
    }
    if url.starts_with("/dev/") {
        #[cfg(feature = "ingest-v4l2")]
        {
            return Ok(SourceKind::Device);
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            return Err(anyhow!(
                "camera device {} requires the ingest-v4l2 feature",
                url
            ));
        }
    }
    Err(anyhow!(
        "unsupported camera source '{}'; expected stub://, http(s):// or /dev/videoN",
        url
    ))
}

pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

pub(crate) fn health_grace(target_fps: u32) -> Duration {
    let base_ms = if target_fps == 0 {
        2_000
    } else {
        (1000 / target_fps).saturating_mul(6)
    };
    Duration::from_millis(base_ms.max(2_000) as u64)
}
