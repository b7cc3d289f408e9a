//! V4L2 camera source (feature: ingest-v4l2).
//!
//! Opens a local device node, asks for RGB24 at the configured size and
//! falls back to whatever the driver negotiates (YUYV or MJPEG are
//! converted in memory).

use anyhow::{Context, Result};
use ouroboros::self_referencing;
use std::time::Instant;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{health_grace, CameraConfig};
use crate::error::CaptureError;
use crate::frame::Frame;

pub struct V4l2Source {
    config: CameraConfig,
    state: Option<DeviceState>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
    active_format: PixelFormat,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
            active_format: PixelFormat::Rgb24,
        }
    }

    pub fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = match v4l::Device::with_path(&self.config.url) {
            Ok(device) => device,
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(CaptureError::NoCameraPermission.into());
            }
            Err(err) => {
                return Err(anyhow::Error::new(err))
                    .with_context(|| format!("open v4l2 device {}", self.config.url))
            }
        };
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.config.url,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.url,
                    err
                );
            }
        }

        self.active_format = PixelFormat::from_fourcc(&format.fourcc.repr)?;
        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .inspect_err(|err| self.last_error = Some(err.to_string()))?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{}, {:?})",
            self.config.url,
            self.active_width,
            self.active_height,
            self.active_format
        );
        Ok(())
    }

    pub fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let (buf, _meta) = state
            .with_mut(|fields| fields.stream.next())
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                anyhow::Error::new(err).context("capture v4l2 frame")
            })?;
        let pixels = normalize_to_rgb(
            buf,
            self.active_width,
            self.active_height,
            self.active_format,
        )?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Frame::from_rgb(
            pixels,
            self.active_width,
            self.active_height,
            self.frame_count,
        )
    }

    pub fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= health_grace(self.config.target_fps)
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}
