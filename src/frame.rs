//! Video frames as delivered by the capture device adapter.
//!
//! A `Frame` owns one decoded RGB image plus its sequence number. Frames are
//! read by the tracker, the preview renderer and the cropper, and are never
//! mutated after capture.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::time::Instant;

pub struct Frame {
    image: RgbImage,
    /// Monotonic per-source counter, starting at 1.
    pub sequence: u64,
    captured_at: Instant,
}

impl Frame {
    /// Build a frame from packed RGB24 pixels.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("pixel buffer does not match {}x{}", width, height))?;
        Ok(Self::from_image(image, sequence))
    }

    pub fn from_image(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// A zero-sized frame, as produced by a source that has not started yet.
    pub fn not_ready(sequence: u64) -> Self {
        Self::from_image(RgbImage::new(0, 0), sequence)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// True once the source delivers real pixels.
    pub fn is_ready(&self) -> bool {
        self.width() > 0 && self.height() > 0
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn age_ms(&self) -> u128 {
        self.captured_at.elapsed().as_millis()
    }
}
