//! Crop and preview rendering.
//!
//! The capture artifact is built from exactly the pixels inside the
//! tracker's bounding box, downscaled so that its longest side fits the
//! configured maximum, and JPEG encoded. The same artifact is what gets
//! previewed and what gets submitted; the preview store also keeps a square
//! thumbnail and a full-frame overlay next to it.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use rand::RngCore;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::frame::Frame;
use crate::geometry::BoundingBoxPx;

pub const DEFAULT_MAX_DIMENSION: u32 = 512;
pub const DEFAULT_JPEG_QUALITY: u8 = 90;
pub const DEFAULT_PREVIEW_SIZE: u32 = 220;

const OVERLAY_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const OVERLAY_THICKNESS: u32 = 2;

/// Encoded crop, ready to preview and submit.
#[derive(Clone, Debug)]
pub struct CaptureArtifact {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Box the crop was taken from, in source-frame pixels.
    pub source_box: BoundingBoxPx,
    pub filename: String,
}

/// Copy the pixels inside `bbox` (clamped to the frame).
pub fn crop(frame: &Frame, bbox: &BoundingBoxPx) -> Result<RgbImage> {
    let b = bbox
        .clamp_to(frame.width(), frame.height())
        .ok_or_else(|| anyhow!("cannot crop a frame that is not ready"))?;
    Ok(imageops::crop_imm(frame.image(), b.x, b.y, b.width, b.height).to_image())
}

/// Downscale so the longest side is at most `max_dimension`. Never upscales.
pub fn fit_within(image: RgbImage, max_dimension: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    let longest = w.max(h);
    if max_dimension == 0 || longest <= max_dimension {
        return image;
    }
    let scale = max_dimension as f32 / longest as f32;
    let nw = ((w as f32 * scale).round() as u32).max(1);
    let nh = ((h as f32 * scale).round() as u32).max(1);
    imageops::resize(&image, nw, nh, FilterType::Triangle)
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(image)
        .context("encode jpeg")?;
    Ok(out)
}

/// Crop, fit and encode the region that will be transmitted.
pub fn capture_artifact(
    frame: &Frame,
    bbox: &BoundingBoxPx,
    max_dimension: u32,
    quality: u8,
) -> Result<CaptureArtifact> {
    let source_box = bbox
        .clamp_to(frame.width(), frame.height())
        .ok_or_else(|| anyhow!("cannot capture from a frame that is not ready"))?;
    let image = fit_within(crop(frame, &source_box)?, max_dimension);
    let jpeg = encode_jpeg(&image, quality)?;
    Ok(CaptureArtifact {
        jpeg,
        width: image.width(),
        height: image.height(),
        source_box,
        filename: unique_filename(),
    })
}

/// Square preview of the box contents, stretched to `size` x `size`.
pub fn render_preview(frame: &Frame, bbox: &BoundingBoxPx, size: u32) -> Result<RgbImage> {
    let cropped = crop(frame, bbox)?;
    let side = size.max(1);
    Ok(imageops::resize(&cropped, side, side, FilterType::Triangle))
}

/// Copy of the frame with the bounding box outlined.
pub fn draw_overlay(frame: &Frame, bbox: Option<&BoundingBoxPx>) -> RgbImage {
    let mut image = frame.image().clone();
    let Some(b) = bbox.and_then(|b| b.clamp_to(frame.width(), frame.height())) else {
        return image;
    };
    let t = OVERLAY_THICKNESS.min(b.width).min(b.height);
    for y in b.y..b.bottom() {
        for x in b.x..b.right() {
            let on_edge = x < b.x + t || x >= b.right() - t || y < b.y + t || y >= b.bottom() - t;
            if on_edge {
                image.put_pixel(x, y, OVERLAY_COLOR);
            }
        }
    }
    image
}

/// `hand-<unix millis>-<32 hex chars>.jpg`
pub fn unique_filename() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    format!("hand-{}-{}.jpg", millis, hex::encode(nonce))
}

/// Files written for one capture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreviewFiles {
    /// The exact JPEG that is submitted.
    pub capture: PathBuf,
    /// Square thumbnail of the box contents.
    pub square: PathBuf,
    /// Whole frame with the box outlined.
    pub overlay: PathBuf,
}

impl PreviewFiles {
    fn paths(&self) -> [&Path; 3] {
        [
            self.capture.as_path(),
            self.square.as_path(),
            self.overlay.as_path(),
        ]
    }
}

/// Holds the files backing the most recent capture preview.
///
/// Publishing a new capture deletes the superseded files; dropping the
/// store deletes the current ones.
#[derive(Debug)]
pub struct PreviewStore {
    dir: PathBuf,
    preview_size: u32,
    jpeg_quality: u8,
    current: Option<PreviewFiles>,
}

impl PreviewStore {
    pub fn new(dir: impl Into<PathBuf>, preview_size: u32, jpeg_quality: u8) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create preview directory {}", dir.display()))?;
        Ok(Self {
            dir,
            preview_size,
            jpeg_quality,
            current: None,
        })
    }

    /// Write the artifact together with its square preview and the overlay
    /// of `frame`, the frame it was cropped from.
    pub fn publish(&mut self, frame: &Frame, artifact: &CaptureArtifact) -> Result<PreviewFiles> {
        let stem = artifact
            .filename
            .strip_suffix(".jpg")
            .unwrap_or(&artifact.filename);
        let files = PreviewFiles {
            capture: self.dir.join(&artifact.filename),
            square: self.dir.join(format!("{}-square.jpg", stem)),
            overlay: self.dir.join(format!("{}-overlay.jpg", stem)),
        };
        let square = encode_jpeg(
            &render_preview(frame, &artifact.source_box, self.preview_size)?,
            self.jpeg_quality,
        )?;
        let overlay = encode_jpeg(
            &draw_overlay(frame, Some(&artifact.source_box)),
            self.jpeg_quality,
        )?;

        let written = write_file(&files.capture, &artifact.jpeg)
            .and_then(|_| write_file(&files.square, &square))
            .and_then(|_| write_file(&files.overlay, &overlay));
        if let Err(err) = written {
            files.paths().into_iter().filter(|p| p.exists()).for_each(remove_quietly);
            return Err(err);
        }

        if let Some(previous) = self.current.replace(files.clone()) {
            previous.paths().into_iter().for_each(remove_quietly);
        }
        Ok(files)
    }

    pub fn current(&self) -> Option<&PreviewFiles> {
        self.current.as_ref()
    }

    pub fn clear(&mut self) {
        if let Some(previous) = self.current.take() {
            previous.paths().into_iter().for_each(remove_quietly);
        }
    }
}

impl Drop for PreviewStore {
    fn drop(&mut self) {
        self.clear();
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("write preview {}", path.display()))
}

fn remove_quietly(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        log::warn!("failed to remove preview {}: {}", path.display(), err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_frame(w: u32, h: u32) -> Frame {
        let image = RgbImage::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 0]));
        Frame::from_image(image, 1)
    }

    #[test]
    fn crop_takes_exactly_the_box() -> Result<()> {
        let frame = gradient_frame(100, 80);
        let bbox = BoundingBoxPx {
            x: 10,
            y: 20,
            width: 30,
            height: 40,
        };
        let cropped = crop(&frame, &bbox)?;
        assert_eq!(cropped.dimensions(), (30, 40));
        assert_eq!(cropped.get_pixel(0, 0), &Rgb([10, 20, 0]));
        assert_eq!(cropped.get_pixel(29, 39), &Rgb([39, 59, 0]));
        Ok(())
    }

    #[test]
    fn artifact_is_fitted_to_max_dimension() -> Result<()> {
        let frame = gradient_frame(1280, 720);
        let bbox = BoundingBoxPx {
            x: 0,
            y: 0,
            width: 1024,
            height: 512,
        };
        let artifact = capture_artifact(&frame, &bbox, 512, 90)?;
        assert_eq!((artifact.width, artifact.height), (512, 256));
        assert_eq!(artifact.source_box, bbox);
        let decoded = image::load_from_memory(&artifact.jpeg)?;
        assert_eq!((decoded.width(), decoded.height()), (512, 256));
        assert!(artifact.filename.starts_with("hand-"));
        assert!(artifact.filename.ends_with(".jpg"));
        Ok(())
    }

    #[test]
    fn small_crops_are_not_upscaled() {
        let img = RgbImage::new(40, 20);
        assert_eq!(fit_within(img, 512).dimensions(), (40, 20));
    }

    #[test]
    fn preview_is_square() -> Result<()> {
        let frame = gradient_frame(100, 100);
        let bbox = BoundingBoxPx {
            x: 0,
            y: 0,
            width: 50,
            height: 20,
        };
        assert_eq!(render_preview(&frame, &bbox, 220)?.dimensions(), (220, 220));
        Ok(())
    }

    #[test]
    fn overlay_outlines_the_box() {
        let frame = Frame::from_image(RgbImage::new(20, 20), 1);
        let bbox = BoundingBoxPx {
            x: 5,
            y: 5,
            width: 10,
            height: 10,
        };
        let out = draw_overlay(&frame, Some(&bbox));
        assert_eq!(out.get_pixel(5, 5), &OVERLAY_COLOR);
        assert_eq!(out.get_pixel(14, 10), &OVERLAY_COLOR);
        assert_eq!(out.get_pixel(10, 10), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(4, 4), &Rgb([0, 0, 0]));
    }

    #[test]
    fn filenames_are_unique() {
        assert_ne!(unique_filename(), unique_filename());
    }

    #[test]
    fn preview_store_releases_superseded_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let frame = gradient_frame(64, 64);
        let bbox = BoundingBoxPx {
            x: 0,
            y: 0,
            width: 32,
            height: 32,
        };
        let first = capture_artifact(&frame, &bbox, 512, 80)?;
        let second = capture_artifact(&frame, &bbox, 512, 80)?;

        let mut store = PreviewStore::new(dir.path().join("previews"), 220, 80)?;
        let p1 = store.publish(&frame, &first)?;
        assert!(p1.capture.exists() && p1.square.exists() && p1.overlay.exists());
        assert_eq!(std::fs::read(&p1.capture)?, first.jpeg);
        let square = image::open(&p1.square)?;
        assert_eq!((square.width(), square.height()), (220, 220));
        let overlay = image::open(&p1.overlay)?;
        assert_eq!((overlay.width(), overlay.height()), (64, 64));

        let p2 = store.publish(&frame, &second)?;
        assert!(!p1.capture.exists() && !p1.square.exists() && !p1.overlay.exists());
        assert!(p2.capture.exists());
        assert_eq!(store.current(), Some(&p2));

        drop(store);
        assert!(!p2.capture.exists() && !p2.square.exists() && !p2.overlay.exists());
        Ok(())
    }
}
