use anyhow::Result;
use image::Rgb;

use crate::detect::backend::{Detection, DetectorBackend};
use crate::frame::Frame;
use crate::geometry::Landmark;

/// CPU backend that samples skin-toned pixels on a sparse grid and reports
/// them as landmark points.
///
/// Works without a model file, which makes it the default for synthetic
/// cameras and for evenly lit scenes against a plain background.
pub struct SkinToneBackend {
    /// Sample every `stride` pixels in both directions.
    stride: u32,
    /// Minimum fraction of samples that must be skin for a hand to count.
    min_coverage: f32,
}

impl SkinToneBackend {
    pub fn new(stride: u32, min_coverage: f32) -> Self {
        Self {
            stride: stride.max(1),
            min_coverage,
        }
    }
}

impl Default for SkinToneBackend {
    fn default() -> Self {
        Self::new(4, 0.005)
    }
}

impl DetectorBackend for SkinToneBackend {
    fn name(&self) -> &'static str {
        "skin"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Option<Detection>> {
        let image = frame.image();
        let (w, h) = (image.width(), image.height());
        let mut samples = 0usize;
        let mut points = Vec::new();
        for y in (0..h).step_by(self.stride as usize) {
            for x in (0..w).step_by(self.stride as usize) {
                samples += 1;
                if is_skin(image.get_pixel(x, y)) {
                    points.push(Landmark::new(
                        (x as f32 + 0.5) / w as f32,
                        (y as f32 + 0.5) / h as f32,
                    ));
                }
            }
        }
        if samples == 0 || (points.len() as f32) < self.min_coverage * samples as f32 {
            return Ok(None);
        }
        Ok(Some(Detection::Landmarks(points)))
    }
}

/// RGB skin rule for daylight illumination.
fn is_skin(pixel: &Rgb<u8>) -> bool {
    let [r, g, b] = pixel.0.map(i32::from);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    r > 95 && g > 40 && b > 20 && max - min > 15 && (r - g).abs() > 15 && r > g && r > b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::NormalizedRoi;
    use crate::ingest::synthetic::{BACKGROUND, SKIN};
    use image::RgbImage;

    fn frame_with_patch() -> Frame {
        let mut image = RgbImage::from_pixel(100, 100, BACKGROUND);
        for y in 40..60 {
            for x in 20..50 {
                image.put_pixel(x, y, SKIN);
            }
        }
        Frame::from_image(image, 1)
    }

    #[test]
    fn classifies_skin_and_background() {
        assert!(is_skin(&SKIN));
        assert!(!is_skin(&BACKGROUND));
        assert!(!is_skin(&Rgb([200, 200, 200])));
    }

    #[test]
    fn landmarks_cover_the_patch() {
        let mut backend = SkinToneBackend::default();
        let Some(Detection::Landmarks(points)) = backend.detect(&frame_with_patch()).unwrap()
        else {
            panic!("expected landmarks");
        };
        let env = NormalizedRoi::envelope(&points).unwrap();
        assert!(env.x >= 0.2 && env.x < 0.25);
        assert!(env.y >= 0.4 && env.y < 0.45);
        assert!(env.x + env.width <= 0.5);
        assert!(env.y + env.height <= 0.6);
    }

    #[test]
    fn plain_background_has_no_hand() {
        let mut backend = SkinToneBackend::default();
        let frame = Frame::from_image(RgbImage::from_pixel(64, 64, BACKGROUND), 1);
        assert!(backend.detect(&frame).unwrap().is_none());
    }
}
