//! Frame-space geometry: landmarks, normalized regions and pixel boxes.
//!
//! Normalized values are fractions of the frame dimensions (`0..=1`).
//! Pixel boxes are always clamped to the frame they were derived from.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// A tracked point on a detected hand. `x`/`y` are normalized to the frame,
/// `z` is backend-defined relative depth.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }
}

/// Euclidean distance between two normalized points.
pub fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}

/// Region of interest in normalized frame coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRoi {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Default for NormalizedRoi {
    fn default() -> Self {
        Self {
            x: 0.2,
            y: 0.125,
            width: 0.6,
            height: 0.75,
        }
    }
}

impl NormalizedRoi {
    /// Axis-aligned envelope of all points.
    pub fn envelope(points: &[Landmark]) -> Option<Self> {
        let first = points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self {
            x: min_x,
            y: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        })
    }

    /// Grow the region by `fraction` of its own size on every side.
    pub fn padded(&self, fraction: f32) -> Self {
        let pad_x = self.width * fraction;
        let pad_y = self.height * fraction;
        Self {
            x: self.x - pad_x,
            y: self.y - pad_y,
            width: self.width + 2.0 * pad_x,
            height: self.height + 2.0 * pad_y,
        }
    }

    /// Intersect with the unit square.
    pub fn clamped(&self) -> Self {
        let x0 = self.x.clamp(0.0, 1.0);
        let y0 = self.y.clamp(0.0, 1.0);
        let x1 = (self.x + self.width).clamp(0.0, 1.0);
        let y1 = (self.y + self.height).clamp(0.0, 1.0);
        Self {
            x: x0,
            y: y0,
            width: (x1 - x0).max(0.0),
            height: (y1 - y0).max(0.0),
        }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn validate(&self) -> Result<()> {
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if !(in_unit(self.x) && in_unit(self.y)) {
            return Err(anyhow!("roi origin must lie within [0,1]"));
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(anyhow!("roi width and height must be positive"));
        }
        if self.x + self.width > 1.0 + f32::EPSILON || self.y + self.height > 1.0 + f32::EPSILON {
            return Err(anyhow!("roi must fit inside the frame"));
        }
        Ok(())
    }

    /// Scale to pixels of a `frame_width` x `frame_height` frame.
    ///
    /// Returns `None` for a zero-sized frame. Degenerate regions still yield
    /// a box of at least one pixel.
    pub fn to_pixels(&self, frame_width: u32, frame_height: u32) -> Option<BoundingBoxPx> {
        if frame_width == 0 || frame_height == 0 {
            return None;
        }
        let c = self.clamped();
        let fw = frame_width as f32;
        let fh = frame_height as f32;
        let x0 = ((c.x * fw).round() as u32).min(frame_width - 1);
        let y0 = ((c.y * fh).round() as u32).min(frame_height - 1);
        let x1 = (((c.x + c.width) * fw).round() as u32).clamp(x0 + 1, frame_width);
        let y1 = (((c.y + c.height) * fh).round() as u32).clamp(y0 + 1, frame_height);
        Some(BoundingBoxPx {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }
}

/// Bounding box in source-frame pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBoxPx {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBoxPx {
    /// Clamp into a frame, keeping at least one pixel in each dimension.
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Option<Self> {
        if frame_width == 0 || frame_height == 0 {
            return None;
        }
        let x = self.x.min(frame_width - 1);
        let y = self.y.min(frame_height - 1);
        let width = self.width.clamp(1, frame_width - x);
        let height = self.height.clamp(1, frame_height - y);
        Some(Self {
            x,
            y,
            width,
            height,
        })
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}
