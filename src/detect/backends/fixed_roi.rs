use anyhow::Result;

use crate::detect::backend::{Detection, DetectorBackend};
use crate::frame::Frame;
use crate::geometry::NormalizedRoi;

/// Degraded mode without a detection model: every ready frame reports the
/// configured region.
pub struct FixedRoiBackend {
    roi: NormalizedRoi,
}

impl FixedRoiBackend {
    pub fn new(roi: NormalizedRoi) -> Self {
        Self { roi }
    }
}

impl Default for FixedRoiBackend {
    fn default() -> Self {
        Self::new(NormalizedRoi::default())
    }
}

impl DetectorBackend for FixedRoiBackend {
    fn name(&self) -> &'static str {
        "fixed_roi"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Option<Detection>> {
        Ok(Some(Detection::Region(self.roi)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_reports_the_region() {
        let mut backend = FixedRoiBackend::default();
        let frame = Frame::from_rgb(vec![0u8; 12], 2, 2, 1).unwrap();
        let detection = backend.detect(&frame).unwrap();
        assert_eq!(detection, Some(Detection::Region(NormalizedRoi::default())));
    }
}
