#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::{Detection, DetectorBackend};
use crate::frame::Frame;
use crate::geometry::Landmark;

/// Points emitted by hand landmark models (wrist, four joints per finger).
pub const HAND_LANDMARKS: usize = 21;

/// Tract-based backend for ONNX hand landmark models.
///
/// Expects a square RGB input `1x3xSxS` scaled to `0..1`. The first output
/// holds `21 x (x, y, z)` in input pixels; an optional second output holds a
/// hand presence score.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    presence_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            presence_threshold: 0.5,
        })
    }

    /// Override the default presence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.presence_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let side = self.input_size;
        let resized = image::imageops::resize(frame.image(), side, side, FilterType::Triangle);
        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32).0[c] as f32 / 255.0
        });
        input.into_tensor()
    }

    fn extract_landmarks(&self, outputs: &TVec<TValue>) -> Result<Option<Vec<Landmark>>> {
        if let Some(presence) = outputs.get(1) {
            let score = presence
                .to_array_view::<f32>()
                .context("presence output was not f32")?
                .iter()
                .next()
                .copied()
                .unwrap_or(0.0);
            let score = if (0.0..=1.0).contains(&score) {
                score
            } else {
                1.0 / (1.0 + (-score).exp())
            };
            if score < self.presence_threshold {
                return Ok(None);
            }
        }

        let coords = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?
            .to_array_view::<f32>()
            .context("landmark output tensor was not f32")?;
        let values: Vec<f32> = coords.iter().copied().collect();
        if values.len() < HAND_LANDMARKS * 3 {
            return Err(anyhow!(
                "expected {} landmark values, model produced {}",
                HAND_LANDMARKS * 3,
                values.len()
            ));
        }
        let side = self.input_size as f32;
        let points = values
            .chunks_exact(3)
            .take(HAND_LANDMARKS)
            .map(|p| Landmark {
                x: p[0] / side,
                y: p[1] / side,
                z: p[2] / side,
            })
            .collect();
        Ok(Some(points))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Option<Detection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        Ok(self.extract_landmarks(&outputs)?.map(Detection::Landmarks))
    }
}
