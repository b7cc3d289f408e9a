use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;
use super::backends::{FixedRoiBackend, SkinToneBackend};
use crate::geometry::NormalizedRoi;

/// Detection backends selectable by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    FixedRoi,
    Skin,
    Tract,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "fixed_roi" | "roi" | "manual" => Ok(BackendKind::FixedRoi),
            "skin" => Ok(BackendKind::Skin),
            "tract" | "onnx" => Ok(BackendKind::Tract),
            other => Err(anyhow!(
                "unknown detector backend '{}'; expected fixed_roi, skin or tract",
                other
            )),
        }
    }
}

/// Backend selection plus the per-backend knobs.
#[derive(Clone, Debug)]
pub struct DetectorSettings {
    pub backend: BackendKind,
    /// Region reported by the fixed ROI backend.
    pub roi: NormalizedRoi,
    /// Sampling stride of the skin backend, in pixels.
    pub skin_stride: u32,
    /// Minimum skin sample fraction for the skin backend.
    pub skin_min_coverage: f32,
    /// ONNX model for the tract backend.
    pub model_path: Option<PathBuf>,
    /// Square input side of the ONNX model.
    pub model_input_size: u32,
    /// Hand presence score below which the ONNX model reports no hand.
    pub presence_threshold: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Skin,
            roi: NormalizedRoi::default(),
            skin_stride: 4,
            skin_min_coverage: 0.005,
            model_path: None,
            model_input_size: 224,
            presence_threshold: 0.5,
        }
    }
}

/// Build the configured backend and run its warm-up hook.
pub fn build_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let mut backend: Box<dyn DetectorBackend> = match settings.backend {
        BackendKind::FixedRoi => Box::new(FixedRoiBackend::new(settings.roi)),
        BackendKind::Skin => Box::new(SkinToneBackend::new(
            settings.skin_stride,
            settings.skin_min_coverage,
        )),
        BackendKind::Tract => build_tract(settings)?,
    };
    backend.warm_up()?;
    log::info!("hand detector backend: {}", backend.name());
    Ok(backend)
}

#[cfg(feature = "backend-tract")]
fn build_tract(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("tract backend requires a model path"))?;
    let backend = super::backends::TractBackend::new(path, settings.model_input_size)?
        .with_threshold(settings.presence_threshold);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!("tract backend requires the backend-tract feature"))
}
