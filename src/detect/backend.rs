use anyhow::Result;

use crate::frame::Frame;
use crate::geometry::{Landmark, NormalizedRoi};

/// What a backend found in one frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Detection {
    /// Hand landmark points, normalized to the frame.
    Landmarks(Vec<Landmark>),
    /// A fixed region standing in for the hand. The tracker treats it as
    /// always present and always stable.
    Region(NormalizedRoi),
}

/// Hand detection backend.
///
/// Backends are selected once at configuration time and then called once
/// per frame. Returning `Ok(None)` means no hand is visible; returning an
/// error marks the frame as a transient failure and the tracker skips it.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a ready (non-zero sized) frame.
    fn detect(&mut self, frame: &Frame) -> Result<Option<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
