mod backend;
mod backends;
mod registry;

pub use backend::{Detection, DetectorBackend};
pub use backends::{FixedRoiBackend, SkinToneBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::{build_backend, BackendKind, DetectorSettings};
