pub mod fixed_roi;
pub mod skin;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use fixed_roi::FixedRoiBackend;
pub use skin::SkinToneBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
