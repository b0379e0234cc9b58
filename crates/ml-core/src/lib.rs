//! Landmark model abstractions shared by the tracking pipeline.
//!
//! Variants, their fixed vocabularies and skeletons, the detection result
//! types, and the `LandmarkDetector` trait live here. Enable the `with-tch`
//! feature for the TorchScript backend.

mod detector;
mod landmarks;
mod variant;
pub mod vocabulary;

#[cfg(feature = "with-tch")]
mod runtime;
#[cfg(feature = "with-tch")]
mod torch;

pub use detector::{
    DetectorError, DetectorFactory, DetectorOptions, LandmarkDetector, RawInstances,
    RunningMode, TemporalDetector,
};
pub use landmarks::{DetectionResult, Landmark, LandmarkSet, Side};
pub use variant::{DetectorVariant, UnknownVariant};

#[cfg(feature = "with-tch")]
pub use runtime::preload_cuda_runtime;
#[cfg(feature = "with-tch")]
pub use torch::{TorchDetectorFactory, TorchLandmarker};

#[cfg(feature = "with-tch")]
pub use tch;
