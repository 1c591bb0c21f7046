// Pose estimation platform integration
// Provides the landmarker backends behind the engine handle

pub mod landmarker;

#[cfg(feature = "ml-onnx")]
pub mod onnx_backend;

pub use landmarker::{DefaultPoseLandmarker, DummyPoseLandmarker, PoseLandmarker};
