// Pose landmarker bridge
// Abstraction over pose landmark backends (ONNX Runtime, or a no-op fallback)

use crate::models::pose::{LandmarkerOptions, PoseResult, RawPoseResult};
use image::RgbImage;
use tracing::warn;

/// Pose landmarker backend
///
/// Backends receive images already downscaled for inference and report
/// points normalized to that image. The running-mode and timestamp
/// contracts are enforced by `EngineHandle`, not here.
pub trait PoseLandmarker: Send + Sync {
    /// Load the model described by `options`
    fn create(options: &LandmarkerOptions) -> PoseResult<Self>
    where
        Self: Sized;

    /// Stateless detection on a single image
    fn detect(&self, image: &RgbImage) -> PoseResult<RawPoseResult>;

    /// Detection on the next video frame; may use state from earlier frames
    fn detect_for_video(&self, image: &RgbImage, timestamp_ms: i64) -> PoseResult<RawPoseResult>;

    /// Release model resources
    fn close(&self);

    /// Get model info
    fn model_info(&self) -> String;
}

// ==============================================================================
// Dummy Implementation (no ML backend compiled in)
// ==============================================================================

/// Reports no poses for every frame
pub struct DummyPoseLandmarker {
    options: LandmarkerOptions,
}

impl PoseLandmarker for DummyPoseLandmarker {
    fn create(options: &LandmarkerOptions) -> PoseResult<Self> {
        warn!("Using dummy pose landmarker; enable the 'ml-onnx' feature for real inference");
        Ok(Self {
            options: options.clone(),
        })
    }

    fn detect(&self, _image: &RgbImage) -> PoseResult<RawPoseResult> {
        Ok(RawPoseResult::empty())
    }

    fn detect_for_video(&self, _image: &RgbImage, _timestamp_ms: i64) -> PoseResult<RawPoseResult> {
        Ok(RawPoseResult::empty())
    }

    fn close(&self) {}

    fn model_info(&self) -> String {
        format!(
            "Dummy pose landmarker (model {:?} not loaded)",
            self.options.model_path
        )
    }
}

// Default backend for this build
#[cfg(feature = "ml-onnx")]
pub type DefaultPoseLandmarker = super::onnx_backend::OnnxPoseLandmarker;

#[cfg(not(feature = "ml-onnx"))]
pub type DefaultPoseLandmarker = DummyPoseLandmarker;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dummy_reports_no_poses() {
        let options = LandmarkerOptions::new(std::env::temp_dir().join("pose.onnx"));
        let landmarker = DummyPoseLandmarker::create(&options).unwrap();
        let image = RgbImage::new(64, 64);

        assert!(landmarker.detect(&image).unwrap().is_empty());
        assert!(landmarker.detect_for_video(&image, 0).unwrap().is_empty());
        assert!(landmarker.model_info().contains("Dummy"));
    }
}
