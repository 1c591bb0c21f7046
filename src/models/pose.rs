// Data models for pose landmark extraction from video
// Landmark schema, engine options, raw engine output and per-video results

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

// ==============================================================================
// Body Landmarks (33 keypoints)
// ==============================================================================

/// Number of landmarks in a body pose
pub const BODY_LANDMARK_COUNT: usize = 33;

/// MediaPipe Pose Landmark indices (33 total)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BodyLandmark {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
}

impl BodyLandmark {
    /// All landmarks in model output order
    pub const ALL: [BodyLandmark; BODY_LANDMARK_COUNT] = [
        BodyLandmark::Nose,
        BodyLandmark::LeftEyeInner,
        BodyLandmark::LeftEye,
        BodyLandmark::LeftEyeOuter,
        BodyLandmark::RightEyeInner,
        BodyLandmark::RightEye,
        BodyLandmark::RightEyeOuter,
        BodyLandmark::LeftEar,
        BodyLandmark::RightEar,
        BodyLandmark::MouthLeft,
        BodyLandmark::MouthRight,
        BodyLandmark::LeftShoulder,
        BodyLandmark::RightShoulder,
        BodyLandmark::LeftElbow,
        BodyLandmark::RightElbow,
        BodyLandmark::LeftWrist,
        BodyLandmark::RightWrist,
        BodyLandmark::LeftPinky,
        BodyLandmark::RightPinky,
        BodyLandmark::LeftIndex,
        BodyLandmark::RightIndex,
        BodyLandmark::LeftThumb,
        BodyLandmark::RightThumb,
        BodyLandmark::LeftHip,
        BodyLandmark::RightHip,
        BodyLandmark::LeftKnee,
        BodyLandmark::RightKnee,
        BodyLandmark::LeftAnkle,
        BodyLandmark::RightAnkle,
        BodyLandmark::LeftHeel,
        BodyLandmark::RightHeel,
        BodyLandmark::LeftFootIndex,
        BodyLandmark::RightFootIndex,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Wire name of the landmark
    pub fn name(self) -> &'static str {
        match self {
            BodyLandmark::Nose => "NOSE",
            BodyLandmark::LeftEyeInner => "LEFT_EYE_INNER",
            BodyLandmark::LeftEye => "LEFT_EYE",
            BodyLandmark::LeftEyeOuter => "LEFT_EYE_OUTER",
            BodyLandmark::RightEyeInner => "RIGHT_EYE_INNER",
            BodyLandmark::RightEye => "RIGHT_EYE",
            BodyLandmark::RightEyeOuter => "RIGHT_EYE_OUTER",
            BodyLandmark::LeftEar => "LEFT_EAR",
            BodyLandmark::RightEar => "RIGHT_EAR",
            BodyLandmark::MouthLeft => "MOUTH_LEFT",
            BodyLandmark::MouthRight => "MOUTH_RIGHT",
            BodyLandmark::LeftShoulder => "LEFT_SHOULDER",
            BodyLandmark::RightShoulder => "RIGHT_SHOULDER",
            BodyLandmark::LeftElbow => "LEFT_ELBOW",
            BodyLandmark::RightElbow => "RIGHT_ELBOW",
            BodyLandmark::LeftWrist => "LEFT_WRIST",
            BodyLandmark::RightWrist => "RIGHT_WRIST",
            BodyLandmark::LeftPinky => "LEFT_PINKY",
            BodyLandmark::RightPinky => "RIGHT_PINKY",
            BodyLandmark::LeftIndex => "LEFT_INDEX",
            BodyLandmark::RightIndex => "RIGHT_INDEX",
            BodyLandmark::LeftThumb => "LEFT_THUMB",
            BodyLandmark::RightThumb => "RIGHT_THUMB",
            BodyLandmark::LeftHip => "LEFT_HIP",
            BodyLandmark::RightHip => "RIGHT_HIP",
            BodyLandmark::LeftKnee => "LEFT_KNEE",
            BodyLandmark::RightKnee => "RIGHT_KNEE",
            BodyLandmark::LeftAnkle => "LEFT_ANKLE",
            BodyLandmark::RightAnkle => "RIGHT_ANKLE",
            BodyLandmark::LeftHeel => "LEFT_HEEL",
            BodyLandmark::RightHeel => "RIGHT_HEEL",
            BodyLandmark::LeftFootIndex => "LEFT_FOOT_INDEX",
            BodyLandmark::RightFootIndex => "RIGHT_FOOT_INDEX",
        }
    }
}

/// Name for a landmark index; anything past the body table is `UNKNOWN_<n>`
pub fn landmark_name(index: usize) -> Cow<'static, str> {
    match BodyLandmark::from_index(index) {
        Some(landmark) => Cow::Borrowed(landmark.name()),
        None => Cow::Owned(format!("UNKNOWN_{}", index)),
    }
}

// ==============================================================================
// Engine Configuration
// ==============================================================================

/// How the landmarker consumes frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunningMode {
    /// Every frame is independent
    Image,
    /// Frames arrive in timestamp order and share tracking state
    #[default]
    Video,
}

impl RunningMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunningMode::Image => "Image",
            RunningMode::Video => "Video",
        }
    }
}

impl fmt::Display for RunningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options fixed when a landmarker session is created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkerOptions {
    pub model_path: PathBuf,
    pub running_mode: RunningMode,
    pub num_poses: u32,                 // Maximum poses reported per frame (default: 1)
    pub min_detection_confidence: f32,  // Full-frame detection threshold (default: 0.5)
    pub min_presence_confidence: f32,   // Pose presence threshold (default: 0.5)
    pub min_tracking_confidence: f32,   // Video mode tracking threshold (default: 0.5)
}

impl LandmarkerOptions {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            running_mode: RunningMode::default(),
            num_poses: 1,
            min_detection_confidence: 0.5,
            min_presence_confidence: 0.5,
            min_tracking_confidence: 0.5,
        }
    }

    pub fn with_running_mode(mut self, running_mode: RunningMode) -> Self {
        self.running_mode = running_mode;
        self
    }

    pub fn validate(&self) -> PoseResult<()> {
        if !self.model_path.is_absolute() {
            return Err(PoseError::InvalidConfig(format!(
                "model path must be absolute: {}",
                self.model_path.display()
            )));
        }

        if self.num_poses == 0 {
            return Err(PoseError::InvalidConfig("num_poses must be at least 1".to_string()));
        }

        let thresholds = [
            ("min_detection_confidence", self.min_detection_confidence),
            ("min_presence_confidence", self.min_presence_confidence),
            ("min_tracking_confidence", self.min_tracking_confidence),
        ];
        for (name, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(PoseError::InvalidConfig(format!(
                    "{} must be between 0.0 and 1.0, got {}",
                    name, value
                )));
            }
        }

        Ok(())
    }
}

// ==============================================================================
// Raw Engine Output
// ==============================================================================

/// A point as reported by the landmark model, normalized to the input image
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NormalizedPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub visibility: Option<f32>,
    pub presence: Option<f32>,
}

impl NormalizedPoint {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z, visibility: None, presence: None }
    }

    pub fn with_scores(mut self, visibility: f32, presence: f32) -> Self {
        self.visibility = Some(visibility);
        self.presence = Some(presence);
        self
    }
}

/// Landmarker output for one image: zero or more poses
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPoseResult {
    pub poses: Vec<Vec<NormalizedPoint>>,
}

impl RawPoseResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(points: Vec<NormalizedPoint>) -> Self {
        Self { poses: vec![points] }
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn pose_count(&self) -> usize {
        self.poses.len()
    }

    pub fn first_pose(&self) -> Option<&[NormalizedPoint]> {
        self.poses.first().map(Vec::as_slice)
    }

    /// Keep at most `num_poses` poses
    pub fn truncate(&mut self, num_poses: usize) {
        self.poses.truncate(num_poses);
    }
}

// ==============================================================================
// Results
// ==============================================================================

/// One named landmark as returned to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub name: String,
    pub x: f32,          // Normalized to image width [0, 1]
    pub y: f32,          // Normalized to image height [0, 1]
    pub z: f32,          // Depth relative to the hips, model units
    pub visibility: f32,
    pub presence: f32,
}

/// Landmarks and preview for one sampled frame with a detected pose
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameResult {
    pub timestamp: f64,         // Milliseconds from the start of the video
    pub frame_image: String,    // data:image/jpeg;base64,...
    pub landmarks: Vec<Landmark>,
}

impl FrameResult {
    pub fn new(timestamp_ms: i64, frame_image: String, landmarks: Vec<Landmark>) -> Self {
        Self {
            timestamp: timestamp_ms as f64,
            frame_image,
            landmarks,
        }
    }
}

/// Frame results for a whole video, ascending by timestamp without duplicates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoResult {
    frames: Vec<FrameResult>,
}

impl VideoResult {
    /// Caller guarantees ascending, duplicate-free timestamps
    pub(crate) fn from_sorted(frames: Vec<FrameResult>) -> Self {
        Self { frames }
    }

    pub fn frames(&self) -> &[FrameResult] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn timestamps(&self) -> Vec<f64> {
        self.frames.iter().map(|frame| frame.timestamp).collect()
    }
}

// ==============================================================================
// Error Types
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PoseError {
    #[error("Pose landmarker not initialized")]
    NotInitialized,

    #[error("Model asset missing: {0}")]
    AssetMissing(String),

    #[error("IO failed: {0}")]
    IoFailed(String),

    #[error("Model loading failed: {0}")]
    ModelLoadFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to open video: {0}")]
    OpenFailed(String),

    #[error("Video duration unavailable: {0}")]
    DurationUnavailable(String),

    #[error("Frame decode failed: {0}")]
    DecodeFailed(String),

    #[error("Preview encoding failed: {0}")]
    EncodeFailed(String),

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("Timestamp {requested}ms is not after previous timestamp {previous}ms")]
    TimestampOutOfOrder { previous: i64, requested: i64 },

    #[error("Landmarker runs in {actual} mode, call requires {expected} mode")]
    InvalidRunningMode { expected: RunningMode, actual: RunningMode },

    #[error("Processing did not finish within {0:?}")]
    ProcessingTimeout(Duration),

    #[error("Processing cancelled")]
    Cancelled,
}

impl PoseError {
    /// Errors that cost a single frame rather than the whole call
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            PoseError::DecodeFailed(_)
                | PoseError::EncodeFailed(_)
                | PoseError::InferenceFailed(_)
                | PoseError::TimestampOutOfOrder { .. }
                | PoseError::InvalidRunningMode { .. }
        )
    }
}

pub type PoseResult<T> = Result<T, PoseError>;
