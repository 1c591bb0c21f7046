// Scripted fakes for pipeline and service tests

use crate::core::frame_sampler::{FrameSampler, VideoSource};
use crate::models::capture::{FrameSample, VideoUri};
use crate::models::pose::{
    LandmarkerOptions, NormalizedPoint, PoseError, PoseResult, RawPoseResult, BODY_LANDMARK_COUNT,
};
use crate::platform::pose::PoseLandmarker;
use crate::platform::{ContentResolver, NoContentResolver};
use image::{Rgb, RgbImage};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Absolute model path for options that are never loaded from disk
pub fn model_path() -> PathBuf {
    std::env::temp_dir().join("videopose_test_model.onnx")
}

// ==============================================================================
// Scripted landmarker
// ==============================================================================

/// What a ScriptedLandmarker saw
#[derive(Debug, Default)]
pub struct CallLog {
    video_timestamps: Mutex<Vec<i64>>,
    image_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    closed: AtomicBool,
}

impl CallLog {
    pub fn video_timestamps(&self) -> Vec<i64> {
        self.video_timestamps.lock().unwrap().clone()
    }

    pub fn image_calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Reports a fixed number of identical poses for every frame
pub struct ScriptedLandmarker {
    calls: Arc<CallLog>,
    poses: usize,
    delay: Duration,
}

impl ScriptedLandmarker {
    pub fn with_poses(poses: usize) -> (Self, Arc<CallLog>) {
        let calls = Arc::new(CallLog::default());
        let landmarker = Self {
            calls: calls.clone(),
            poses,
            delay: Duration::ZERO,
        };
        (landmarker, calls)
    }

    pub fn with_subject() -> (Self, Arc<CallLog>) {
        Self::with_poses(1)
    }

    pub fn without_subject() -> (Self, Arc<CallLog>) {
        Self::with_poses(0)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn respond(&self) -> RawPoseResult {
        self.calls.enter();
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.calls.exit();

        RawPoseResult {
            poses: (0..self.poses).map(|_| scripted_pose()).collect(),
        }
    }
}

pub fn scripted_pose() -> Vec<NormalizedPoint> {
    (0..BODY_LANDMARK_COUNT)
        .map(|i| NormalizedPoint::new(i as f32 / 40.0, 0.5, -0.05))
        .collect()
}

impl PoseLandmarker for ScriptedLandmarker {
    fn create(_options: &LandmarkerOptions) -> PoseResult<Self> {
        Ok(Self::with_subject().0)
    }

    fn detect(&self, _image: &RgbImage) -> PoseResult<RawPoseResult> {
        self.calls.image_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.respond())
    }

    fn detect_for_video(&self, _image: &RgbImage, timestamp_ms: i64) -> PoseResult<RawPoseResult> {
        self.calls.video_timestamps.lock().unwrap().push(timestamp_ms);
        Ok(self.respond())
    }

    fn close(&self) {
        self.calls.closed.store(true, Ordering::SeqCst);
    }

    fn model_info(&self) -> String {
        format!("Scripted landmarker ({} poses)", self.poses)
    }
}

// ==============================================================================
// In-memory video source
// ==============================================================================

#[derive(Debug, Clone)]
pub struct FakeVideo {
    pub duration_ms: Option<i64>,
    pub width: u32,
    pub height: u32,
    /// Timestamps whose decode fails
    pub failing: HashSet<i64>,
    /// Timestamps with no decodable frame
    pub missing: HashSet<i64>,
    pub decode_delay: Duration,
}

impl FakeVideo {
    pub fn new(duration_ms: i64) -> Self {
        Self {
            duration_ms: Some(duration_ms),
            width: 640,
            height: 360,
            failing: HashSet::new(),
            missing: HashSet::new(),
            decode_delay: Duration::ZERO,
        }
    }

    pub fn failing_at(mut self, timestamp_ms: i64) -> Self {
        self.failing.insert(timestamp_ms);
        self
    }

    pub fn missing_at(mut self, timestamp_ms: i64) -> Self {
        self.missing.insert(timestamp_ms);
        self
    }

    pub fn with_decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = delay;
        self
    }

    pub fn without_duration(mut self) -> Self {
        self.duration_ms = None;
        self
    }
}

struct FakeSource {
    video: FakeVideo,
    closed: Arc<AtomicBool>,
}

impl VideoSource for FakeSource {
    fn duration_ms(&self) -> PoseResult<i64> {
        self.video
            .duration_ms
            .ok_or_else(|| PoseError::DurationUnavailable("fake video".to_string()))
    }

    fn frame_at(&self, timestamp_ms: i64) -> PoseResult<Option<FrameSample>> {
        if self.is_closed() {
            return Err(PoseError::DecodeFailed("source closed".to_string()));
        }
        if !self.video.decode_delay.is_zero() {
            std::thread::sleep(self.video.decode_delay);
        }
        if self.video.failing.contains(&timestamp_ms) {
            return Err(PoseError::DecodeFailed(format!("corrupt frame at {}ms", timestamp_ms)));
        }
        if self.video.missing.contains(&timestamp_ms) {
            return Ok(None);
        }

        let shade = (timestamp_ms % 256) as u8;
        let image = RgbImage::from_pixel(self.video.width, self.video.height, Rgb([shade, 64, 128]));
        Ok(Some(FrameSample::from_rgb_image(timestamp_ms, image)))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Serves FakeVideos registered by path
pub struct InMemorySampler {
    videos: HashMap<PathBuf, FakeVideo>,
    resolver: Arc<dyn ContentResolver>,
    opened: Mutex<Vec<(PathBuf, Arc<AtomicBool>)>>,
}

impl InMemorySampler {
    pub fn new() -> Self {
        Self {
            videos: HashMap::new(),
            resolver: Arc::new(NoContentResolver),
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn with_video(mut self, path: impl Into<PathBuf>, video: FakeVideo) -> Self {
        self.videos.insert(path.into(), video);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ContentResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn opened_paths(&self) -> Vec<PathBuf> {
        self.opened.lock().unwrap().iter().map(|(path, _)| path.clone()).collect()
    }

    pub fn all_closed(&self) -> bool {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .all(|(_, closed)| closed.load(Ordering::SeqCst))
    }
}

impl FrameSampler for InMemorySampler {
    fn open(&self, uri: &VideoUri) -> PoseResult<Box<dyn VideoSource>> {
        let path = match uri {
            VideoUri::File(path) => path.clone(),
            VideoUri::Content(content_uri) => self.resolver.resolve(content_uri)?,
        };

        let video = self
            .videos
            .get(&path)
            .cloned()
            .ok_or_else(|| PoseError::OpenFailed(format!("{} not found", path.display())))?;

        let closed = Arc::new(AtomicBool::new(false));
        self.opened.lock().unwrap().push((path, closed.clone()));
        Ok(Box::new(FakeSource { video, closed }))
    }
}
