use crate::models::pose::{
    LandmarkerOptions, PoseError, PoseResult, RawPoseResult, RunningMode,
};
use crate::platform::pose::{DefaultPoseLandmarker, PoseLandmarker};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

/// Clock gap between consecutive videos on one Video-mode session.
/// Large enough that backend tracking state from the previous video goes stale.
pub const VIDEO_SEQUENCE_GAP_MS: i64 = 60_000;

#[derive(Debug, Default)]
struct VideoClock {
    last_submitted: Option<i64>,
}

// ==============================================================================
// Engine Handle
// ==============================================================================

/// Owns one landmarker session and enforces its calling contract:
/// the running mode chosen at creation, and strictly increasing
/// timestamps in Video mode.
pub struct EngineHandle {
    landmarker: Box<dyn PoseLandmarker>,
    options: LandmarkerOptions,
    ready: AtomicBool,
    // Serializes Video-mode submissions
    video_clock: Mutex<VideoClock>,
}

impl EngineHandle {
    /// Create a session with the backend compiled into this build
    pub fn create(options: LandmarkerOptions) -> PoseResult<Self> {
        Self::create_with::<DefaultPoseLandmarker>(options)
    }

    pub fn create_with<L: PoseLandmarker + 'static>(options: LandmarkerOptions) -> PoseResult<Self> {
        options.validate()?;
        let landmarker = L::create(&options)?;
        Self::from_landmarker(options, Box::new(landmarker))
    }

    /// Wrap an already constructed backend
    pub fn from_landmarker(
        options: LandmarkerOptions,
        landmarker: Box<dyn PoseLandmarker>,
    ) -> PoseResult<Self> {
        options.validate()?;
        info!(
            "Pose landmarker ready: {} ({} mode, {} pose(s))",
            landmarker.model_info(),
            options.running_mode,
            options.num_poses
        );

        Ok(Self {
            landmarker,
            options,
            ready: AtomicBool::new(true),
            video_clock: Mutex::new(VideoClock::default()),
        })
    }

    pub fn running_mode(&self) -> RunningMode {
        self.options.running_mode
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn model_info(&self) -> String {
        self.landmarker.model_info()
    }

    /// Stateless detection (Image mode only)
    pub fn detect(&self, image: &RgbImage) -> PoseResult<RawPoseResult> {
        self.ensure_ready()?;
        self.ensure_mode(RunningMode::Image)?;

        let mut raw = self.landmarker.detect(image)?;
        raw.truncate(self.options.num_poses as usize);
        Ok(raw)
    }

    /// Tracked detection (Video mode only); `timestamp_ms` must exceed every earlier submission
    pub fn detect_for_video(&self, image: &RgbImage, timestamp_ms: i64) -> PoseResult<RawPoseResult> {
        self.ensure_ready()?;
        self.ensure_mode(RunningMode::Video)?;

        let mut clock = self.video_clock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = clock.last_submitted {
            if timestamp_ms <= previous {
                return Err(PoseError::TimestampOutOfOrder {
                    previous,
                    requested: timestamp_ms,
                });
            }
        }
        clock.last_submitted = Some(timestamp_ms);

        let mut raw = self.landmarker.detect_for_video(image, timestamp_ms)?;
        raw.truncate(self.options.num_poses as usize);
        Ok(raw)
    }

    /// Offset for the next video's timestamps so the session clock keeps increasing
    pub fn next_video_base(&self) -> i64 {
        let clock = self.video_clock.lock().unwrap_or_else(|e| e.into_inner());
        match clock.last_submitted {
            Some(last) => last + VIDEO_SEQUENCE_GAP_MS,
            None => 0,
        }
    }

    /// Last timestamp submitted in Video mode
    pub fn last_video_timestamp(&self) -> Option<i64> {
        self.video_clock
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last_submitted
    }

    /// Release the backend. Later calls fail with NotInitialized.
    pub fn close(&self) {
        if self.ready.swap(false, Ordering::SeqCst) {
            self.landmarker.close();
            debug!("Pose landmarker closed");
        }
    }

    fn ensure_ready(&self) -> PoseResult<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(PoseError::NotInitialized)
        }
    }

    fn ensure_mode(&self, expected: RunningMode) -> PoseResult<()> {
        let actual = self.options.running_mode;
        if actual == expected {
            Ok(())
        } else {
            Err(PoseError::InvalidRunningMode { expected, actual })
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.close();
    }
}
