// Video to pose-landmark pipeline
// Samples a video at a fixed interval, runs the landmarker on each frame across a
// pool of blocking workers, and assembles the timestamp-ordered result

use crate::core::config::PipelineConfig;
use crate::core::engine::EngineHandle;
use crate::core::frame_sampler::{plan_schedule, FrameSampler, SourceGuard, VideoSource};
use crate::core::landmark_extractor;
use crate::core::preview_encoder::{downscale_to_width, to_data_uri, PreviewEncoder};
use crate::core::result_assembler;
use crate::models::capture::VideoUri;
use crate::models::pose::{FrameResult, PoseError, PoseResult, RunningMode, VideoResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Cooperative cancellation flag shared between a caller and the workers
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Counters for one processVideo call
#[derive(Debug, Default)]
pub struct PipelineStats {
    sampled: AtomicUsize,
    dropped: AtomicUsize,
    failed: AtomicUsize,
}

impl PipelineStats {
    pub fn sampled(&self) -> usize {
        self.sampled.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }
}

pub struct PosePipeline {
    engine: Arc<EngineHandle>,
    sampler: Arc<dyn FrameSampler>,
    preview: PreviewEncoder,
    sampling_interval_ms: i64,
    inference_width_px: u32,
    drain_timeout: Duration,
    max_workers: Option<usize>,
}

impl PosePipeline {
    pub fn new(
        engine: Arc<EngineHandle>,
        sampler: Arc<dyn FrameSampler>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            engine,
            sampler,
            preview: PreviewEncoder::from_config(config),
            sampling_interval_ms: config.sampling_interval_ms as i64,
            inference_width_px: config.inference_width_px,
            drain_timeout: config.drain_timeout(),
            max_workers: config.max_workers,
        }
    }

    /// One worker in Video mode; otherwise `max_workers` or the available parallelism
    pub fn worker_count(&self) -> usize {
        match self.engine.running_mode() {
            RunningMode::Video => 1,
            RunningMode::Image => self
                .max_workers
                .unwrap_or_else(|| {
                    std::thread::available_parallelism()
                        .map(|n| n.get())
                        .unwrap_or(1)
                })
                .max(1),
        }
    }

    pub async fn process_video(&self, uri: &str) -> PoseResult<VideoResult> {
        self.process_video_with_cancel(uri, CancellationToken::new())
            .await
    }

    pub async fn process_video_with_cancel(
        &self,
        uri: &str,
        cancel: CancellationToken,
    ) -> PoseResult<VideoResult> {
        if !self.engine.is_ready() {
            return Err(PoseError::NotInitialized);
        }

        let started = Instant::now();
        let uri = VideoUri::parse(uri);
        let source: Arc<dyn VideoSource> = Arc::from(self.sampler.open(&uri)?);
        let guard = SourceGuard::new(source.clone());

        let duration_ms = source.duration_ms()?;
        let schedule = plan_schedule(duration_ms, self.sampling_interval_ms);
        info!(
            "Processing {} ({}ms, {} samples every {}ms, {} mode)",
            uri,
            duration_ms,
            schedule.len(),
            self.sampling_interval_ms,
            self.engine.running_mode()
        );

        if schedule.is_empty() {
            return Ok(VideoResult::default());
        }

        let stats = Arc::new(PipelineStats::default());
        let outcome = self.run_workers(source, schedule, cancel, stats.clone()).await;

        // Release the decoder before assembling
        drop(guard);

        let frames = outcome?;
        let result = result_assembler::assemble(frames);
        info!(
            "Finished {}: sampled {}, dropped {}, failed {}, emitted {} in {:?}",
            uri,
            stats.sampled(),
            stats.dropped(),
            stats.failed(),
            result.len(),
            started.elapsed()
        );

        Ok(result)
    }

    async fn run_workers(
        &self,
        source: Arc<dyn VideoSource>,
        schedule: Vec<i64>,
        cancel: CancellationToken,
        stats: Arc<PipelineStats>,
    ) -> PoseResult<Vec<FrameResult>> {
        let clock_base = match self.engine.running_mode() {
            RunningMode::Video => self.engine.next_video_base(),
            RunningMode::Image => 0,
        };

        let halt = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<FrameResult>();
        let workers = self.worker_count().min(schedule.len());
        let context = Arc::new(WorkerContext {
            engine: self.engine.clone(),
            source,
            preview: self.preview,
            inference_width_px: self.inference_width_px,
            schedule,
            cursor: AtomicUsize::new(0),
            clock_base,
            cancel: cancel.clone(),
            halt: halt.clone(),
            fatal: Mutex::new(None),
            stats,
        });

        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            let context = context.clone();
            let tx = tx.clone();
            pool.spawn_blocking(move || context.run(worker_id, tx));
        }
        drop(tx);
        debug!("Started {} pose workers", workers);

        let drained = tokio::time::timeout(self.drain_timeout, async {
            while let Some(joined) = pool.join_next().await {
                if let Err(e) = joined {
                    error!("Pose worker panicked: {}", e);
                }
            }
        })
        .await;

        if drained.is_err() {
            // Blocking workers cannot be aborted; they stop at their next step
            halt.cancel();
            pool.detach_all();
            warn!("Processing exceeded {:?}, abandoning remaining frames", self.drain_timeout);
            return Err(PoseError::ProcessingTimeout(self.drain_timeout));
        }

        if cancel.is_cancelled() {
            info!("Processing cancelled");
            return Err(PoseError::Cancelled);
        }

        if let Some(err) = context.take_fatal() {
            return Err(err);
        }

        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        Ok(frames)
    }
}

struct WorkerContext {
    engine: Arc<EngineHandle>,
    source: Arc<dyn VideoSource>,
    preview: PreviewEncoder,
    inference_width_px: u32,
    schedule: Vec<i64>,
    cursor: AtomicUsize,
    clock_base: i64,
    cancel: CancellationToken,
    halt: CancellationToken,
    // First error that ends the whole call
    fatal: Mutex<Option<PoseError>>,
    stats: Arc<PipelineStats>,
}

impl WorkerContext {
    fn stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.halt.is_cancelled()
    }

    fn take_fatal(&self) -> Option<PoseError> {
        self.fatal.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Keep the first call-level error and stop the other workers
    fn abort(&self, err: PoseError) {
        let mut fatal = self.fatal.lock().unwrap_or_else(|e| e.into_inner());
        if fatal.is_none() {
            *fatal = Some(err);
        }
        self.halt.cancel();
    }

    fn run(&self, worker_id: usize, tx: mpsc::UnboundedSender<FrameResult>) {
        while !self.stopped() {
            let index = self.cursor.fetch_add(1, Ordering::SeqCst);
            let Some(&timestamp_ms) = self.schedule.get(index) else {
                break;
            };
            self.stats.sampled.fetch_add(1, Ordering::Relaxed);

            match self.process_timestamp(timestamp_ms) {
                Ok(Some(frame)) => {
                    if tx.send(frame).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) if e.is_frame_local() => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    warn!("Worker {} dropped frame at {}ms: {}", worker_id, timestamp_ms, e);
                }
                Err(e) => {
                    error!("Worker {} stopped at {}ms: {}", worker_id, timestamp_ms, e);
                    self.abort(e);
                    break;
                }
            }
        }
    }

    fn process_timestamp(&self, timestamp_ms: i64) -> PoseResult<Option<FrameResult>> {
        let Some(frame) = self.source.frame_at(timestamp_ms)? else {
            debug!("No frame at {}ms", timestamp_ms);
            return Ok(None);
        };

        let pixels = frame.to_rgb_image()?;
        drop(frame);

        let working = downscale_to_width(&pixels, self.inference_width_px);

        // Abandoned workers must not reach the engine after the call returned
        if self.stopped() {
            return Ok(None);
        }
        let raw = match self.engine.running_mode() {
            RunningMode::Image => self.engine.detect(&working)?,
            RunningMode::Video => self
                .engine
                .detect_for_video(&working, self.clock_base + timestamp_ms)?,
        };
        drop(working);

        let Some(landmarks) = landmark_extractor::extract(&raw) else {
            return Ok(None);
        };

        let jpeg = self.preview.encode_rgb(&pixels)?;
        Ok(Some(FrameResult::new(
            timestamp_ms,
            to_data_uri(&jpeg),
            landmarks,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::VIDEO_SEQUENCE_GAP_MS;
    use crate::core::test_support::{model_path, FakeVideo, InMemorySampler, ScriptedLandmarker, CallLog};
    use crate::models::pose::LandmarkerOptions;

    fn config(mode: RunningMode, interval_ms: u32) -> PipelineConfig {
        PipelineConfig {
            running_mode: mode,
            sampling_interval_ms: interval_ms,
            ..PipelineConfig::default()
        }
    }

    fn engine(mode: RunningMode, landmarker: ScriptedLandmarker) -> Arc<EngineHandle> {
        let options = LandmarkerOptions::new(model_path()).with_running_mode(mode);
        Arc::new(EngineHandle::from_landmarker(options, Box::new(landmarker)).unwrap())
    }

    fn pipeline(
        config: &PipelineConfig,
        sampler: Arc<InMemorySampler>,
        landmarker: ScriptedLandmarker,
    ) -> PosePipeline {
        PosePipeline::new(engine(config.running_mode, landmarker), sampler, config)
    }

    fn one_second_video() -> Arc<InMemorySampler> {
        Arc::new(InMemorySampler::new().with_video("/videos/walk.mp4", FakeVideo::new(1000)))
    }

    #[tokio::test]
    async fn test_samples_every_interval() {
        let sampler = one_second_video();
        let (landmarker, calls) = ScriptedLandmarker::with_subject();
        let pipeline = pipeline(&config(RunningMode::Video, 200), sampler.clone(), landmarker);

        let result = pipeline.process_video("/videos/walk.mp4").await.unwrap();

        assert_eq!(result.timestamps(), vec![0.0, 200.0, 400.0, 600.0, 800.0]);
        assert!(result.frames().iter().all(|f| f.landmarks.len() == 33));
        assert!(result
            .frames()
            .iter()
            .all(|f| f.frame_image.starts_with("data:image/jpeg;base64,")));
        assert_eq!(calls.video_timestamps(), vec![0, 200, 400, 600, 800]);
        assert!(sampler.all_closed());
    }

    #[tokio::test]
    async fn test_no_subject_gives_empty_result() {
        let sampler = one_second_video();
        let (landmarker, calls) = ScriptedLandmarker::without_subject();
        let pipeline = pipeline(&config(RunningMode::Video, 100), sampler.clone(), landmarker);

        let result = pipeline.process_video("/videos/walk.mp4").await.unwrap();

        assert!(result.is_empty());
        assert_eq!(calls.video_timestamps().len(), 10);
        assert!(sampler.all_closed());
    }

    #[tokio::test]
    async fn test_decode_failure_drops_single_frame() {
        let sampler = Arc::new(
            InMemorySampler::new()
                .with_video("/videos/walk.mp4", FakeVideo::new(1000).failing_at(400).missing_at(600)),
        );
        let (landmarker, _) = ScriptedLandmarker::with_subject();
        let pipeline = pipeline(&config(RunningMode::Video, 200), sampler.clone(), landmarker);

        let result = pipeline.process_video("/videos/walk.mp4").await.unwrap();

        assert_eq!(result.timestamps(), vec![0.0, 200.0, 800.0]);
        assert!(sampler.all_closed());
    }

    #[tokio::test]
    async fn test_zero_duration() {
        let sampler = Arc::new(InMemorySampler::new().with_video("/videos/empty.mp4", FakeVideo::new(0)));
        let (landmarker, calls) = ScriptedLandmarker::with_subject();
        let pipeline = pipeline(&config(RunningMode::Video, 66), sampler.clone(), landmarker);

        let result = pipeline.process_video("/videos/empty.mp4").await.unwrap();

        assert!(result.is_empty());
        assert!(calls.video_timestamps().is_empty());
        assert!(sampler.all_closed());
    }

    #[tokio::test]
    async fn test_open_and_duration_failures() {
        let sampler = Arc::new(
            InMemorySampler::new().with_video("/videos/broken.mp4", FakeVideo::new(1000).without_duration()),
        );
        let (landmarker, _) = ScriptedLandmarker::with_subject();
        let pipeline = pipeline(&config(RunningMode::Video, 66), sampler.clone(), landmarker);

        assert!(matches!(
            pipeline.process_video("/videos/missing.mp4").await,
            Err(PoseError::OpenFailed(_))
        ));
        assert!(matches!(
            pipeline.process_video("/videos/broken.mp4").await,
            Err(PoseError::DurationUnavailable(_))
        ));
        assert!(sampler.all_closed());
    }

    #[tokio::test]
    async fn test_image_mode_results_are_ordered() {
        let sampler = Arc::new(InMemorySampler::new().with_video("/videos/walk.mp4", FakeVideo::new(2000)));
        let (landmarker, calls) = ScriptedLandmarker::with_subject();
        let mut config = config(RunningMode::Image, 50);
        config.max_workers = Some(4);
        let pipeline = pipeline(&config, sampler.clone(), landmarker.with_delay(Duration::from_millis(2)));

        assert_eq!(pipeline.worker_count(), 4);
        let result = pipeline.process_video("/videos/walk.mp4").await.unwrap();

        let expected: Vec<f64> = (0..40).map(|k| (k * 50) as f64).collect();
        assert_eq!(result.timestamps(), expected);
        assert_eq!(calls.image_calls(), 40);
        assert!(calls.max_in_flight() <= 4);
        assert!(sampler.all_closed());
    }

    #[tokio::test]
    async fn test_video_mode_uses_one_worker() {
        let sampler = one_second_video();
        let (landmarker, calls) = ScriptedLandmarker::with_subject();
        let mut config = config(RunningMode::Video, 100);
        config.max_workers = Some(8);
        let pipeline = pipeline(&config, sampler, landmarker.with_delay(Duration::from_millis(2)));

        assert_eq!(pipeline.worker_count(), 1);
        pipeline.process_video("/videos/walk.mp4").await.unwrap();

        assert_eq!(calls.max_in_flight(), 1);
        let timestamps = calls.video_timestamps();
        assert!(timestamps.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[tokio::test]
    async fn test_video_clock_continues_across_calls() {
        let sampler = one_second_video();
        let (landmarker, calls) = ScriptedLandmarker::with_subject();
        let pipeline = pipeline(&config(RunningMode::Video, 250), sampler, landmarker);

        let first = pipeline.process_video("/videos/walk.mp4").await.unwrap();
        let second = pipeline.process_video("/videos/walk.mp4").await.unwrap();

        // Emitted timestamps stay relative to each video
        assert_eq!(first.timestamps(), second.timestamps());

        let base = 750 + VIDEO_SEQUENCE_GAP_MS;
        assert_eq!(
            calls.video_timestamps(),
            vec![0, 250, 500, 750, base, base + 250, base + 500, base + 750]
        );
    }

    #[tokio::test]
    async fn test_cancelled_call_closes_source() {
        let sampler = one_second_video();
        let (landmarker, calls) = ScriptedLandmarker::with_subject();
        let pipeline = pipeline(&config(RunningMode::Video, 100), sampler.clone(), landmarker);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = pipeline
            .process_video_with_cancel("/videos/walk.mp4", cancel)
            .await;

        assert!(matches!(result, Err(PoseError::Cancelled)));
        assert!(calls.video_timestamps().is_empty());
        assert!(sampler.all_closed());
    }

    #[tokio::test]
    async fn test_drain_timeout() {
        let sampler = one_second_video();
        let (landmarker, _) = ScriptedLandmarker::with_subject();
        let mut config = config(RunningMode::Video, 100);
        config.drain_timeout_ms = 20;
        let pipeline = pipeline(&config, sampler.clone(), landmarker.with_delay(Duration::from_millis(50)));

        let result = pipeline.process_video("/videos/walk.mp4").await;

        assert!(matches!(result, Err(PoseError::ProcessingTimeout(_))));
        assert!(sampler.all_closed());
    }

    #[tokio::test]
    async fn test_timed_out_worker_skips_inference() {
        let sampler = Arc::new(InMemorySampler::new().with_video(
            "/videos/walk.mp4",
            FakeVideo::new(1000).with_decode_delay(Duration::from_millis(80)),
        ));
        let (landmarker, calls) = ScriptedLandmarker::with_subject();
        let mut config = config(RunningMode::Video, 100);
        config.drain_timeout_ms = 20;
        let pipeline = pipeline(&config, sampler.clone(), landmarker);

        let result = pipeline.process_video("/videos/walk.mp4").await;
        assert!(matches!(result, Err(PoseError::ProcessingTimeout(_))));

        // Let the abandoned worker finish its decode
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(calls.video_timestamps().is_empty());
        assert!(sampler.all_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_engine_closed_mid_run_fails_call() {
        let sampler = Arc::new(InMemorySampler::new().with_video("/videos/walk.mp4", FakeVideo::new(1000)));
        let (landmarker, calls) = ScriptedLandmarker::with_subject();
        let pipeline = Arc::new(pipeline(
            &config(RunningMode::Video, 100),
            sampler.clone(),
            landmarker.with_delay(Duration::from_millis(30)),
        ));

        let running = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.process_video("/videos/walk.mp4").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        pipeline.engine.close();

        let result = running.await.unwrap();
        assert!(matches!(result, Err(PoseError::NotInitialized)));
        assert!(calls.video_timestamps().len() < 10);
        assert!(sampler.all_closed());
    }

    #[tokio::test]
    async fn test_closed_engine_is_not_initialized() {
        let sampler = one_second_video();
        let (landmarker, _): (ScriptedLandmarker, Arc<CallLog>) = ScriptedLandmarker::with_subject();
        let pipeline = pipeline(&config(RunningMode::Video, 100), sampler.clone(), landmarker);
        pipeline.engine.close();

        assert!(matches!(
            pipeline.process_video("/videos/walk.mp4").await,
            Err(PoseError::NotInitialized)
        ));
        assert!(sampler.opened_paths().is_empty());
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
