pub mod core;
pub mod models;
pub mod platform;

mod cli;

pub use cli::{run, Cli};

use crate::core::asset_stager::AssetStager;
use crate::core::config::PipelineConfig;
use crate::core::engine::EngineHandle;
use crate::core::frame_sampler::{default_frame_sampler, FrameSampler};
use crate::core::pose_pipeline::{CancellationToken, PosePipeline};
use crate::models::host::HostError;
use crate::models::pose::{LandmarkerOptions, PoseError, PoseResult, RunningMode, VideoResult};
use crate::platform::{ContentResolver, NoContentResolver};
use std::sync::{Arc, OnceLock};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

pub const INITIALIZED_MESSAGE: &str = "Pose landmarker initialized successfully";

/// Builds an engine session from resolved options
pub type EngineFactory = Arc<dyn Fn(LandmarkerOptions) -> PoseResult<EngineHandle> + Send + Sync>;

static SERVICE: OnceLock<PoseService> = OnceLock::new();

// Service state shared by every host entry point
pub struct PoseService {
    config: PipelineConfig,
    stager: AssetStager,
    sampler: Arc<dyn FrameSampler>,
    engine: RwLock<Option<Arc<EngineHandle>>>,
    engine_factory: EngineFactory,
    // Video-mode sessions accept one video at a time
    video_lane: Mutex<()>,
}

impl PoseService {
    pub fn new(config: PipelineConfig) -> Self {
        let stager = AssetStager::new(&config.asset_bundle_dir, &config.data_dir);
        Self {
            config,
            stager,
            sampler: default_frame_sampler(Arc::new(NoContentResolver)),
            engine: RwLock::new(None),
            engine_factory: Arc::new(EngineHandle::create),
            video_lane: Mutex::new(()),
        }
    }

    pub fn with_sampler(mut self, sampler: Arc<dyn FrameSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    /// Use the default decoder with a host-provided resolver for `content://` URIs
    pub fn with_content_resolver(mut self, resolver: Arc<dyn ContentResolver>) -> Self {
        self.sampler = default_frame_sampler(resolver);
        self
    }

    pub fn with_engine_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(LandmarkerOptions) -> PoseResult<EngineHandle> + Send + Sync + 'static,
    {
        self.engine_factory = Arc::new(factory);
        self
    }

    /// Process-wide service built from the settings file
    pub fn global() -> &'static PoseService {
        SERVICE.get_or_init(|| {
            let config = PipelineConfig::load().unwrap_or_else(|e| {
                warn!("Failed to load configuration, using defaults: {}", e);
                PipelineConfig::default()
            });
            PoseService::new(config)
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Stage the model and build the engine. Later calls reuse the live engine.
    pub async fn initialize(&self) -> Result<String, HostError> {
        if self.is_initialized().await {
            return Ok(INITIALIZED_MESSAGE.to_string());
        }

        let mut engine = self.engine.write().await;
        // Another caller may have finished while this one waited
        if engine.as_ref().is_some_and(|e| e.is_ready()) {
            return Ok(INITIALIZED_MESSAGE.to_string());
        }

        let handle = self.build_engine().map_err(HostError::init)?;
        info!("{} ({})", INITIALIZED_MESSAGE, handle.model_info());
        *engine = Some(Arc::new(handle));

        Ok(INITIALIZED_MESSAGE.to_string())
    }

    fn build_engine(&self) -> PoseResult<EngineHandle> {
        self.config
            .validate()
            .map_err(|e| PoseError::InvalidConfig(e.to_string()))?;

        let model_path = self.stager.stage(&self.config.model_asset_name)?;
        (self.engine_factory)(self.config.landmarker_options(model_path))
    }

    pub async fn is_initialized(&self) -> bool {
        self.engine
            .read()
            .await
            .as_ref()
            .is_some_and(|e| e.is_ready())
    }

    pub async fn process_video(&self, uri: &str) -> Result<VideoResult, HostError> {
        self.process_video_with_cancel(uri, CancellationToken::new())
            .await
    }

    pub async fn process_video_with_cancel(
        &self,
        uri: &str,
        cancel: CancellationToken,
    ) -> Result<VideoResult, HostError> {
        // A shutdown during the call closes the engine and fails the call
        let engine = self
            .engine
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or_else(HostError::not_initialized)?;

        let _lane = match engine.running_mode() {
            RunningMode::Video => Some(self.video_lane.lock().await),
            RunningMode::Image => None,
        };

        let pipeline = PosePipeline::new(engine, self.sampler.clone(), &self.config);
        pipeline
            .process_video_with_cancel(uri, cancel)
            .await
            .map_err(|e| {
                warn!("Processing {} failed: {}", uri, e);
                HostError::process(e)
            })
    }

    /// Close and drop the engine; `initialize` builds a fresh one
    pub async fn shutdown(&self) {
        if let Some(engine) = self.engine.write().await.take() {
            engine.close();
            info!("Pose landmarker shut down");
        }
    }
}
