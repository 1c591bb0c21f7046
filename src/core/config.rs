use crate::models::pose::{LandmarkerOptions, RunningMode};
use crate::platform;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// File name of the model inside the asset bundle
    pub model_asset_name: String,
    /// Read-only directory the model ships in
    pub asset_bundle_dir: PathBuf,
    /// Writable directory the model is staged into
    pub data_dir: PathBuf,
    /// `Image` (stateless) or `Video` (tracked)
    pub running_mode: RunningMode,
    /// Maximum poses per frame
    pub num_poses: u32,
    pub min_detection_confidence: f32,
    pub min_presence_confidence: f32,
    pub min_tracking_confidence: f32,
    /// Gap between sampled timestamps (66ms is roughly 15 fps)
    pub sampling_interval_ms: u32,
    /// Width of the working copy handed to the model
    pub inference_width_px: u32,
    /// Width of the preview JPEG
    pub preview_width_px: u32,
    /// Nominal preview height for 16:9 sources; the real height follows the aspect ratio
    pub preview_height_px: u32,
    /// JPEG quality (1-100)
    pub preview_quality: u8,
    /// Ceiling for one processVideo call
    pub drain_timeout_ms: u64,
    /// Worker count in Image mode; None means available parallelism
    pub max_workers: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_asset_name: "pose_landmarker_lite.onnx".to_string(),
            asset_bundle_dir: platform::default_asset_directory(),
            data_dir: platform::default_data_directory(),
            running_mode: RunningMode::Video,
            num_poses: 1,
            min_detection_confidence: 0.5,
            min_presence_confidence: 0.5,
            min_tracking_confidence: 0.5,
            sampling_interval_ms: 66,
            inference_width_px: 256,
            preview_width_px: 480,
            preview_height_px: 270,
            preview_quality: 80,
            drain_timeout_ms: 60 * 60 * 1000, // 1 hour
            max_workers: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from the default location, creating it with defaults if it doesn't exist
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: PipelineConfig = serde_json::from_str(&contents)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> ConfigResult<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> ConfigResult<()> {
        if self.model_asset_name.trim().is_empty() {
            return Err(ConfigError::Invalid("Model asset name cannot be empty".to_string()));
        }

        if self.num_poses == 0 {
            return Err(ConfigError::Invalid("numPoses must be at least 1".to_string()));
        }

        let thresholds = [
            ("minDetectionConfidence", self.min_detection_confidence),
            ("minPresenceConfidence", self.min_presence_confidence),
            ("minTrackingConfidence", self.min_tracking_confidence),
        ];
        for (name, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "Invalid {}: {}. Must be between 0.0 and 1.0",
                    name, value
                )));
            }
        }

        if self.sampling_interval_ms == 0 {
            return Err(ConfigError::Invalid("samplingIntervalMs must be greater than 0".to_string()));
        }

        if self.inference_width_px < 32 || self.inference_width_px > 4096 {
            return Err(ConfigError::Invalid(format!(
                "Invalid inferenceWidthPx: {}. Must be between 32 and 4096",
                self.inference_width_px
            )));
        }

        if self.preview_width_px < 16 || self.preview_width_px > 4096 {
            return Err(ConfigError::Invalid(format!(
                "Invalid previewWidthPx: {}. Must be between 16 and 4096",
                self.preview_width_px
            )));
        }

        if self.preview_height_px == 0 {
            return Err(ConfigError::Invalid("previewHeightPx must be greater than 0".to_string()));
        }

        if self.preview_quality == 0 || self.preview_quality > 100 {
            return Err(ConfigError::Invalid(format!(
                "Invalid previewQuality: {}. Must be between 1 and 100",
                self.preview_quality
            )));
        }

        if self.drain_timeout_ms == 0 {
            return Err(ConfigError::Invalid("drainTimeoutMs must be greater than 0".to_string()));
        }

        if self.max_workers == Some(0) {
            return Err(ConfigError::Invalid("maxWorkers must be at least 1 when set".to_string()));
        }

        Ok(())
    }

    /// `<data dir>/config/settings.json`
    pub fn config_path() -> PathBuf {
        platform::default_data_directory()
            .join("config")
            .join("settings.json")
    }

    /// Engine options for a staged model
    pub fn landmarker_options(&self, model_path: PathBuf) -> LandmarkerOptions {
        LandmarkerOptions {
            model_path,
            running_mode: self.running_mode,
            num_poses: self.num_poses,
            min_detection_confidence: self.min_detection_confidence,
            min_presence_confidence: self.min_presence_confidence,
            min_tracking_confidence: self.min_tracking_confidence,
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}
