//! Command-line host: runs one video through the service and prints the JSON result

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{info, warn};

use crate::core::config::PipelineConfig;
use crate::core::logging::{init_logging_with, DEFAULT_FILTER};
use crate::models::pose::RunningMode;
use crate::PoseService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Image,
    Video,
}

impl From<ModeArg> for RunningMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Image => RunningMode::Image,
            ModeArg::Video => RunningMode::Video,
        }
    }
}

/// Extract per-frame pose landmarks and preview images from a video
#[derive(Parser, Debug)]
#[command(name = "videopose")]
#[command(version, about = "Extract per-frame pose landmarks and preview images from a video")]
pub struct Cli {
    /// Video path or file:// URI
    pub video: String,

    /// Config file path (defaults to the settings file in the data directory)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Inference running mode
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Sampling interval in milliseconds
    #[arg(long)]
    pub interval_ms: Option<u32>,

    /// Directory holding the packaged model
    #[arg(long)]
    pub assets: Option<PathBuf>,

    /// Writable directory for the staged model
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Worker count in Image mode
    #[arg(long)]
    pub workers: Option<usize>,

    /// Pretty-print the JSON result
    #[arg(long)]
    pub pretty: bool,

    /// Write the result to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Write the resolved configuration back to the settings file
    #[arg(long)]
    pub save_config: bool,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Load the configuration and apply command-line overrides
    pub fn resolve_config(&self) -> PipelineConfig {
        let loaded = match &self.config {
            Some(path) => PipelineConfig::load_from(path),
            None => PipelineConfig::load(),
        };

        let mut config = loaded.unwrap_or_else(|e| {
            warn!("Config error: {}, using default configuration", e);
            PipelineConfig::default()
        });
        self.apply_overrides(&mut config);

        if self.save_config {
            let saved = match &self.config {
                Some(path) => config.save_to(path),
                None => config.save(),
            };
            match saved {
                Ok(()) => info!("Saved configuration"),
                Err(e) => warn!("Failed to save configuration: {}", e),
            }
        }

        config
    }

    pub fn apply_overrides(&self, config: &mut PipelineConfig) {
        if let Some(mode) = self.mode {
            config.running_mode = mode.into();
        }
        if let Some(interval_ms) = self.interval_ms {
            config.sampling_interval_ms = interval_ms;
        }
        if let Some(assets) = &self.assets {
            config.asset_bundle_dir = assets.clone();
        }
        if let Some(data_dir) = &self.data_dir {
            config.data_dir = data_dir.clone();
        }
        if let Some(workers) = self.workers {
            config.max_workers = Some(workers);
        }
    }

    pub async fn execute(self) -> anyhow::Result<ExitCode> {
        let service = PoseService::new(self.resolve_config());

        if let Err(e) = service.initialize().await {
            eprintln!("{}", serde_json::to_string(&e)?);
            return Ok(ExitCode::FAILURE);
        }

        let result = match service.process_video(&self.video).await {
            Ok(result) => result,
            Err(e) => {
                eprintln!("{}", serde_json::to_string(&e)?);
                service.shutdown().await;
                return Ok(ExitCode::FAILURE);
            }
        };
        service.shutdown().await;

        let json = if self.pretty {
            serde_json::to_string_pretty(&result)?
        } else {
            serde_json::to_string(&result)?
        };

        match &self.output {
            Some(path) => {
                std::fs::write(path, json)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!("Wrote {} frames to {}", result.len(), path.display());
            }
            None => println!("{}", json),
        }

        Ok(ExitCode::SUCCESS)
    }
}

/// Parse arguments, set up logging and a runtime, and process one video
pub fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "videopose=debug,videopose_lib=debug"
    } else {
        DEFAULT_FILTER
    };
    init_logging_with(filter);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    runtime.block_on(cli.execute())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_config_values() {
        let cli = Cli::try_parse_from([
            "videopose",
            "/videos/walk.mp4",
            "--mode",
            "image",
            "--interval-ms",
            "100",
            "--workers",
            "3",
            "--data-dir",
            "/tmp/videopose",
        ])
        .unwrap();

        let mut config = PipelineConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(cli.video, "/videos/walk.mp4");
        assert_eq!(config.running_mode, RunningMode::Image);
        assert_eq!(config.sampling_interval_ms, 100);
        assert_eq!(config.max_workers, Some(3));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/videopose"));
        assert_eq!(config.preview_width_px, 480);
    }

    #[test]
    fn test_defaults_leave_config_untouched() {
        let cli = Cli::try_parse_from(["videopose", "clip.mp4"]).unwrap();
        let mut config = PipelineConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config, PipelineConfig::default());
        assert!(!cli.pretty);
        assert!(!cli.save_config);
        assert!(cli.output.is_none());
    }

    #[test]
    fn test_save_config_writes_overrides() {
        let path = std::env::temp_dir()
            .join(format!("videopose_cli_{}", uuid::Uuid::new_v4()))
            .join("settings.json");
        let path_arg = path.to_string_lossy().to_string();

        let cli = Cli::try_parse_from([
            "videopose",
            "clip.mp4",
            "--config",
            path_arg.as_str(),
            "--interval-ms",
            "120",
            "--save-config",
        ])
        .unwrap();
        let resolved = cli.resolve_config();
        assert_eq!(resolved.sampling_interval_ms, 120);

        let reloaded = PipelineConfig::load_from(&path).unwrap();
        assert_eq!(reloaded, resolved);

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_video_argument_is_required() {
        assert!(Cli::try_parse_from(["videopose"]).is_err());
        assert!(Cli::try_parse_from(["videopose", "clip.mp4", "--mode", "stream"]).is_err());
    }
}
