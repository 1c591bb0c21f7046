// Model asset staging
// Copies packaged model files out of the read-only bundle into the writable data directory

use crate::models::pose::{PoseError, PoseResult};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Stages bundle assets into a writable directory
#[derive(Debug, Clone)]
pub struct AssetStager {
    bundle_dir: PathBuf,
    data_dir: PathBuf,
}

impl AssetStager {
    pub fn new(bundle_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            bundle_dir: bundle_dir.into(),
            data_dir: data_dir.into(),
        }
    }

    pub fn bundle_dir(&self) -> &Path {
        &self.bundle_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Destination of an asset, staged or not
    pub fn staged_path(&self, asset_name: &str) -> PathBuf {
        self.data_dir.join(asset_name)
    }

    /// True once a non-empty copy exists in the data directory
    pub fn is_staged(&self, asset_name: &str) -> bool {
        fs::metadata(self.staged_path(asset_name))
            .map(|metadata| metadata.is_file() && metadata.len() > 0)
            .unwrap_or(false)
    }

    /// Copy `asset_name` into the data directory unless it is already there.
    /// Returns the absolute path of the staged file.
    pub fn stage(&self, asset_name: &str) -> PoseResult<PathBuf> {
        validate_asset_name(asset_name)?;
        let destination = self.staged_path(asset_name);

        if self.is_staged(asset_name) {
            debug!("Model asset {} already staged at {:?}", asset_name, destination);
            return absolute(&destination);
        }

        let source = self.bundle_dir.join(asset_name);
        if !source.is_file() {
            return Err(PoseError::AssetMissing(format!(
                "{} not found in {}",
                asset_name,
                self.bundle_dir.display()
            )));
        }

        fs::create_dir_all(&self.data_dir).map_err(|e| {
            PoseError::IoFailed(format!(
                "Failed to create {}: {}",
                self.data_dir.display(),
                e
            ))
        })?;

        let partial = self.data_dir.join(format!(
            ".{}.{}.partial",
            asset_name,
            uuid::Uuid::new_v4()
        ));

        if let Err(e) = copy_then_rename(&source, &partial, &destination) {
            let _ = fs::remove_file(&partial);
            return Err(PoseError::IoFailed(format!(
                "Failed to stage {} into {}: {}",
                asset_name,
                self.data_dir.display(),
                e
            )));
        }

        info!("Staged model asset {} at {:?}", asset_name, destination);
        absolute(&destination)
    }

    /// Remove every staged asset
    pub fn clear(&self) -> PoseResult<()> {
        if self.data_dir.exists() {
            for entry in fs::read_dir(&self.data_dir).map_err(io_failed)? {
                let path = entry.map_err(io_failed)?.path();
                if path.is_file() {
                    fs::remove_file(&path).map_err(io_failed)?;
                }
            }
        }
        Ok(())
    }
}

fn validate_asset_name(asset_name: &str) -> PoseResult<()> {
    let mut components = Path::new(asset_name).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    );

    if asset_name.is_empty() || !single_normal {
        return Err(PoseError::AssetMissing(format!(
            "Invalid asset name: {:?}",
            asset_name
        )));
    }
    Ok(())
}

fn copy_then_rename(source: &Path, partial: &Path, destination: &Path) -> io::Result<()> {
    let mut reader = File::open(source)?;
    let mut writer = File::create(partial)?;
    io::copy(&mut reader, &mut writer)?;
    writer.sync_all()?;
    drop(writer);
    fs::rename(partial, destination)
}

fn absolute(path: &Path) -> PoseResult<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(io_failed)
}

fn io_failed(e: io::Error) -> PoseError {
    PoseError::IoFailed(e.to_string())
}
