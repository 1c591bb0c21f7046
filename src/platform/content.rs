// Host-mediated access to `content://` videos
// The host owns the mapping from a content identifier to something the decoder can open

use crate::models::pose::{PoseError, PoseResult};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

pub trait ContentResolver: Send + Sync {
    /// Resolve a `content://` URI to a readable path
    fn resolve(&self, uri: &str) -> PoseResult<PathBuf>;
}

/// Used when the host registered no resolver
#[derive(Debug, Default, Clone, Copy)]
pub struct NoContentResolver;

impl ContentResolver for NoContentResolver {
    fn resolve(&self, uri: &str) -> PoseResult<PathBuf> {
        Err(PoseError::OpenFailed(format!(
            "No content resolver registered for {}",
            uri
        )))
    }
}

/// Fixed URI table, for hosts that copy shared media into their own cache first
#[derive(Debug, Default)]
pub struct MappedContentResolver {
    entries: RwLock<HashMap<String, PathBuf>>,
}

impl MappedContentResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, uri: impl Into<String>, path: impl Into<PathBuf>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(uri.into(), path.into());
    }

    pub fn remove(&self, uri: &str) -> Option<PathBuf> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(uri)
    }
}

impl ContentResolver for MappedContentResolver {
    fn resolve(&self, uri: &str) -> PoseResult<PathBuf> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(uri)
            .cloned()
            .ok_or_else(|| PoseError::OpenFailed(format!("Unknown content URI: {}", uri)))
    }
}
