// Frame sampling abstraction
// A sampler opens a video once per processVideo call; the source then serves frames by timestamp

use crate::models::capture::{FrameSample, VideoUri};
use crate::models::pose::{PoseError, PoseResult};
use crate::platform::ContentResolver;
use std::path::PathBuf;
use std::sync::Arc;

/// An opened video
pub trait VideoSource: Send + Sync {
    /// Length of the video in milliseconds; stable once opened
    fn duration_ms(&self) -> PoseResult<i64>;

    /// Nearest decodable frame at or before `timestamp_ms`, or None when there is none
    fn frame_at(&self, timestamp_ms: i64) -> PoseResult<Option<FrameSample>>;

    /// Release decoder resources. Safe to call more than once.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

pub trait FrameSampler: Send + Sync {
    fn open(&self, uri: &VideoUri) -> PoseResult<Box<dyn VideoSource>>;
}

/// Turn a parsed URI into a local path, asking the host for `content://` URIs
pub fn resolve_path(uri: &VideoUri, resolver: &dyn ContentResolver) -> PoseResult<PathBuf> {
    let path = match uri {
        VideoUri::File(path) => path.clone(),
        VideoUri::Content(content_uri) => resolver.resolve(content_uri)?,
    };

    if !path.is_file() {
        return Err(PoseError::OpenFailed(format!(
            "{} does not exist or is not a file",
            path.display()
        )));
    }

    Ok(path)
}

/// Sampling timestamps `0, Δ, 2Δ, ...` strictly below `duration_ms`
pub fn plan_schedule(duration_ms: i64, interval_ms: i64) -> Vec<i64> {
    if duration_ms <= 0 || interval_ms <= 0 {
        return Vec::new();
    }
    (0..duration_ms).step_by(interval_ms as usize).collect()
}

/// Closes the source when dropped, so every exit path releases the decoder
pub struct SourceGuard(Arc<dyn VideoSource>);

impl SourceGuard {
    pub fn new(source: Arc<dyn VideoSource>) -> Self {
        Self(source)
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Sampler used when no decoder backend is compiled in
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedFrameSampler;

impl FrameSampler for UnsupportedFrameSampler {
    fn open(&self, uri: &VideoUri) -> PoseResult<Box<dyn VideoSource>> {
        Err(PoseError::OpenFailed(format!(
            "Cannot decode {}: built without the 'ffmpeg' feature",
            uri
        )))
    }
}

/// The decoder backend for this build
#[cfg(feature = "ffmpeg")]
pub fn default_frame_sampler(resolver: Arc<dyn ContentResolver>) -> Arc<dyn FrameSampler> {
    Arc::new(crate::core::ffmpeg_decoder::FfmpegFrameSampler::new(resolver))
}

/// The decoder backend for this build
#[cfg(not(feature = "ffmpeg"))]
pub fn default_frame_sampler(_resolver: Arc<dyn ContentResolver>) -> Arc<dyn FrameSampler> {
    tracing::warn!("Built without the 'ffmpeg' feature; videos cannot be decoded");
    Arc::new(UnsupportedFrameSampler)
}
