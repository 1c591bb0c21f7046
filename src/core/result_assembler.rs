use crate::models::pose::{FrameResult, VideoResult};
use tracing::debug;

/// Order collected frames by timestamp.
///
/// The sort is stable, so when two frames share a timestamp the one collected
/// first is kept.
pub fn assemble(mut frames: Vec<FrameResult>) -> VideoResult {
    let collected = frames.len();

    frames.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    frames.dedup_by(|later, earlier| later.timestamp == earlier.timestamp);

    if frames.len() < collected {
        debug!(
            "Dropped {} frames with duplicate timestamps",
            collected - frames.len()
        );
    }

    VideoResult::from_sorted(frames)
}
