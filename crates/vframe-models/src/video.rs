//! Video metadata produced by the analyzer.

use serde::{Deserialize, Serialize};

/// Duration and frame count of a video.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VideoMetadata {
    /// Duration in seconds
    pub duration_seconds: f64,
    /// Frame count; 0 means unknown
    pub frame_count: u64,
}

impl VideoMetadata {
    pub fn new(duration_seconds: f64, frame_count: u64) -> Self {
        Self {
            duration_seconds: duration_seconds.max(0.0),
            frame_count,
        }
    }
}
