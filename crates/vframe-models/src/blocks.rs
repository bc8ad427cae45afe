//! Fixed-size block arithmetic.
//!
//! A video is cut into `ceil(duration / block_size)` contiguous windows of
//! `block_size` seconds; the last window holds the remainder. The count is
//! a pure function of the duration and the configured size, which keeps
//! `current_block` meaningful across invocations.

use serde::{Deserialize, Serialize};

/// Number of blocks for a video. Never returns 0.
pub fn total_blocks_for(duration_seconds: f64, block_size_secs: u32) -> u32 {
    if block_size_secs == 0 {
        return 1;
    }
    let blocks = (duration_seconds / f64::from(block_size_secs)).ceil();
    if !blocks.is_finite() || blocks < 1.0 {
        1
    } else {
        blocks as u32
    }
}

/// Duration of block `index`; zero or negative past the end of the video.
pub fn block_duration(total_duration_seconds: f64, index: u32, block_size_secs: u32) -> f64 {
    let size = f64::from(block_size_secs);
    let start = f64::from(index) * size;
    (total_duration_seconds - start).min(size)
}

/// Time window covered by one block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockWindow {
    /// Zero-based block index
    pub index: u32,
    /// Window start (seconds)
    pub start_seconds: f64,
    /// Window length (seconds)
    pub duration_seconds: f64,
}

impl BlockWindow {
    /// Window of block `index`, or `None` when it would be empty.
    pub fn for_block(index: u32, total_duration_seconds: f64, block_size_secs: u32) -> Option<Self> {
        let duration = block_duration(total_duration_seconds, index, block_size_secs);
        if duration <= 0.0 {
            return None;
        }
        Some(Self {
            index,
            start_seconds: f64::from(index) * f64::from(block_size_secs),
            duration_seconds: duration,
        })
    }

    /// Exclusive end of the window.
    pub fn end_seconds(&self) -> f64 {
        self.start_seconds + self.duration_seconds
    }
}
