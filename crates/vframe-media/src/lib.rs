//! FFmpeg/FFprobe process wrappers for frame extraction.
//!
//! This crate provides:
//! - A process runner with timeout and cancellation
//! - Type-safe FFmpeg command building
//! - Video analysis via `ffprobe`
//! - Block-wise frame extraction via `ffmpeg`

pub mod command;
pub mod error;
pub mod frames;
pub mod probe;

pub use command::{
    check_ffmpeg, check_ffprobe, resolve_binary, wait_for_cancel, CommandOutput, CommandRunner,
    FfmpegCommand,
};
pub use error::{MediaError, MediaResult};
pub use frames::{
    block_frame_name, block_frame_pattern, block_frame_prefix, list_block_frames, BlockRequest,
    FfmpegFrameExtractor, FrameExtractor, DEFAULT_EXTRACT_TIMEOUT,
};
pub use probe::{parse_probe_output, FfprobeAnalyzer, VideoAnalyzer, DEFAULT_PROBE_TIMEOUT};
