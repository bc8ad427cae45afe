//! Block-wise frame extraction.
//!
//! Every block writes into the same output directory, so file names carry the
//! block index: `block{index:04}_frame{n:04}.{ext}`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use vframe_models::BlockWindow;

use crate::command::{CommandRunner, FfmpegCommand};
use crate::error::MediaResult;

/// Default extraction timeout per block (30 minutes).
pub const DEFAULT_EXTRACT_TIMEOUT: Duration = Duration::from_secs(1800);

/// One time-bounded extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockRequest {
    /// Zero-based block index
    pub index: u32,
    /// Seek position in seconds
    pub start_seconds: f64,
    /// Amount of video to read in seconds
    pub duration_seconds: f64,
    /// Frames per second to sample
    pub frame_rate: u32,
    /// Image extension without the dot
    pub extension: String,
}

impl BlockRequest {
    pub fn from_window(window: &BlockWindow, frame_rate: u32, extension: impl Into<String>) -> Self {
        Self {
            index: window.index,
            start_seconds: window.start_seconds,
            duration_seconds: window.duration_seconds,
            frame_rate,
            extension: extension.into(),
        }
    }
}

/// Produces image files for one block of a local video.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    async fn extract_block(
        &self,
        video: &Path,
        output_dir: &Path,
        request: &BlockRequest,
    ) -> MediaResult<()>;
}

/// File name prefix shared by every frame of a block.
pub fn block_frame_prefix(index: u32) -> String {
    format!("block{:04}_", index)
}

/// Image sequence pattern handed to ffmpeg.
pub fn block_frame_pattern(index: u32, extension: &str) -> String {
    format!("{}frame%04d.{}", block_frame_prefix(index), extension)
}

/// Concrete name of frame `n` (1-based, as ffmpeg numbers them).
pub fn block_frame_name(index: u32, n: u32, extension: &str) -> String {
    format!("{}frame{:04}.{}", block_frame_prefix(index), n, extension)
}

/// List the frames a block left in `dir`, sorted by name.
pub async fn list_block_frames(dir: &Path, index: u32, extension: &str) -> MediaResult<Vec<PathBuf>> {
    let prefix = block_frame_prefix(index);
    let mut frames = Vec::new();

    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let matches_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(extension))
            .unwrap_or(false);

        if name.starts_with(&prefix) && matches_ext && entry.file_type().await?.is_file() {
            frames.push(path);
        }
    }

    frames.sort();
    Ok(frames)
}

/// Extractor backed by the `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct FfmpegFrameExtractor {
    binary: PathBuf,
    timeout: Duration,
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl FfmpegFrameExtractor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: DEFAULT_EXTRACT_TIMEOUT,
            cancel_rx: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Kill in-flight extractions when the signal trips.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Build the ffmpeg invocation for a block.
    pub fn command(video: &Path, output_dir: &Path, request: &BlockRequest) -> FfmpegCommand {
        FfmpegCommand::new(
            video,
            output_dir.join(block_frame_pattern(request.index, &request.extension)),
        )
        .seek(request.start_seconds)
        .duration(request.duration_seconds)
        .video_filter(format!("fps={}", request.frame_rate))
    }
}

#[async_trait]
impl FrameExtractor for FfmpegFrameExtractor {
    async fn extract_block(
        &self,
        video: &Path,
        output_dir: &Path,
        request: &BlockRequest,
    ) -> MediaResult<()> {
        tokio::fs::create_dir_all(output_dir).await?;

        let cmd = Self::command(video, output_dir, request);
        debug!(
            "Extracting block {} [{:.3}s, +{:.3}s) at {} fps",
            request.index, request.start_seconds, request.duration_seconds, request.frame_rate
        );

        let mut runner = CommandRunner::new(&self.binary).with_timeout(self.timeout);
        if let Some(ref rx) = self.cancel_rx {
            runner = runner.with_cancel(rx.clone());
        }
        runner.run(cmd.build_args()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(index: u32) -> BlockRequest {
        BlockRequest {
            index,
            start_seconds: 90.0,
            duration_seconds: 5.0,
            frame_rate: 2,
            extension: "jpg".to_string(),
        }
    }

    #[test]
    fn test_frame_names() {
        assert_eq!(block_frame_prefix(3), "block0003_");
        assert_eq!(block_frame_pattern(3, "png"), "block0003_frame%04d.png");
        assert_eq!(block_frame_name(3, 12, "png"), "block0003_frame0012.png");
    }

    #[test]
    fn test_extract_command() {
        let args = FfmpegFrameExtractor::command(
            Path::new("/work/source.mp4"),
            Path::new("/work/frames"),
            &request(3),
        )
        .build_args();

        assert_eq!(
            args,
            vec![
                "-y",
                "-v",
                "error",
                "-ss",
                "90.000",
                "-t",
                "5.000",
                "-i",
                "/work/source.mp4",
                "-vf",
                "fps=2",
                "/work/frames/block0003_frame%04d.jpg",
            ]
        );
    }

    #[test]
    fn test_request_from_window() {
        let window = BlockWindow::for_block(3, 95.0, 30).unwrap();
        assert_eq!(BlockRequest::from_window(&window, 2, "jpg"), request(3));
    }

    #[tokio::test]
    async fn test_list_block_frames_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "block0001_frame0002.jpg",
            "block0001_frame0001.jpg",
            "block0001_frame0003.png",
            "block0002_frame0001.jpg",
            "block0001.txt",
        ] {
            tokio::fs::write(dir.path().join(name), b"x").await.unwrap();
        }

        let frames = list_block_frames(dir.path(), 1, "jpg").await.unwrap();
        let names: Vec<_> = frames
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["block0001_frame0001.jpg", "block0001_frame0002.jpg"]);

        assert!(list_block_frames(dir.path(), 7, "jpg").await.unwrap().is_empty());
    }
}
