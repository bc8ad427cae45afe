//! FFprobe video analysis.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::debug;

use vframe_models::VideoMetadata;

use crate::command::CommandRunner;
use crate::error::{MediaError, MediaResult};

/// Default probe timeout (5 minutes).
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(300);

const PROBE_ARGS: [&str; 6] = [
    "-v",
    "quiet",
    "-print_format",
    "json",
    "-show_format",
    "-show_streams",
];

/// Reads duration and frame count from a local video file.
#[async_trait]
pub trait VideoAnalyzer: Send + Sync {
    async fn analyze(&self, path: &Path) -> MediaResult<VideoMetadata>;
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    nb_frames: Option<String>,
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output.
///
/// Duration is mandatory. The frame count comes from the first video
/// stream's `nb_frames` and is 0 when absent or unparsable.
pub fn parse_probe_output(stdout: &[u8]) -> MediaResult<VideoMetadata> {
    let text = String::from_utf8_lossy(stdout);
    if text.trim().is_empty() {
        return Err(MediaError::probe_parse("ffprobe produced no output"));
    }

    let probe: FfprobeOutput = serde_json::from_str(&text)
        .map_err(|e| MediaError::probe_parse(format!("invalid JSON: {}", e)))?;

    let format = probe
        .format
        .ok_or_else(|| MediaError::probe_parse("missing format section"))?;

    let raw_duration = format
        .duration
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .ok_or_else(|| MediaError::probe_parse("missing duration"))?;

    let duration = raw_duration
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite())
        .ok_or_else(|| MediaError::probe_parse(format!("invalid duration: {}", raw_duration)))?;

    let frame_count = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .and_then(|s| s.nb_frames.as_ref())
        .and_then(|n| n.trim().parse::<u64>().ok())
        .unwrap_or(0);

    Ok(VideoMetadata::new(duration, frame_count))
}

/// Analyzer backed by the `ffprobe` binary.
#[derive(Debug, Clone)]
pub struct FfprobeAnalyzer {
    binary: PathBuf,
    timeout: Duration,
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl FfprobeAnalyzer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: DEFAULT_PROBE_TIMEOUT,
            cancel_rx: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Kill in-flight probes when the signal trips.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    fn runner(&self) -> CommandRunner {
        let runner = CommandRunner::new(&self.binary).with_timeout(self.timeout);
        match &self.cancel_rx {
            Some(rx) => runner.with_cancel(rx.clone()),
            None => runner,
        }
    }
}

#[async_trait]
impl VideoAnalyzer for FfprobeAnalyzer {
    async fn analyze(&self, path: &Path) -> MediaResult<VideoMetadata> {
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }

        let mut args: Vec<&OsStr> = PROBE_ARGS.into_iter().map(OsStr::new).collect();
        args.push(path.as_os_str());

        let output = self.runner().run(args).await?;

        let metadata = parse_probe_output(&output.stdout)?;
        debug!(
            "Probed {}: duration={:.3}s frames={}",
            path.display(),
            metadata.duration_seconds,
            metadata.frame_count
        );
        Ok(metadata)
    }
}
