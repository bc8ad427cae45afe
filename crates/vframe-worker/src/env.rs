//! Startup environment validation.

use std::path::{Path, PathBuf};

use tracing::info;

use vframe_media::{check_ffmpeg, check_ffprobe};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

/// Locations of the external tools the worker drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBinaries {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

/// Check that the temp folder exists and both media tools resolve to
/// non-empty files.
pub fn validate_environment(config: &WorkerConfig) -> WorkerResult<ResolvedBinaries> {
    check_temp_folder(&config.temp_folder)?;

    let ffmpeg = check_ffmpeg(config.ffmpeg_path.as_deref())
        .map_err(|e| WorkerError::environment(format!("ffmpeg unavailable: {}", e)))?;
    let ffprobe = check_ffprobe(config.ffprobe_path.as_deref())
        .map_err(|e| WorkerError::environment(format!("ffprobe unavailable: {}", e)))?;

    info!(
        temp_folder = %config.temp_folder.display(),
        ffmpeg = %ffmpeg.display(),
        ffprobe = %ffprobe.display(),
        "Environment validated"
    );

    Ok(ResolvedBinaries { ffmpeg, ffprobe })
}

/// The temp folder must already exist. It is never created here.
pub fn check_temp_folder(path: &Path) -> WorkerResult<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(WorkerError::environment(format!(
            "Temporary folder does not exist: {}",
            path.display()
        )))
    }
}
