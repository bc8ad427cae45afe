//! Per-job scratch directory, removed when the guard drops.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use vframe_models::{keys, JobId};

use crate::error::WorkerResult;

const DEFAULT_SOURCE_EXTENSION: &str = "mp4";

/// Local files of one job invocation.
///
/// The directory is derived from the job id, so a copy left behind by an
/// earlier attempt in the same temp folder is found again.
#[derive(Debug)]
pub struct JobWorkspace {
    root: PathBuf,
    zip_name: String,
}

impl JobWorkspace {
    /// Directory used for `job_id` under `temp_folder`.
    pub fn root_for(temp_folder: &Path, job_id: &JobId) -> PathBuf {
        let safe: String = job_id
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        temp_folder.join(format!("vframe-{}", safe))
    }

    /// Create (or reuse) the workspace directories.
    pub async fn create(temp_folder: &Path, job_id: &JobId) -> WorkerResult<Self> {
        let workspace = Self {
            root: Self::root_for(temp_folder, job_id),
            zip_name: keys::zip_file_name(job_id),
        };
        tokio::fs::create_dir_all(workspace.frames_dir()).await?;
        tokio::fs::create_dir_all(workspace.archive_dir()).await?;
        debug!("Created workspace {}", workspace.root.display());
        Ok(workspace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local copy of the source video.
    pub fn source_path(&self, extension: Option<&str>) -> PathBuf {
        let ext = extension
            .filter(|e| !e.is_empty())
            .unwrap_or(DEFAULT_SOURCE_EXTENSION);
        self.root.join(format!("source.{}", ext))
    }

    /// Frames of the block being extracted.
    pub fn frames_dir(&self) -> PathBuf {
        self.root.join("frames")
    }

    /// Frames collected back from storage for the archive.
    pub fn archive_dir(&self) -> PathBuf {
        self.root.join("archive")
    }

    pub fn zip_path(&self) -> PathBuf {
        self.root.join(&self.zip_name)
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => debug!("Removed workspace {}", self.root.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove workspace {}: {}", self.root.display(), e),
        }
    }
}
