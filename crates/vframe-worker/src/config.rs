//! Worker configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use vframe_jobstore::DocumentStoreConfig;
use vframe_media::{DEFAULT_EXTRACT_TIMEOUT, DEFAULT_PROBE_TIMEOUT};
use vframe_queue::QueueConfig;
use vframe_storage::S3Config;

use crate::error::{WorkerError, WorkerResult};

/// Keys whose values never appear in logs.
pub const SENSITIVE_KEYS: &[&str] = &[
    "JOBSTORE_USER",
    "JOBSTORE_PASSWORD",
    "S3_ACCESS_KEY_ID",
    "S3_SECRET_ACCESS_KEY",
];

const MASK: &str = "********";

/// Replace a secret with a fixed mask. Empty values stay visibly empty.
pub fn mask_secret(value: &str) -> &'static str {
    if value.is_empty() {
        "<empty>"
    } else {
        MASK
    }
}

/// Worker configuration.
#[derive(Clone)]
pub struct WorkerConfig {
    /// Bucket receiving extracted frames
    pub frames_bucket: String,
    /// Bucket receiving the final archive
    pub zip_bucket: String,
    /// Stream receiving progress and completion notifications
    pub progress_queue: String,
    /// Root for per-job workspaces
    pub temp_folder: PathBuf,
    /// Frame image extension, without the dot
    pub frame_extension: String,
    /// Frames per second to extract
    pub frame_rate: u32,
    /// Block length in seconds
    pub block_size: u32,
    pub probe_timeout: Duration,
    pub extract_timeout: Duration,
    /// Concurrent frame uploads per block
    pub upload_concurrency: usize,
    /// Concurrent downloads when collecting frames for the archive
    pub download_concurrency: usize,
    /// Explicit ffmpeg location, `PATH` lookup otherwise
    pub ffmpeg_path: Option<String>,
    /// Explicit ffprobe location, `PATH` lookup otherwise
    pub ffprobe_path: Option<String>,
    /// Deadline for a single job
    pub job_timeout: Duration,
    pub s3: S3Config,
    pub jobstore: DocumentStoreConfig,
    pub queue: QueueConfig,
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        let jobstore = DocumentStoreConfig::from_env().map_err(|e| WorkerError::config(e.to_string()))?;

        let frame_extension = optional("FRAME_EXTENSION")
            .unwrap_or_else(|| "jpg".to_string())
            .trim_start_matches('.')
            .to_string();
        if frame_extension.is_empty() {
            return Err(WorkerError::config("FRAME_EXTENSION must not be empty"));
        }

        let frame_rate: u32 = parse_or("FRAME_RATE", 1)?;
        if frame_rate == 0 {
            return Err(WorkerError::config("FRAME_RATE must be greater than zero"));
        }

        let block_size: u32 = parse_or("BLOCK_SIZE", 30)?;
        if block_size == 0 {
            return Err(WorkerError::config("BLOCK_SIZE must be greater than zero"));
        }

        let queue = QueueConfig::from_env();
        if queue.visibility_timeout < Duration::from_secs(2) {
            return Err(WorkerError::config(
                "QUEUE_VISIBILITY_TIMEOUT must be at least 2 seconds",
            ));
        }

        Ok(Self {
            frames_bucket: required("FRAMES_BUCKET_NAME")?,
            zip_bucket: required("ZIP_BUCKET_NAME")?,
            progress_queue: required("PROGRESS_QUEUE")?,
            temp_folder: optional("TEMP_FOLDER")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            frame_extension,
            frame_rate,
            block_size,
            probe_timeout: Duration::from_secs(parse_or(
                "PROBE_TIMEOUT_SECS",
                DEFAULT_PROBE_TIMEOUT.as_secs(),
            )?),
            extract_timeout: Duration::from_secs(parse_or(
                "EXTRACT_TIMEOUT_SECS",
                DEFAULT_EXTRACT_TIMEOUT.as_secs(),
            )?),
            upload_concurrency: parse_or::<usize>("UPLOAD_CONCURRENCY", 16)?.max(1),
            download_concurrency: parse_or::<usize>("DOWNLOAD_CONCURRENCY", 50)?.max(1),
            ffmpeg_path: optional("FFMPEG_PATH"),
            ffprobe_path: optional("FFPROBE_PATH"),
            job_timeout: Duration::from_secs(parse_or("WORKER_JOB_TIMEOUT", 3600)?),
            s3: S3Config {
                endpoint_url: optional("S3_ENDPOINT_URL"),
                access_key_id: required("S3_ACCESS_KEY_ID")?,
                secret_access_key: required("S3_SECRET_ACCESS_KEY")?,
                region: optional("S3_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            },
            jobstore,
            queue,
        })
    }
}

impl fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("frames_bucket", &self.frames_bucket)
            .field("zip_bucket", &self.zip_bucket)
            .field("progress_queue", &self.progress_queue)
            .field("temp_folder", &self.temp_folder)
            .field("frame_extension", &self.frame_extension)
            .field("frame_rate", &self.frame_rate)
            .field("block_size", &self.block_size)
            .field("probe_timeout", &self.probe_timeout)
            .field("extract_timeout", &self.extract_timeout)
            .field("upload_concurrency", &self.upload_concurrency)
            .field("download_concurrency", &self.download_concurrency)
            .field("ffmpeg_path", &self.ffmpeg_path)
            .field("ffprobe_path", &self.ffprobe_path)
            .field("job_timeout", &self.job_timeout)
            .field("s3_endpoint_url", &self.s3.endpoint_url)
            .field("s3_region", &self.s3.region)
            .field("s3_access_key_id", &mask_secret(&self.s3.access_key_id))
            .field("s3_secret_access_key", &mask_secret(&self.s3.secret_access_key))
            .field("jobstore_host", &self.jobstore.host)
            .field("jobstore_user", &mask_secret(&self.jobstore.user))
            .field("jobstore_password", &mask_secret(&self.jobstore.password))
            .field("jobstore_database", &self.jobstore.database)
            .field("jobstore_collection", &self.jobstore.collection)
            .field("queue_stream", &self.queue.stream_name)
            .field("queue_consumer_group", &self.queue.consumer_group)
            .field("queue_dlq_stream", &self.queue.dlq_stream_name)
            .field("queue_max_retries", &self.queue.max_retries)
            .finish()
    }
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &str) -> WorkerResult<String> {
    optional(name).ok_or_else(|| WorkerError::config(format!("{} must be set", name)))
}

fn parse_or<T: FromStr>(name: &str, default: T) -> WorkerResult<T> {
    match optional(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| WorkerError::config(format!("{} has an invalid value: {}", name, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const REQUIRED: &[(&str, &str)] = &[
        ("FRAMES_BUCKET_NAME", "frames"),
        ("ZIP_BUCKET_NAME", "zips"),
        ("PROGRESS_QUEUE", "vframe:progress"),
        ("JOBSTORE_HOST", "data.example.com"),
        ("JOBSTORE_USER", "svc-user"),
        ("JOBSTORE_PASSWORD", "hunter2"),
        ("DATABASE_NAME", "vframe"),
        ("COLLECTION_NAME", "jobs"),
        ("S3_ACCESS_KEY_ID", "AKIAEXAMPLE"),
        ("S3_SECRET_ACCESS_KEY", "secret-key"),
    ];

    const OPTIONAL: &[&str] = &[
        "TEMP_FOLDER",
        "FRAME_EXTENSION",
        "FRAME_RATE",
        "BLOCK_SIZE",
        "PROBE_TIMEOUT_SECS",
        "EXTRACT_TIMEOUT_SECS",
        "UPLOAD_CONCURRENCY",
        "DOWNLOAD_CONCURRENCY",
        "FFMPEG_PATH",
        "FFPROBE_PATH",
        "WORKER_JOB_TIMEOUT",
        "S3_ENDPOINT_URL",
        "S3_REGION",
        "QUEUE_VISIBILITY_TIMEOUT",
    ];

    fn set_required() {
        for (key, value) in REQUIRED {
            std::env::set_var(key, value);
        }
        for key in OPTIONAL {
            std::env::remove_var(key);
        }
    }

    fn clear_all() {
        for (key, _) in REQUIRED {
            std::env::remove_var(key);
        }
        for key in OPTIONAL {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        set_required();

        let config = WorkerConfig::from_env().unwrap();
        assert_eq!(config.frames_bucket, "frames");
        assert_eq!(config.frame_extension, "jpg");
        assert_eq!(config.frame_rate, 1);
        assert_eq!(config.block_size, 30);
        assert_eq!(config.upload_concurrency, 16);
        assert_eq!(config.download_concurrency, 50);
        assert_eq!(config.probe_timeout, Duration::from_secs(300));
        assert_eq!(config.extract_timeout, Duration::from_secs(1800));
        assert_eq!(config.job_timeout, Duration::from_secs(3600));
        assert_eq!(config.s3.region, "us-east-1");
        assert!(config.s3.endpoint_url.is_none());
        assert_eq!(config.temp_folder, std::env::temp_dir());

        clear_all();
    }

    #[test]
    #[serial]
    fn test_missing_required_value() {
        set_required();
        std::env::remove_var("ZIP_BUCKET_NAME");

        let err = WorkerConfig::from_env().unwrap_err();
        assert!(matches!(err, WorkerError::Config(ref m) if m.contains("ZIP_BUCKET_NAME")));

        clear_all();
    }

    #[test]
    #[serial]
    fn test_invalid_numbers_are_rejected() {
        set_required();
        std::env::set_var("BLOCK_SIZE", "thirty");
        assert!(matches!(WorkerConfig::from_env(), Err(WorkerError::Config(_))));

        std::env::set_var("BLOCK_SIZE", "0");
        assert!(matches!(WorkerConfig::from_env(), Err(WorkerError::Config(_))));

        std::env::set_var("BLOCK_SIZE", "10");
        std::env::set_var("FRAME_RATE", "0");
        assert!(matches!(WorkerConfig::from_env(), Err(WorkerError::Config(_))));

        clear_all();
    }

    #[test]
    #[serial]
    fn test_visibility_timeout_floor() {
        set_required();
        std::env::set_var("QUEUE_VISIBILITY_TIMEOUT", "1");
        let err = WorkerConfig::from_env().unwrap_err();
        assert!(matches!(err, WorkerError::Config(ref m) if m.contains("QUEUE_VISIBILITY_TIMEOUT")));

        std::env::set_var("QUEUE_VISIBILITY_TIMEOUT", "60");
        let config = WorkerConfig::from_env().unwrap();
        assert_eq!(config.queue.visibility_timeout, Duration::from_secs(60));

        clear_all();
    }

    #[test]
    #[serial]
    fn test_extension_dot_is_stripped() {
        set_required();
        std::env::set_var("FRAME_EXTENSION", ".png");

        let config = WorkerConfig::from_env().unwrap();
        assert_eq!(config.frame_extension, "png");

        clear_all();
    }

    #[test]
    #[serial]
    fn test_debug_masks_secrets() {
        set_required();

        let config = WorkerConfig::from_env().unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("svc-user"));
        assert!(!rendered.contains("AKIAEXAMPLE"));
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("data.example.com"));

        clear_all();
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("abc"), MASK);
        assert_eq!(mask_secret(""), "<empty>");
        assert!(SENSITIVE_KEYS.contains(&"JOBSTORE_PASSWORD"));
    }
}
