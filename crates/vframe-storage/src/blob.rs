//! Blob storage gateway and batch helpers.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::future::try_join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};

/// Information about a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object key
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Last modified timestamp (milliseconds since epoch)
    pub last_modified: Option<u64>,
}

impl ObjectInfo {
    /// Last path segment of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// Get/put/list over buckets. The bucket is a per-call argument because the
/// source bucket arrives with each message.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Download one object into a local file, creating parent directories.
    async fn download_file(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<()>;

    /// Upload one local file.
    async fn upload_file(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<()>;

    /// List every object under a prefix.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<ObjectInfo>>;
}

/// Content type sent with uploads, guessed from the extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("zip") => "application/zip",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// Upload `paths` under `prefix` with at most `concurrency` transfers in
/// flight. The first failure fails the batch. Returns the uploaded keys.
pub async fn upload_files<S>(
    store: &S,
    bucket: &str,
    prefix: &str,
    paths: &[PathBuf],
    concurrency: usize,
) -> StorageResult<Vec<String>>
where
    S: BlobStore + ?Sized,
{
    if paths.is_empty() {
        return Ok(Vec::new());
    }

    let prefix = prefix.trim_end_matches('/');
    let sem = Semaphore::new(concurrency.max(1));

    let uploads = paths.iter().map(|path| {
        let sem = &sem;
        async move {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| StorageError::InvalidKey(path.display().to_string()))?;
            let key = format!("{}/{}", prefix, name);

            let _permit = sem
                .acquire()
                .await
                .map_err(|e| StorageError::internal(e.to_string()))?;
            store.upload_file(bucket, &key, path).await?;
            Ok::<_, StorageError>(key)
        }
    });

    let keys = try_join_all(uploads).await?;
    debug!("Uploaded {} files to {}/{}", keys.len(), bucket, prefix);
    Ok(keys)
}

/// Re-materialize every non-empty object under `prefix` into `dest`,
/// flattened by file name. Objects rejected by `filter` are skipped.
/// Returns the number of files written.
pub async fn download_prefix<S, F>(
    store: &S,
    bucket: &str,
    prefix: &str,
    dest: &Path,
    concurrency: usize,
    filter: F,
) -> StorageResult<usize>
where
    S: BlobStore + ?Sized,
    F: Fn(&ObjectInfo) -> bool,
{
    let objects: Vec<ObjectInfo> = store
        .list_objects(bucket, prefix)
        .await?
        .into_iter()
        .filter(|o| o.size > 0 && !o.key.ends_with('/') && filter(o))
        .collect();

    tokio::fs::create_dir_all(dest).await?;

    let sem = Semaphore::new(concurrency.max(1));
    let downloads = objects.iter().map(|object| {
        let sem = &sem;
        async move {
            let _permit = sem
                .acquire()
                .await
                .map_err(|e| StorageError::internal(e.to_string()))?;
            let target = dest.join(object.file_name());
            store.download_file(bucket, &object.key, &target).await
        }
    });

    try_join_all(downloads).await?;
    info!(
        "Downloaded {} objects from {}/{} to {}",
        objects.len(),
        bucket,
        prefix,
        dest.display()
    );
    Ok(objects.len())
}
