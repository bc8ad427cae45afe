//! In-memory blob store used by tests and local runs.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::blob::{BlobStore, ObjectInfo};
use crate::error::{StorageError, StorageResult};

type ObjectMap = BTreeMap<(String, String), Vec<u8>>;

/// Blob store backed by a map of `(bucket, key)` to bytes.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    objects: Mutex<ObjectMap>,
    downloads: AtomicUsize,
    uploads: AtomicUsize,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, ObjectMap>> {
        self.objects
            .lock()
            .map_err(|_| StorageError::internal("blob store lock poisoned"))
    }

    /// Seed an object.
    pub fn insert(&self, bucket: &str, key: &str, data: Vec<u8>) {
        if let Ok(mut objects) = self.lock() {
            objects.insert((bucket.to_string(), key.to_string()), data);
        }
    }

    /// Bytes of an object, if present.
    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.lock()
            .ok()?
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Sorted keys stored in a bucket.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.lock()
            .map(|objects| {
                objects
                    .keys()
                    .filter(|(b, _)| b == bucket)
                    .map(|(_, k)| k.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of `download_file` calls served.
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Number of `upload_file` calls served.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn download_file(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<()> {
        let data = self
            .get(bucket, key)
            .ok_or_else(|| StorageError::not_found(format!("{}/{}", bucket, key)))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, data).await?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upload_file(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<()> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| StorageError::upload_failed(format!("{}: {}", path.display(), e)))?;
        self.lock()?
            .insert((bucket.to_string(), key.to_string()), data);
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        let objects = self.lock()?;
        Ok(objects
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .map(|((_, k), data)| ObjectInfo {
                key: k.clone(),
                size: data.len() as u64,
                last_modified: None,
            })
            .collect())
    }
}
