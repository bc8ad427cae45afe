//! Zip archive creation and upload.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::blob::BlobStore;
use crate::error::{StorageError, StorageResult};

/// Packs a directory into a zip and ships it.
#[async_trait]
pub trait Archiver: Send + Sync {
    /// Write every regular file of `source_dir` into `zip_path`. Returns the
    /// number of entries.
    async fn create_zip(&self, source_dir: &Path, zip_path: &Path) -> StorageResult<usize>;

    /// Upload a finished archive.
    async fn upload_zip(&self, bucket: &str, key: &str, zip_path: &Path) -> StorageResult<()>;
}

/// Deflate archiver that uploads through a `BlobStore`.
#[derive(Clone)]
pub struct ZipArchiver {
    store: Arc<dyn BlobStore>,
}

impl ZipArchiver {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Archiver for ZipArchiver {
    async fn create_zip(&self, source_dir: &Path, zip_path: &Path) -> StorageResult<usize> {
        match tokio::fs::remove_file(zip_path).await {
            Ok(()) => debug!("Removed stale archive {}", zip_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(parent) = zip_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(source_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();

        let zip_path_owned = zip_path.to_path_buf();
        let count = tokio::task::spawn_blocking(move || write_zip(&zip_path_owned, &files))
            .await
            .map_err(|e| StorageError::internal(e.to_string()))??;

        info!("Created archive {} with {} entries", zip_path.display(), count);
        Ok(count)
    }

    async fn upload_zip(&self, bucket: &str, key: &str, zip_path: &Path) -> StorageResult<()> {
        self.store.upload_file(bucket, key, zip_path).await
    }
}

fn write_zip(zip_path: &Path, files: &[PathBuf]) -> StorageResult<usize> {
    let file = File::create(zip_path)?;
    let mut zip = zip::ZipWriter::new(BufWriter::new(file));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for path in files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::archive(format!("invalid file name: {}", path.display())))?;
        zip.start_file(name, options)?;
        let mut source = File::open(path)?;
        std::io::copy(&mut source, &mut zip)?;
    }

    let mut writer = zip.finish()?;
    writer.flush()?;
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBlobStore;
    use std::io::Read;

    fn entry_names(zip_path: &Path) -> Vec<String> {
        let file = File::open(zip_path).unwrap();
        let archive = zip::ZipArchive::new(file).unwrap();
        let mut names: Vec<String> = archive.file_names().map(|n| n.to_string()).collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_create_zip_contains_every_frame() {
        let work = tempfile::tempdir().unwrap();
        let frames = work.path().join("frames");
        tokio::fs::create_dir_all(frames.join("nested")).await.unwrap();
        for name in ["block0000_frame0001.jpg", "block0001_frame0001.jpg"] {
            tokio::fs::write(frames.join(name), name.as_bytes()).await.unwrap();
        }
        tokio::fs::write(frames.join("nested/ignored.jpg"), b"x").await.unwrap();

        let archiver = ZipArchiver::new(Arc::new(InMemoryBlobStore::new()));
        let zip_path = work.path().join("vid.zip");
        let count = archiver.create_zip(&frames, &zip_path).await.unwrap();

        assert_eq!(count, 2);
        assert_eq!(
            entry_names(&zip_path),
            vec!["block0000_frame0001.jpg", "block0001_frame0001.jpg"]
        );

        let file = File::open(&zip_path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let mut content = String::new();
        archive
            .by_name("block0001_frame0001.jpg")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "block0001_frame0001.jpg");
    }

    #[tokio::test]
    async fn test_stale_zip_is_replaced() {
        let work = tempfile::tempdir().unwrap();
        let frames = work.path().join("frames");
        tokio::fs::create_dir_all(&frames).await.unwrap();
        tokio::fs::write(frames.join("a.jpg"), b"a").await.unwrap();

        let zip_path = work.path().join("vid.zip");
        tokio::fs::write(&zip_path, b"not a zip").await.unwrap();

        let archiver = ZipArchiver::new(Arc::new(InMemoryBlobStore::new()));
        archiver.create_zip(&frames, &zip_path).await.unwrap();
        assert_eq!(entry_names(&zip_path), vec!["a.jpg"]);
    }

    #[tokio::test]
    async fn test_upload_zip_goes_through_store() {
        let work = tempfile::tempdir().unwrap();
        let zip_path = work.path().join("vid.zip");
        tokio::fs::write(&zip_path, b"zipbytes").await.unwrap();

        let store = Arc::new(InMemoryBlobStore::new());
        let archiver = ZipArchiver::new(store.clone());
        archiver
            .upload_zip("zips", "vid/vid.zip", &zip_path)
            .await
            .unwrap();

        assert_eq!(store.get("zips", "vid/vid.zip").unwrap(), b"zipbytes");
    }
}
