//! S3-compatible blob storage and frame archiving.
//!
//! This crate provides:
//! - The `BlobStore` gateway (get/put/list) with an S3 and an in-memory backend
//! - Bounded-concurrency batch upload and prefix re-materialization
//! - Zip archive creation and upload

pub mod archive;
pub mod blob;
pub mod client;
pub mod error;
pub mod memory;

pub use archive::{Archiver, ZipArchiver};
pub use blob::{content_type_for, download_prefix, upload_files, BlobStore, ObjectInfo};
pub use client::{S3BlobStore, S3Config};
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryBlobStore;
