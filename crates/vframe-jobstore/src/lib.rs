//! Durable job state store.
//!
//! Production-grade client with:
//! - Find-by-id and upsert-by-id over a document REST API
//! - HTTP client tuning (pooling, timeouts)
//! - Exponential backoff with jitter
//! - Observability (tracing spans, metrics)

pub mod client;
pub mod document;
pub mod error;
pub mod metrics;
pub mod repo;
pub mod retry;


pub use client::{DocumentStoreClient, DocumentStoreConfig};
pub use document::JobStateDocument;
pub use error::{JobStoreError, JobStoreResult};
pub use repo::{DocumentJobStateRepository, InMemoryJobStateRepository, JobStateRepository};
pub use retry::RetryConfig;
