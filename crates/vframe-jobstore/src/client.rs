//! Document store REST client.
//!
//! Speaks a minimal data API: `POST {base}/action/findOne` and
//! `POST {base}/action/replaceOne`, each addressing one document by `_id`.

use std::time::{Duration, Instant};

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info_span, Instrument};

use crate::error::{JobStoreError, JobStoreResult};
use crate::metrics::record_request;
use crate::retry::{with_retry, RetryConfig};

/// Document store client configuration.
#[derive(Debug, Clone)]
pub struct DocumentStoreConfig {
    /// Base URL of the data API (scheme optional; `https` is assumed)
    pub host: String,
    /// Basic-auth user
    pub user: String,
    /// Basic-auth password
    pub password: String,
    /// Database name
    pub database: String,
    /// Collection holding job state
    pub collection: String,
    /// Cluster/data source name, for APIs that require one
    pub data_source: Option<String>,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Retry configuration
    pub retry: RetryConfig,
}

impl DocumentStoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> JobStoreResult<Self> {
        let required = |name: &str| -> JobStoreResult<String> {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| JobStoreError::config(format!("{} must be set", name)))
        };

        let timeout_secs: u64 = std::env::var("JOBSTORE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let connect_timeout_secs: u64 = std::env::var("JOBSTORE_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        Ok(Self {
            host: required("JOBSTORE_HOST")?,
            user: required("JOBSTORE_USER")?,
            password: required("JOBSTORE_PASSWORD")?,
            database: required("DATABASE_NAME")?,
            collection: required("COLLECTION_NAME")?,
            data_source: std::env::var("JOBSTORE_DATA_SOURCE")
                .ok()
                .filter(|v| !v.is_empty()),
            timeout: Duration::from_secs(timeout_secs),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            retry: RetryConfig::from_env(),
        })
    }

    /// `{host}/action`, with `https://` added when no scheme is given.
    pub fn action_base_url(&self) -> String {
        let host = self.host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{}/action", host)
        } else {
            format!("https://{}/action", host)
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FindOneRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    data_source: Option<&'a str>,
    database: &'a str,
    collection: &'a str,
    filter: Value,
}

#[derive(Debug, Deserialize)]
struct FindOneResponse {
    #[serde(default)]
    document: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplaceOneRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    data_source: Option<&'a str>,
    database: &'a str,
    collection: &'a str,
    filter: Value,
    replacement: &'a Value,
    upsert: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplaceOneResponse {
    #[serde(default)]
    matched_count: u64,
    #[serde(default)]
    upserted_id: Option<Value>,
}

/// Document store REST client.
#[derive(Clone)]
pub struct DocumentStoreClient {
    http: Client,
    config: DocumentStoreConfig,
    base_url: String,
}

impl DocumentStoreClient {
    /// Create a new client.
    pub fn new(config: DocumentStoreConfig) -> JobStoreResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("vframe-jobstore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(JobStoreError::Network)?;

        let base_url = config.action_base_url();

        Ok(Self {
            http,
            config,
            base_url,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> JobStoreResult<Self> {
        Self::new(DocumentStoreConfig::from_env()?)
    }

    pub fn collection(&self) -> &str {
        &self.config.collection
    }

    fn id_filter(id: &str) -> Value {
        json!({ "_id": id })
    }

    /// Fetch one document by `_id`.
    pub async fn find_one(&self, id: &str) -> JobStoreResult<Option<Value>> {
        let request = FindOneRequest {
            data_source: self.config.data_source.as_deref(),
            database: &self.config.database,
            collection: &self.config.collection,
            filter: Self::id_filter(id),
        };

        let request = &request;
        with_retry(&self.config.retry, "find_one", || {
            self.execute_request("find_one", id, async move {
                let response = self.post_action("findOne", request).await?;
                let body: FindOneResponse = response.json().await.map_err(|e| {
                    JobStoreError::InvalidResponse(format!("findOne response: {}", e))
                })?;
                Ok(body.document)
            })
        })
        .await
    }

    /// Replace the document with `_id`, inserting it when absent.
    pub async fn replace_one(&self, id: &str, document: &Value) -> JobStoreResult<()> {
        let request = ReplaceOneRequest {
            data_source: self.config.data_source.as_deref(),
            database: &self.config.database,
            collection: &self.config.collection,
            filter: Self::id_filter(id),
            replacement: document,
            upsert: true,
        };

        let request = &request;
        with_retry(&self.config.retry, "replace_one", || {
            self.execute_request("replace_one", id, async move {
                let response = self.post_action("replaceOne", request).await?;
                let body: ReplaceOneResponse = response.json().await.map_err(|e| {
                    JobStoreError::InvalidResponse(format!("replaceOne response: {}", e))
                })?;
                debug!(
                    matched = body.matched_count,
                    upserted = body.upserted_id.is_some(),
                    "Replaced document {}",
                    id
                );
                Ok(())
            })
        })
        .await
    }

    async fn post_action<B: Serialize>(
        &self,
        action: &str,
        body: &B,
    ) -> JobStoreResult<reqwest::Response> {
        let url = format!("{}/{}", self.base_url, action);
        let response = self
            .http
            .post(&url)
            .basic_auth(&self.config.user, Some(&self.config.password))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(Self::handle_error_response(status, &url, response).await)
        }
    }

    /// Execute a request with tracing and metrics.
    async fn execute_request<T, F>(&self, operation: &str, doc_id: &str, fut: F) -> JobStoreResult<T>
    where
        F: std::future::Future<Output = JobStoreResult<T>>,
    {
        let span = info_span!(
            "jobstore_request",
            operation = %operation,
            collection = %self.config.collection,
            doc_id = %doc_id
        );

        let start = Instant::now();
        let result = fut.instrument(span).await;
        let latency_ms = start.elapsed().as_millis() as f64;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, latency_ms);

        result
    }

    async fn handle_error_response(
        status: StatusCode,
        url: &str,
        response: reqwest::Response,
    ) -> JobStoreError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return JobStoreError::RateLimited(retry_after_ms);
        }

        let body = response.text().await.unwrap_or_default();
        JobStoreError::from_http_status(status.as_u16(), format!("{} failed: {}", url, body))
    }
}
