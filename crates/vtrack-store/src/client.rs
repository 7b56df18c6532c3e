//! REST job store client (PostgREST-style endpoint).
//!
//! Production-grade client with:
//! - HTTP client tuning (pooling, timeouts)
//! - Exponential backoff with jitter
//! - Observability (tracing spans, metrics)

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use tracing::{debug, info_span, Instrument};
use url::Url;
use vtrack_models::{JobId, JobRecord, ScopeId};

use crate::error::{StoreError, StoreResult};
use crate::metrics::{record_fetched_rows, record_request};
use crate::retry::{with_retry, RetryConfig};
use crate::store::{JobStore, StoreOperation};
use crate::types::{RetryPatch, VideoRow, VIDEO_SELECT};

// =============================================================================
// Configuration
// =============================================================================

/// REST job store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base URL of the store (without `/rest/v1`)
    pub base_url: Url,
    /// API key sent as `apikey` and bearer token
    pub api_key: String,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Retry configuration
    pub retry: RetryConfig,
}

impl StoreConfig {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> StoreResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| StoreError::config(format!("invalid job store URL '{}': {}", base_url, e)))?;

        Ok(Self {
            base_url,
            api_key: api_key.into(),
            timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
        })
    }

    /// Create config from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        let base_url = std::env::var("JOB_STORE_URL")
            .map_err(|_| StoreError::config("JOB_STORE_URL must be set to reach the job store"))?;

        let api_key = std::env::var("JOB_STORE_API_KEY")
            .map_err(|_| StoreError::config("JOB_STORE_API_KEY must be set to reach the job store"))?;

        if api_key.is_empty() {
            return Err(StoreError::config("JOB_STORE_API_KEY cannot be empty"));
        }

        let timeout_secs: u64 = std::env::var("JOB_STORE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(15);

        let connect_timeout_secs: u64 = std::env::var("JOB_STORE_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let mut config = Self::new(&base_url, api_key)?;
        config.timeout = Duration::from_secs(timeout_secs);
        config.connect_timeout = Duration::from_secs(connect_timeout_secs);
        config.retry = RetryConfig::from_env();
        Ok(config)
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

// =============================================================================
// Client
// =============================================================================

/// REST job store client.
#[derive(Clone)]
pub struct RestJobStore {
    http: Client,
    config: StoreConfig,
}

impl std::fmt::Debug for RestJobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestJobStore")
            .field("base_url", &self.config.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl RestJobStore {
    /// Create a new client.
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.api_key)
            .map_err(|_| StoreError::config("API key contains invalid header characters"))?;
        headers.insert("apikey", key);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("vtrack-store/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(StoreError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::new(StoreConfig::from_env()?)
    }

    fn table_url(&self, table: &str) -> StoreResult<Url> {
        self.config
            .base_url
            .join(&format!("rest/v1/{}", table))
            .map_err(|e| StoreError::config(format!("invalid table path '{}': {}", table, e)))
    }

    async fn fetch_once(&self, scope: &ScopeId) -> StoreResult<Vec<JobRecord>> {
        let mut url = self.table_url("videos")?;
        url.query_pairs_mut()
            .append_pair("select", VIDEO_SELECT)
            .append_pair("project_id", &format!("eq.{}", scope))
            .append_pair("order", "created_at.desc");

        let response = self
            .http
            .get(url.clone())
            .bearer_auth(&self.config.api_key)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Self::handle_error_response(status, url.as_str(), response).await);
        }

        let rows: Vec<VideoRow> = response.json().await?;
        debug!(scope = %scope, rows = rows.len(), "Fetched job rows");
        record_fetched_rows(rows.len());
        Ok(rows.into_iter().map(VideoRow::into_record).collect())
    }

    async fn retry_once(&self, job_id: &JobId, context: Option<&str>) -> StoreResult<()> {
        let mut url = self.table_url("video_analysis")?;
        url.query_pairs_mut()
            .append_pair("video_id", &format!("eq.{}", job_id));

        let response = self
            .http
            .patch(url.clone())
            .bearer_auth(&self.config.api_key)
            .header("Prefer", "return=representation")
            .json(&RetryPatch::new(context))
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::OK => {
                let updated: Vec<serde_json::Value> = response.json().await?;
                if updated.is_empty() {
                    Err(StoreError::not_found(format!("video_analysis for {}", job_id)))
                } else {
                    Ok(())
                }
            }
            StatusCode::NO_CONTENT => Ok(()),
            _ => Err(Self::handle_error_response(status, url.as_str(), response).await),
        }
    }

    /// Execute a request with tracing and metrics.
    async fn execute_request<T, F>(&self, operation: StoreOperation, subject: &str, fut: F) -> StoreResult<T>
    where
        F: std::future::Future<Output = StoreResult<T>>,
    {
        let span = info_span!("store_request", operation = %operation, subject);

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

    async fn handle_error_response(status: StatusCode, url: &str, response: reqwest::Response) -> StoreError {
        let retry_after_ms = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|secs| secs * 1000);

        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return StoreError::RateLimited(retry_after_ms.unwrap_or(0));
        }
        StoreError::from_http_status(status.as_u16(), format!("{} failed: {}", url, body))
    }
}

#[async_trait]
impl JobStore for RestJobStore {
    async fn fetch_records(&self, scope: &ScopeId) -> StoreResult<Vec<JobRecord>> {
        let operation = StoreOperation::FetchRecords;
        self.execute_request(
            operation,
            scope.as_str(),
            with_retry(&self.config.retry, operation, scope.as_str(), || self.fetch_once(scope)),
        )
        .await
    }

    async fn request_retry(&self, job_id: &JobId, context: Option<&str>) -> StoreResult<()> {
        let operation = StoreOperation::RequestRetry;
        self.execute_request(
            operation,
            job_id.as_str(),
            with_retry(&self.config.retry, operation, job_id.as_str(), || {
                self.retry_once(job_id, context)
            }),
        )
        .await
    }
}
