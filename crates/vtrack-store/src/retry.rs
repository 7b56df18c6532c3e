//! Backoff policy for job store calls.
//!
//! The two operations are retried differently. A fetch runs on every pass,
//! so it gets a short budget and gives up on long `Retry-After` waits: the
//! next pass fetches again anyway and the pass lock should not be held for
//! a server-imposed pause. A retry request is caller-driven and not repeated
//! by the engine, so it gets the full budget and waits out rate limits.

use std::time::Duration;

use rand::Rng;
use tracing::{info_span, warn, Instrument};

use crate::error::{StoreError, StoreResult};
use crate::metrics::{record_give_up, record_retry};
use crate::store::StoreOperation;

/// Backoff configuration for the REST store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Extra attempts for a fetch.
    pub fetch_max_retries: u32,
    /// Extra attempts for a retry request.
    pub retry_request_max_retries: u32,
    /// Base delay for exponential backoff (in milliseconds).
    pub base_delay_ms: u64,
    /// Maximum backoff delay (in milliseconds). A fetch whose `Retry-After`
    /// exceeds it is returned instead of waited on.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            fetch_max_retries: 1,
            retry_request_max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

impl RetryConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            fetch_max_retries: std::env::var("JOB_STORE_FETCH_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.fetch_max_retries),
            retry_request_max_retries: std::env::var("JOB_STORE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.retry_request_max_retries),
            base_delay_ms: std::env::var("JOB_STORE_RETRY_BASE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.base_delay_ms),
            max_delay_ms: std::env::var("JOB_STORE_RETRY_MAX_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_delay_ms),
        }
    }

    /// No retries at all.
    pub fn disabled() -> Self {
        Self {
            fetch_max_retries: 0,
            retry_request_max_retries: 0,
            ..Self::default()
        }
    }

    pub fn max_retries(&self, operation: StoreOperation) -> u32 {
        match operation {
            StoreOperation::FetchRecords => self.fetch_max_retries,
            StoreOperation::RequestRetry => self.retry_request_max_retries,
        }
    }

    /// Delay before the next attempt, or `None` to return the error now.
    fn next_delay(&self, operation: StoreOperation, attempt: u32, error: &StoreError) -> Option<Duration> {
        if let Some(after) = error.retry_after_ms() {
            if operation == StoreOperation::FetchRecords && after > self.max_delay_ms {
                return None;
            }
            return Some(Duration::from_millis(after));
        }
        Some(self.backoff(attempt))
    }

    /// Exponential backoff with full jitter, floored at the base delay.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp_delay = self.base_delay_ms.saturating_mul(2u64.saturating_pow(attempt));
        let capped = exp_delay.min(self.max_delay_ms);

        let jittered = if capped > 0 {
            rand::rng().random_range(0..=capped)
        } else {
            0
        };

        Duration::from_millis(jittered.max(self.base_delay_ms.min(self.max_delay_ms)))
    }
}

/// Run a store call under the operation's backoff policy.
///
/// `subject` is the scope or job the call is about; it is only logged.
/// Non-retryable errors are returned immediately.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation: StoreOperation,
    subject: &str,
    op: F,
) -> StoreResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = StoreResult<T>>,
{
    let max_retries = config.max_retries(operation);
    let mut attempt = 0;

    loop {
        let span = info_span!("store_attempt", operation = %operation, subject, attempt = attempt + 1);
        let error = match op().instrument(span).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => e,
        };

        if attempt >= max_retries {
            record_give_up(operation, "exhausted");
            return Err(error);
        }

        let Some(delay) = config.next_delay(operation, attempt, &error) else {
            warn!(
                operation = %operation,
                subject,
                "Job store asked for a long pause, leaving it to the next pass: {}",
                error
            );
            record_give_up(operation, "retry_after_too_long");
            return Err(error);
        };

        warn!(
            operation = %operation,
            subject,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "Job store call failed, retrying: {}",
            error
        );
        record_retry(operation, &error);
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
