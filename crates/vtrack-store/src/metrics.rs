//! Job store metrics.
//!
//! All series are labelled by [`StoreOperation`], so the read path that runs
//! every pass and the rare retry writes can be told apart.

use metrics::{counter, histogram};

use crate::error::StoreError;
use crate::store::StoreOperation;

/// Metric name constants for consistency.
pub mod names {
    /// Total job store requests by operation and status.
    pub const REQUESTS_TOTAL: &str = "store_requests_total";

    /// Backoff retries by operation and error kind.
    pub const RETRIES_TOTAL: &str = "store_retries_total";

    /// Transient failures returned without retrying, by operation and reason.
    pub const GIVE_UPS_TOTAL: &str = "store_give_ups_total";

    /// Request latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "store_latency_seconds";

    /// Rows returned per successful fetch.
    pub const FETCHED_ROWS: &str = "store_fetched_rows";
}

/// Record metrics for a completed request, retries included.
pub fn record_request(operation: StoreOperation, status: u16, latency_ms: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation.as_str(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "operation" => operation.as_str()
    )
    .record(latency_ms / 1000.0);
}

/// Record one backoff retry and the error that caused it.
pub fn record_retry(operation: StoreOperation, error: &StoreError) {
    counter!(
        names::RETRIES_TOTAL,
        "operation" => operation.as_str(),
        "kind" => error.kind()
    )
    .increment(1);
}

/// Record a transient failure handed back to the caller without retrying.
pub fn record_give_up(operation: StoreOperation, reason: &'static str) {
    counter!(
        names::GIVE_UPS_TOTAL,
        "operation" => operation.as_str(),
        "reason" => reason
    )
    .increment(1);
}

pub fn record_fetched_rows(rows: usize) {
    histogram!(names::FETCHED_ROWS).record(rows as f64);
}
