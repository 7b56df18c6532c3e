//! Reconciliation metrics.

use std::time::Duration;

use metrics::{counter, gauge, histogram};
use vtrack_models::{FailureKind, ScopeId, ViewCounts};

/// Metric names as constants for consistency.
pub mod names {
    pub const TICKS_TOTAL: &str = "vtrack_ticks_total";
    pub const FETCH_ERRORS_TOTAL: &str = "vtrack_fetch_errors_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "vtrack_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vtrack_jobs_failed_total";
    pub const RETRIES_TOTAL: &str = "vtrack_retries_total";
    pub const VIEW_JOBS: &str = "vtrack_view_jobs";
    pub const TICK_DURATION_SECONDS: &str = "vtrack_tick_duration_seconds";
}

/// Record one reconciliation pass.
pub fn record_tick(scope: &ScopeId, duration: Duration) {
    counter!(names::TICKS_TOTAL, "scope" => scope.to_string()).increment(1);
    histogram!(names::TICK_DURATION_SECONDS).record(duration.as_secs_f64());
}

pub fn record_fetch_error(scope: &ScopeId) {
    counter!(names::FETCH_ERRORS_TOTAL, "scope" => scope.to_string()).increment(1);
}

pub fn record_completed() {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
}

pub fn record_failed(kind: FailureKind) {
    counter!(names::JOBS_FAILED_TOTAL, "kind" => kind.as_str()).increment(1);
}

/// Record a retry request outcome (`ok`, `not_retryable`, ...).
pub fn record_retry(outcome: &'static str) {
    counter!(names::RETRIES_TOTAL, "outcome" => outcome).increment(1);
}

/// Publish partition sizes for a scope.
pub fn record_view(scope: &ScopeId, counts: ViewCounts) {
    let partitions = [
        ("processing", counts.processing),
        ("completed", counts.completed),
        ("failed", counts.failed),
    ];
    for (partition, count) in partitions {
        gauge!(
            names::VIEW_JOBS,
            "scope" => scope.to_string(),
            "partition" => partition
        )
        .set(count as f64);
    }
}
