//! Structured job logging utilities.
//!
//! Provides consistent, structured logging for job lifecycle events with
//! tracing spans and contextual information.

use tracing::{debug, error, info, warn, Span};
use vtrack_models::{
    format_duration, CompletedEntry, FailedEntry, FailureKind, JobId, ReconciliationView, ScopeId,
};

use crate::observer::JobObserver;

/// Job logger for structured logging with consistent formatting.
///
/// Every line carries the scope and job ID.
#[derive(Debug, Clone)]
pub struct JobLogger {
    scope: String,
    job_id: String,
}

impl JobLogger {
    pub fn new(scope: &ScopeId, job_id: &JobId) -> Self {
        Self {
            scope: scope.to_string(),
            job_id: job_id.to_string(),
        }
    }

    /// Log a completion notification.
    pub fn log_completed(&self, entry: &CompletedEntry) {
        info!(
            scope = %self.scope,
            job_id = %self.job_id,
            stage = "ready",
            "Job completed: {}", entry.record.name
        );
    }

    /// Log a failure notification. Timeouts are logged at warn level.
    pub fn log_failed(&self, entry: &FailedEntry) {
        match entry.error.kind {
            FailureKind::TimedOut => warn!(
                scope = %self.scope,
                job_id = %self.job_id,
                kind = %entry.error.kind,
                "Job timed out: {}", entry.error.message
            ),
            _ => info!(
                scope = %self.scope,
                job_id = %self.job_id,
                kind = %entry.error.kind,
                retryable = entry.retryable,
                "Job failed: {}", entry.error.message
            ),
        }
    }

    pub fn log_retry_requested(&self, context: Option<&str>) {
        info!(
            scope = %self.scope,
            job_id = %self.job_id,
            context = context.unwrap_or(""),
            "Retry requested"
        );
    }

    pub fn log_retry_rejected(&self) {
        debug!(
            scope = %self.scope,
            job_id = %self.job_id,
            "Retry rejected: job is not failed and retryable"
        );
    }

    pub fn log_retry_error(&self, message: &str) {
        error!(
            scope = %self.scope,
            job_id = %self.job_id,
            "Retry request failed: {}", message
        );
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            scope = %self.scope,
            job_id = %self.job_id
        )
    }
}

/// Observer that logs everything it sees for one scope.
#[derive(Debug, Clone)]
pub struct LoggingObserver {
    scope: ScopeId,
}

impl LoggingObserver {
    pub fn new(scope: ScopeId) -> Self {
        Self { scope }
    }
}

impl JobObserver for LoggingObserver {
    fn on_view(&self, view: &ReconciliationView) {
        let counts = view.counts();
        debug!(
            scope = %self.scope,
            processing = counts.processing,
            completed = counts.completed,
            failed = counts.failed,
            "View updated"
        );
        for entry in &view.processing {
            debug!(
                scope = %self.scope,
                job_id = %entry.record.id,
                stage = %entry.stage,
                elapsed = %format_duration(entry.elapsed()),
                remaining = %entry.remaining().map(format_duration).unwrap_or_default(),
                "In progress"
            );
        }
    }

    fn on_completed(&self, entry: &CompletedEntry) {
        JobLogger::new(&self.scope, &entry.record.id).log_completed(entry);
    }

    fn on_failed(&self, entry: &FailedEntry) {
        JobLogger::new(&self.scope, &entry.record.id).log_failed(entry);
    }
}
