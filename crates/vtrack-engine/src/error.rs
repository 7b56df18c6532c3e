//! Engine error types.

use thiserror::Error;
use vtrack_models::JobId;
use vtrack_store::StoreError;

pub type EngineResult<T> = Result<T, EngineError>;

pub type RetryResult<T> = Result<T, RetryError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Errors returned by retry requests.
#[derive(Debug, Error)]
pub enum RetryError {
    /// The job is not currently failed, or its failure is marked non-retryable.
    /// Nothing was changed.
    #[error("Job {0} is not in a failed, retryable state")]
    NotRetryable(JobId),

    /// The retry request did not reach the backend. The job is back in the
    /// failed partition.
    #[error("Retry request for job {job_id} failed: {source}")]
    Transport {
        job_id: JobId,
        #[source]
        source: StoreError,
    },

    /// No watched scope knows the job.
    #[error("Job {0} is not tracked by any scope")]
    UnknownJob(JobId),
}

impl RetryError {
    pub fn job_id(&self) -> &JobId {
        match self {
            RetryError::NotRetryable(id) | RetryError::UnknownJob(id) => id,
            RetryError::Transport { job_id, .. } => job_id,
        }
    }

    /// Metrics label for the outcome.
    pub fn outcome(&self) -> &'static str {
        match self {
            RetryError::NotRetryable(_) => "not_retryable",
            RetryError::Transport { .. } => "transport_error",
            RetryError::UnknownJob(_) => "unknown_job",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_error_accessors() {
        let err = RetryError::Transport {
            job_id: JobId::from("v1"),
            source: StoreError::unavailable("down"),
        };
        assert_eq!(err.job_id().as_str(), "v1");
        assert_eq!(err.outcome(), "transport_error");
        assert!(err.to_string().contains("v1"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_engine_error_from_store() {
        let err: EngineError = StoreError::config("missing url").into();
        assert!(matches!(err, EngineError::Store(StoreError::Config(_))));
    }
}
