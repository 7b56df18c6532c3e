//! The job store boundary.

use std::sync::Arc;

use async_trait::async_trait;
use vtrack_models::{JobId, JobRecord, ScopeId};

use crate::error::StoreResult;

/// The two calls the engine makes against a job store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    /// Periodic read of a scope's records
    FetchRecords,
    /// Caller-driven re-enqueue of a failed job
    RequestRetry,
}

impl StoreOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreOperation::FetchRecords => "fetch_records",
            StoreOperation::RequestRetry => "request_retry",
        }
    }
}

impl std::fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read/write interface to the authoritative job store.
///
/// The engine treats implementations as a black box: records are re-read in
/// full every pass and the only write is a retry request.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Read current job records for a scope.
    async fn fetch_records(&self, scope: &ScopeId) -> StoreResult<Vec<JobRecord>>;

    /// Ask the backend to re-enqueue processing for a failed job.
    ///
    /// `context` carries optional free-text operator annotations.
    async fn request_retry(&self, job_id: &JobId, context: Option<&str>) -> StoreResult<()>;
}

#[async_trait]
impl<T: JobStore + ?Sized> JobStore for Arc<T> {
    async fn fetch_records(&self, scope: &ScopeId) -> StoreResult<Vec<JobRecord>> {
        (**self).fetch_records(scope).await
    }

    async fn request_retry(&self, job_id: &JobId, context: Option<&str>) -> StoreResult<()> {
        (**self).request_retry(job_id, context).await
    }
}
