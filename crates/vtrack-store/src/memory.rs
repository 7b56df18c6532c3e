//! In-memory job store for local runs and tests.
//!
//! Records live in a map keyed by job ID. Failures and latency can be
//! injected to exercise the engine's error paths.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use vtrack_models::{raw_status, JobId, JobRecord, ScopeId};

use crate::error::{StoreError, StoreResult};
use crate::store::JobStore;

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<JobId, JobRecord>,
    failing_fetches: u32,
    failing_retries: u32,
    fetch_delay: Option<Duration>,
    fetch_count: u64,
    retry_requests: Vec<(JobId, Option<String>)>,
}

/// Thread-safe in-memory [`JobStore`].
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    inner: Mutex<Inner>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or replace a record.
    pub fn upsert(&self, record: JobRecord) {
        self.lock().records.insert(record.id.clone(), record);
    }

    /// Mutate an existing record in place. Returns false if unknown.
    pub fn update<F>(&self, id: &JobId, f: F) -> bool
    where
        F: FnOnce(&mut JobRecord),
    {
        match self.lock().records.get_mut(id) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &JobId) -> Option<JobRecord> {
        self.lock().records.remove(id)
    }

    pub fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.lock().records.get(id).cloned()
    }

    /// Make the next `n` fetches fail with a transient error.
    pub fn fail_next_fetches(&self, n: u32) {
        self.lock().failing_fetches = n;
    }

    /// Make the next `n` retry requests fail with a transient error.
    pub fn fail_next_retries(&self, n: u32) {
        self.lock().failing_retries = n;
    }

    /// Delay every fetch by `delay` (simulates a slow backend).
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        self.lock().fetch_delay = delay;
    }

    /// Number of fetch calls observed, including failed ones.
    pub fn fetch_count(&self) -> u64 {
        self.lock().fetch_count
    }

    /// Retry requests received so far, in order.
    pub fn retry_requests(&self) -> Vec<(JobId, Option<String>)> {
        self.lock().retry_requests.clone()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn fetch_records(&self, scope: &ScopeId) -> StoreResult<Vec<JobRecord>> {
        let delay = {
            let mut inner = self.lock();
            inner.fetch_count += 1;
            inner.fetch_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        if inner.failing_fetches > 0 {
            inner.failing_fetches -= 1;
            return Err(StoreError::unavailable("injected fetch failure"));
        }

        let mut records: Vec<JobRecord> = inner
            .records
            .values()
            .filter(|r| &r.scope_id == scope)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn request_retry(&self, job_id: &JobId, context: Option<&str>) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.failing_retries > 0 {
            inner.failing_retries -= 1;
            return Err(StoreError::unavailable("injected retry failure"));
        }

        let scope = match inner.records.get(job_id) {
            Some(record) => record.scope_id.clone(),
            None => return Err(StoreError::not_found(format!("job {}", job_id))),
        };

        let next_position = inner
            .records
            .values()
            .filter(|r| r.scope_id == scope && r.status == raw_status::QUEUED)
            .filter_map(|r| r.queue_position)
            .max()
            .unwrap_or(0)
            + 1;

        if let Some(record) = inner.records.get_mut(job_id) {
            record.status = raw_status::QUEUED.to_string();
            record.error = None;
            record.completed_at = None;
            record.is_converting = Some(false);
            record.queue_position = Some(next_position);
        }

        inner
            .retry_requests
            .push((job_id.clone(), context.map(str::to_string)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtrack_models::{classify, Stage};

    #[tokio::test]
    async fn test_fetch_filters_by_scope() {
        let store = InMemoryJobStore::new();
        store.upsert(JobRecord::new("v1", "p1", "a.mp4", "analyzing"));
        store.upsert(JobRecord::new("v2", "p2", "b.mp4", "analyzing"));

        let records = store.fetch_records(&ScopeId::from("p1")).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id.as_str(), "v1");
        assert_eq!(store.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_injected_fetch_failures() {
        let store = InMemoryJobStore::new();
        store.fail_next_fetches(1);

        let scope = ScopeId::from("p1");
        assert!(store.fetch_records(&scope).await.is_err());
        assert!(store.fetch_records(&scope).await.is_ok());
        assert_eq!(store.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_retry_resets_record_to_queued() {
        let store = InMemoryJobStore::new();
        store.upsert(JobRecord::new("v1", "p1", "a.mp4", "failed").with_error("decode failure"));

        store
            .request_retry(&JobId::from("v1"), Some("operator note"))
            .await
            .unwrap();

        let record = store.get(&JobId::from("v1")).unwrap();
        assert_eq!(classify(&record), Stage::Queued);
        assert_eq!(
            store.retry_requests(),
            vec![(JobId::from("v1"), Some("operator note".to_string()))]
        );
    }

    #[test]
    fn test_fetch_orders_newest_first() {
        let store = InMemoryJobStore::new();
        let older = chrono::Utc::now() - chrono::Duration::seconds(30);
        store.upsert(JobRecord::new("v1", "p1", "a.mp4", "analyzing").with_created_at(older));
        store.upsert(JobRecord::new("v2", "p1", "b.mp4", "analyzing"));

        let records = tokio_test::block_on(store.fetch_records(&ScopeId::from("p1"))).unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["v2", "v1"]);
    }

    #[tokio::test]
    async fn test_retry_unknown_job() {
        let store = InMemoryJobStore::new();
        let err = store.request_retry(&JobId::from("ghost"), None).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_injected_retry_failure_leaves_record_untouched() {
        let store = InMemoryJobStore::new();
        store.upsert(JobRecord::new("v1", "p1", "a.mp4", "failed").with_error("boom"));
        store.fail_next_retries(1);

        assert!(store.request_retry(&JobId::from("v1"), None).await.is_err());
        assert_eq!(classify(&store.get(&JobId::from("v1")).unwrap()), Stage::Failed);
        assert!(store.retry_requests().is_empty());
    }
}
