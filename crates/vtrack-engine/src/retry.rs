//! Retry coordination for failed jobs.
//!
//! A retry runs under the pass lock: validate, reopen the notification
//! epoch, drop the job from the failed partition, ask the store to
//! re-enqueue, then run an immediate pass.

use chrono::Utc;
use tracing::Instrument;
use vtrack_models::JobId;

use crate::error::{RetryError, RetryResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::reconciler::{PassTrigger, Reconciler, ScopeState};

impl Reconciler {
    /// Retry one failed job.
    ///
    /// `context` is passed to the store as a free-text annotation.
    pub async fn retry_job(&self, job_id: &JobId, context: Option<&str>) -> RetryResult<()> {
        let mut state = self.state.lock().await;
        self.request_retry(&mut state, job_id, context).await?;
        self.run_pass(&mut state, PassTrigger::Retry, None).await;
        Ok(())
    }

    /// Retry several failed jobs, then run a single pass.
    ///
    /// Results are returned in input order.
    pub async fn retry_failed(
        &self,
        job_ids: &[JobId],
        context: Option<&str>,
    ) -> Vec<(JobId, RetryResult<()>)> {
        let mut state = self.state.lock().await;
        let mut results = Vec::with_capacity(job_ids.len());

        for job_id in job_ids {
            let result = self.request_retry(&mut state, job_id, context).await;
            results.push((job_id.clone(), result));
        }

        if results.iter().any(|(_, result)| result.is_ok()) {
            self.run_pass(&mut state, PassTrigger::Retry, None).await;
        }
        results
    }

    async fn request_retry(
        &self,
        state: &mut ScopeState,
        job_id: &JobId,
        context: Option<&str>,
    ) -> RetryResult<()> {
        let logger = JobLogger::new(self.scope(), job_id);

        let retryable = state
            .remote
            .failed_entry(job_id)
            .is_some_and(|entry| entry.retryable);
        if !retryable {
            logger.log_retry_rejected();
            metrics::record_retry("not_retryable");
            return Err(RetryError::NotRetryable(job_id.clone()));
        }

        let was_notified = state.notified.forget(job_id);
        let taken = state.remote.take_failed(job_id);
        self.publish(state, Utc::now());

        logger.log_retry_requested(context);
        let result = self
            .store
            .request_retry(job_id, context)
            .instrument(logger.create_span())
            .await;

        match result {
            Ok(()) => {
                state.budget.clear(job_id);
                state.retried.insert(job_id.clone());
                metrics::record_retry("ok");
                Ok(())
            }
            Err(source) => {
                logger.log_retry_error(&source.to_string());
                if let Some(entry) = taken {
                    state.remote.restore_failed(entry);
                }
                // Still the same failure; it must not be reported twice
                if was_notified {
                    state.notified.insert(job_id);
                }
                self.publish(state, Utc::now());

                let error = RetryError::Transport {
                    job_id: job_id.clone(),
                    source,
                };
                metrics::record_retry(error.outcome());
                Err(error)
            }
        }
    }
}
