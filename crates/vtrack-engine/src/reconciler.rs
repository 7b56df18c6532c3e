//! Per-scope reconciliation: fetch, classify, partition, notify, publish.
//!
//! A [`Reconciler`] owns everything that belongs to one scope: the notified
//! set, the upload tracker, the timeout budget and the last published view.
//! Passes are serialized by an async mutex held for the whole pass, so a
//! timer tick, a manual refresh and a retry never overlap.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, warn};
use vtrack_models::{
    clamp_percent, classify, CompletedEntry, EntryOrigin, FailedEntry, JobFailure, JobId, JobRecord,
    ProcessingEntry, ProgressSnapshot, ReconciliationView, ScopeId, Stage, UploadEntry,
};
use vtrack_store::{JobStore, StoreError};

use crate::config::ReconcilerConfig;
use crate::error::EngineResult;
use crate::failure_tracker::FailureTracker;
use crate::logging::JobLogger;
use crate::metrics;
use crate::notified::NotifiedSet;
use crate::observer::{FnObserver, JobObserver, ObserverRegistry, Subscription};
use crate::tick_budget::TickBudget;
use crate::upload_tracker::UploadTracker;

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcilerStats {
    /// Passes that ran to the fetch result, successful or not
    pub ticks: u64,
    /// Fetch failures since start
    pub transient_fetch_errors: u64,
    /// Fetch failures since the last successful fetch
    pub consecutive_fetch_errors: u32,
}

/// What started a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PassTrigger {
    /// Scheduled poller tick
    Timer,
    /// Poller woken early by a change signal
    Wake,
    /// Caller-driven [`Reconciler::tick`]
    Manual,
    /// Caller-driven [`Reconciler::refresh`]
    Refresh,
    /// Forced pass after a retry request
    Retry,
}

impl PassTrigger {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            PassTrigger::Timer => "timer",
            PassTrigger::Wake => "wake",
            PassTrigger::Manual => "manual",
            PassTrigger::Refresh => "refresh",
            PassTrigger::Retry => "retry",
        }
    }

    /// Out-of-cadence passes do not age non-terminal jobs.
    fn advances_budget(&self) -> bool {
        matches!(self, PassTrigger::Timer | PassTrigger::Manual)
    }
}

pub(crate) enum Notification {
    Completed(CompletedEntry),
    Failed(FailedEntry),
}

/// Mutable per-scope state, guarded by the pass lock.
pub(crate) struct ScopeState {
    pub(crate) notified: NotifiedSet,
    pub(crate) uploads: UploadTracker,
    /// Partition built from the last successful fetch, without uploads
    pub(crate) remote: ReconciliationView,
    pub(crate) budget: TickBudget,
    pub(crate) retried: HashSet<JobId>,
    last_stage: HashMap<JobId, Stage>,
    fetch_failures: FailureTracker,
}

impl ScopeState {
    fn new(scope: &ScopeId, config: &ReconcilerConfig) -> Self {
        Self {
            notified: NotifiedSet::new(),
            uploads: UploadTracker::new(),
            remote: ReconciliationView::default(),
            budget: TickBudget::new(config.max_ticks),
            retried: HashSet::new(),
            last_stage: HashMap::new(),
            fetch_failures: FailureTracker::new(
                scope.as_str(),
                config.max_logged_fetch_errors,
                config.fetch_error_alert_threshold,
            ),
        }
    }

    /// Classify and partition fetched records, collecting first-time
    /// terminal outcomes.
    fn reconcile(
        &mut self,
        records: Vec<JobRecord>,
        now: DateTime<Utc>,
        advance_budget: bool,
    ) -> (ReconciliationView, Vec<Notification>) {
        let mut remote = ReconciliationView::default();
        let mut notifications = Vec::new();
        let mut seen = HashSet::new();

        for record in records {
            // Newest row wins when the store returns duplicates
            if !seen.insert(record.id.clone()) {
                continue;
            }

            if let Some(pinned) = self.budget.timed_out(&record.id) {
                remote.failed.push(pinned.clone());
                continue;
            }

            let stage = classify(&record);
            self.track_stage(&record.id, stage);

            match stage {
                Stage::Ready => {
                    self.budget.clear(&record.id);
                    let entry = CompletedEntry {
                        completed_at: record.completed_at.unwrap_or(now),
                        record,
                    };
                    if self.notified.insert(&entry.record.id) {
                        notifications.push(Notification::Completed(entry.clone()));
                    }
                    remote.completed.push(entry);
                }
                Stage::Failed => {
                    self.budget.clear(&record.id);
                    let message = record.error.as_deref().unwrap_or_default().trim().to_string();
                    let entry = FailedEntry {
                        error: JobFailure::job_failed(message),
                        retryable: record.is_retryable(),
                        origin: EntryOrigin::Store,
                        record,
                    };
                    if self.notified.insert(&entry.record.id) {
                        notifications.push(Notification::Failed(entry.clone()));
                    }
                    remote.failed.push(entry);
                }
                stage => {
                    if !advance_budget || !self.budget.observe(&record.id) {
                        remote
                            .processing
                            .push(processing_entry(record, stage, EntryOrigin::Store, now));
                        continue;
                    }

                    let entry = FailedEntry {
                        error: JobFailure::timed_out(self.budget.max_ticks().unwrap_or_default()),
                        retryable: true,
                        origin: EntryOrigin::Store,
                        record,
                    };
                    debug!(job_id = %entry.record.id, stage = %stage, "Tick budget exhausted");
                    self.budget.mark_timed_out(entry.clone());
                    if self.notified.insert(&entry.record.id) {
                        notifications.push(Notification::Failed(entry.clone()));
                    }
                    remote.failed.push(entry);
                }
            }
        }

        self.budget.retain_seen(&seen);
        self.last_stage.retain(|id, _| seen.contains(id));
        self.retried.retain(|id| seen.contains(id));

        (remote, notifications)
    }

    fn track_stage(&mut self, id: &JobId, stage: Stage) {
        let after_retry = self.retried.remove(id);
        if let Some(previous) = self.last_stage.insert(id.clone(), stage) {
            if !previous.can_advance_to(stage, after_retry) {
                warn!(job_id = %id, from = %previous, to = %stage, "Stage moved backwards");
            }
        }
    }

    /// Remote partition plus the uploads the store has not confirmed yet.
    fn compose(&mut self, scope: &ScopeId, config: &ReconcilerConfig, now: DateTime<Utc>) -> ReconciliationView {
        self.uploads.prune_expired(now, config.upload_grace);

        let mut view = ReconciliationView {
            built_at: Some(now),
            ..Default::default()
        };

        for upload in self.uploads.entries() {
            if self.remote.contains(&upload.id) {
                continue;
            }
            let record = JobRecord::from_upload(upload, scope);
            match upload.status.synthesized_stage() {
                Some(stage) => view
                    .processing
                    .push(processing_entry(record, stage, EntryOrigin::Upload, now)),
                None => view.failed.push(FailedEntry {
                    record,
                    error: JobFailure::upload_failed(),
                    retryable: false,
                    origin: EntryOrigin::Upload,
                }),
            }
        }

        view.processing.extend(self.remote.processing.iter().cloned());
        view.completed.extend(self.remote.completed.iter().cloned());
        view.failed.extend(self.remote.failed.iter().cloned());
        view
    }
}

fn processing_entry(record: JobRecord, stage: Stage, origin: EntryOrigin, now: DateTime<Utc>) -> ProcessingEntry {
    let progress = record.progress.map(clamp_percent);
    let snapshot = ProgressSnapshot::compute(record.created_at, progress, now);
    ProcessingEntry {
        record,
        stage,
        elapsed_ms: snapshot.elapsed_ms,
        progress,
        remaining_ms: snapshot.remaining_ms,
        origin,
    }
}

/// Reconciliation loop state and operations for one scope.
pub struct Reconciler {
    scope: ScopeId,
    config: ReconcilerConfig,
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) state: Mutex<ScopeState>,
    observers: Arc<ObserverRegistry>,
    view_tx: watch::Sender<Arc<ReconciliationView>>,
    wake: Notify,
    ticks: AtomicU64,
    transient_fetch_errors: AtomicU64,
    consecutive_fetch_errors: AtomicU32,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("scope", &self.scope)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(scope: ScopeId, store: Arc<dyn JobStore>, config: ReconcilerConfig) -> EngineResult<Self> {
        config.validate()?;
        let (view_tx, _) = watch::channel(Arc::new(ReconciliationView::default()));

        Ok(Self {
            state: Mutex::new(ScopeState::new(&scope, &config)),
            scope,
            config,
            store,
            observers: Arc::new(ObserverRegistry::default()),
            view_tx,
            wake: Notify::new(),
            ticks: AtomicU64::new(0),
            transient_fetch_errors: AtomicU64::new(0),
            consecutive_fetch_errors: AtomicU32::new(0),
        })
    }

    pub fn scope(&self) -> &ScopeId {
        &self.scope
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Latest published view.
    pub fn view(&self) -> Arc<ReconciliationView> {
        self.view_tx.borrow().clone()
    }

    /// Receiver that sees every published view.
    pub fn watch_view(&self) -> watch::Receiver<Arc<ReconciliationView>> {
        self.view_tx.subscribe()
    }

    pub fn stats(&self) -> ReconcilerStats {
        ReconcilerStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            transient_fetch_errors: self.transient_fetch_errors.load(Ordering::Relaxed),
            consecutive_fetch_errors: self.consecutive_fetch_errors.load(Ordering::Relaxed),
        }
    }

    /// Attach an observer. Dropping the subscription detaches it.
    pub fn subscribe(&self, observer: Arc<dyn JobObserver>) -> Subscription {
        self.observers.add(observer)
    }

    pub fn subscribe_fn<V, C, F>(&self, on_view: V, on_completed: C, on_failed: F) -> Subscription
    where
        V: Fn(&ReconciliationView) + Send + Sync + 'static,
        C: Fn(&CompletedEntry) + Send + Sync + 'static,
        F: Fn(&FailedEntry) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(FnObserver::new(on_view, on_completed, on_failed)))
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Run one pass, waiting for any in-flight pass to finish first.
    ///
    /// Counts toward the timeout budget like a scheduled tick.
    pub async fn tick(&self) -> Arc<ReconciliationView> {
        let mut state = self.state.lock().await;
        self.run_pass(&mut state, PassTrigger::Manual, None).await
    }

    /// On-demand pass. Runs whether or not the scope is being polled and
    /// does not count toward the timeout budget.
    pub async fn refresh(&self) -> Arc<ReconciliationView> {
        let mut state = self.state.lock().await;
        self.run_pass(&mut state, PassTrigger::Refresh, None).await
    }

    /// Ask the scope's poller for an early pass.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub(crate) async fn woken(&self) {
        self.wake.notified().await
    }

    /// One fetch-classify-notify-publish cycle.
    ///
    /// When `stop` is given and set before the fetch returns, the fetch
    /// result is discarded and the published view is left alone.
    pub(crate) async fn run_pass(
        &self,
        state: &mut ScopeState,
        trigger: PassTrigger,
        stop: Option<&AtomicBool>,
    ) -> Arc<ReconciliationView> {
        let stopped = || stop.is_some_and(|flag| flag.load(Ordering::SeqCst));
        if stopped() {
            return self.view();
        }

        let started = Instant::now();
        let fetched = self.store.fetch_records(&self.scope).await;

        if stopped() {
            debug!(scope = %self.scope, trigger = trigger.as_str(), "Poller stopped during fetch, discarding result");
            return self.view();
        }

        self.ticks.fetch_add(1, Ordering::Relaxed);

        let view = match fetched {
            Ok(records) => {
                self.consecutive_fetch_errors.store(0, Ordering::Relaxed);
                state.fetch_failures.record_success();

                let now = Utc::now();
                let fetched_count = records.len();
                let (remote, notifications) = state.reconcile(records, now, trigger.advances_budget());

                let dropped = state.uploads.drop_confirmed(&remote.job_ids());
                for id in &dropped {
                    debug!(scope = %self.scope, job_id = %id, "Upload handed off to store record");
                }
                state.remote = remote;

                self.dispatch(notifications);
                let view = self.publish(state, now);

                let counts = view.counts();
                debug!(
                    scope = %self.scope,
                    trigger = trigger.as_str(),
                    fetched = fetched_count,
                    processing = counts.processing,
                    completed = counts.completed,
                    failed = counts.failed,
                    "Reconciliation pass complete"
                );
                view
            }
            Err(e) => {
                self.record_fetch_error(state, &e);
                self.view()
            }
        };

        metrics::record_tick(&self.scope, started.elapsed());
        view
    }

    fn record_fetch_error(&self, state: &mut ScopeState, error: &StoreError) {
        self.transient_fetch_errors.fetch_add(1, Ordering::Relaxed);
        let consecutive = self.consecutive_fetch_errors.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_fetch_error(&self.scope);

        if state.fetch_failures.record_failure() {
            warn!(
                scope = %self.scope,
                consecutive,
                "Failed to fetch job records, keeping previous view: {}",
                error
            );
        }
    }

    /// Deliver first-time terminal outcomes.
    fn dispatch(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            match notification {
                Notification::Completed(entry) => {
                    JobLogger::new(&self.scope, &entry.record.id).log_completed(&entry);
                    metrics::record_completed();
                    self.observers.completed(&entry);
                }
                Notification::Failed(entry) => {
                    JobLogger::new(&self.scope, &entry.record.id).log_failed(&entry);
                    metrics::record_failed(entry.error.kind);
                    self.observers.failed(&entry);
                }
            }
        }
    }

    /// Replace the published view and tell observers.
    pub(crate) fn publish(&self, state: &mut ScopeState, now: DateTime<Utc>) -> Arc<ReconciliationView> {
        let view = Arc::new(state.compose(&self.scope, &self.config, now));
        metrics::record_view(&self.scope, view.counts());
        self.view_tx.send_replace(view.clone());
        self.observers.view(&view);
        view
    }

    // =========================================================================
    // Upload surface
    // =========================================================================

    /// Register a local upload. Shows up as `Uploading` immediately.
    pub async fn begin_upload(&self, entry: UploadEntry) {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        state.uploads.begin(entry, now);
        self.publish(&mut state, now);
    }

    /// Returns `false` for unknown or no longer active uploads.
    pub async fn report_upload_progress(&self, id: &JobId, pct: f64) -> bool {
        let mut state = self.state.lock().await;
        if !state.uploads.update_progress(id, pct) {
            return false;
        }
        self.publish(&mut state, Utc::now());
        true
    }

    /// Mark an upload finished. It shows as `Transferring` until the store
    /// record appears or the grace window runs out.
    pub async fn complete_upload(&self, id: &JobId) -> bool {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        if !state.uploads.finish(id, now) {
            return false;
        }
        self.publish(&mut state, now);
        true
    }

    /// Mark an upload failed. It stays in the failed partition until dismissed.
    pub async fn fail_upload(&self, id: &JobId) -> bool {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        if !state.uploads.fail(id, now) {
            return false;
        }
        self.publish(&mut state, now);
        true
    }

    pub async fn dismiss_upload(&self, id: &JobId) -> Option<UploadEntry> {
        let mut state = self.state.lock().await;
        let entry = state.uploads.dismiss(id)?;
        self.publish(&mut state, Utc::now());
        Some(entry)
    }
}
