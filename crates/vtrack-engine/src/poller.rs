//! Timer-driven reconciliation loop for one scope.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use vtrack_models::ScopeId;

use crate::reconciler::{PassTrigger, Reconciler};

/// Drives a [`Reconciler`] on its configured cadence.
///
/// Early passes are requested through [`Reconciler::wake`]. A timer tick
/// that finds a pass in flight waits for it and then runs. Stopping only
/// affects this loop; caller-driven passes on the reconciler keep working.
pub struct ScopePoller {
    reconciler: Arc<Reconciler>,
    stopped: Arc<AtomicBool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ScopePoller {
    /// Spawn the loop on the current runtime.
    pub fn spawn(reconciler: Arc<Reconciler>) -> PollerHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let stopped = Arc::new(AtomicBool::new(false));

        let poller = Self {
            reconciler: reconciler.clone(),
            stopped: stopped.clone(),
            shutdown_rx,
        };
        let task = tokio::spawn(poller.run());

        PollerHandle {
            reconciler,
            stopped,
            shutdown,
            task: Some(task),
        }
    }

    async fn run(mut self) {
        let period = self.reconciler.config().poll_interval;
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            scope = %self.reconciler.scope(),
            interval_ms = period.as_millis() as u64,
            "Scope poller started"
        );

        loop {
            tokio::select! {
                biased;
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = self.reconciler.woken() => {
                    self.pass(PassTrigger::Wake).await;
                    interval.reset();
                }
                _ = interval.tick() => {
                    self.pass(PassTrigger::Timer).await;
                }
            }
        }

        info!(scope = %self.reconciler.scope(), "Scope poller stopped");
    }

    async fn pass(&self, trigger: PassTrigger) {
        let mut state = match self.reconciler.state.try_lock() {
            Ok(state) => state,
            Err(_) => {
                debug!(scope = %self.reconciler.scope(), trigger = trigger.as_str(), "Pass in flight, deferring");
                self.reconciler.state.lock().await
            }
        };
        self.reconciler
            .run_pass(&mut state, trigger, Some(&self.stopped))
            .await;
    }
}

/// Owns a running poller. Dropping the handle stops the loop.
pub struct PollerHandle {
    reconciler: Arc<Reconciler>,
    stopped: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn scope(&self) -> &ScopeId {
        self.reconciler.scope()
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Request an early pass.
    pub fn wake(&self) {
        self.reconciler.wake();
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Signal shutdown. Takes effect before the next scheduled pass; an
    /// in-flight fetch result is discarded.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Stop and wait for the loop to exit.
    pub async fn stopped(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vtrack_models::JobRecord;
    use vtrack_store::InMemoryJobStore;

    use crate::config::ReconcilerConfig;

    fn reconciler(store: Arc<InMemoryJobStore>, interval_ms: u64) -> Arc<Reconciler> {
        let config = ReconcilerConfig::default().with_poll_interval(Duration::from_millis(interval_ms));
        Arc::new(Reconciler::new(ScopeId::from("p1"), store, config).unwrap())
    }

    #[tokio::test]
    async fn test_first_pass_runs_immediately() {
        let store = Arc::new(InMemoryJobStore::new());
        store.upsert(JobRecord::new("v1", "p1", "a.mp4", "analyzing"));
        let reconciler = reconciler(store, 60_000);
        let mut views = reconciler.watch_view();

        let handle = ScopePoller::spawn(reconciler.clone());
        tokio::time::timeout(Duration::from_secs(2), views.changed())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reconciler.view().counts().processing, 1);
        assert!(handle.is_running());
        handle.stopped().await;
    }

    #[tokio::test]
    async fn test_wake_triggers_early_pass() {
        let store = Arc::new(InMemoryJobStore::new());
        let reconciler = reconciler(store.clone(), 60_000);
        let mut views = reconciler.watch_view();

        let handle = ScopePoller::spawn(reconciler.clone());
        tokio::time::timeout(Duration::from_secs(2), views.changed())
            .await
            .unwrap()
            .unwrap();

        store.upsert(JobRecord::new("v1", "p1", "a.mp4", "analyzing"));
        handle.wake();
        tokio::time::timeout(Duration::from_secs(2), views.changed())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reconciler.view().counts().processing, 1);
        assert_eq!(store.fetch_count(), 2);
        handle.stopped().await;
    }

    #[tokio::test]
    async fn test_stop_discards_in_flight_fetch() {
        let store = Arc::new(InMemoryJobStore::new());
        store.upsert(JobRecord::new("v1", "p1", "a.mp4", "analyzing"));
        store.set_fetch_delay(Some(Duration::from_millis(200)));
        let reconciler = reconciler(store.clone(), 60_000);

        let handle = ScopePoller::spawn(reconciler.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.fetch_count(), 1);

        handle.stopped().await;

        assert!(reconciler.view().is_empty());
        assert_eq!(reconciler.stats().ticks, 0);

        // The reconciler itself is still usable
        store.set_fetch_delay(None);
        assert_eq!(reconciler.refresh().await.counts().processing, 1);
    }

    #[tokio::test]
    async fn test_stopping_old_handle_leaves_new_poller_running() {
        let store = Arc::new(InMemoryJobStore::new());
        let reconciler = reconciler(store.clone(), 60_000);
        let mut views = reconciler.watch_view();

        let old = ScopePoller::spawn(reconciler.clone());
        tokio::time::timeout(Duration::from_secs(2), views.changed())
            .await
            .unwrap()
            .unwrap();

        let new = ScopePoller::spawn(reconciler.clone());
        tokio::time::timeout(Duration::from_secs(2), views.changed())
            .await
            .unwrap()
            .unwrap();
        old.stopped().await;
        assert!(!new.is_stopped());

        store.upsert(JobRecord::new("v1", "p1", "a.mp4", "analyzing"));
        new.wake();
        tokio::time::timeout(Duration::from_secs(2), views.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reconciler.view().counts().processing, 1);
        new.stopped().await;
    }

    #[tokio::test]
    async fn test_drop_stops_loop() {
        let store = Arc::new(InMemoryJobStore::new());
        let reconciler = reconciler(store.clone(), 10);

        let handle = ScopePoller::spawn(reconciler.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(handle);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let fetches = store.fetch_count();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.fetch_count(), fetches);
    }
}
