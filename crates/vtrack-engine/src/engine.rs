//! Multi-scope registry of reconcilers and their pollers.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures_util::{Stream, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use vtrack_models::{JobId, ReconciliationView, ScopeId};
use vtrack_store::{ChangeFeed, ChangeSignal, JobStore};

use crate::config::ReconcilerConfig;
use crate::error::{EngineResult, RetryError, RetryResult};
use crate::observer::{JobObserver, Subscription};
use crate::poller::{PollerHandle, ScopePoller};
use crate::reconciler::Reconciler;

struct ScopeSlot {
    reconciler: Arc<Reconciler>,
    poller: Option<PollerHandle>,
    subscribers: usize,
}

#[derive(Default)]
struct Registry {
    slots: HashMap<ScopeId, ScopeSlot>,
    overrides: HashMap<ScopeId, ReconcilerConfig>,
    feeds: Vec<JoinHandle<()>>,
}

struct EngineInner {
    store: Arc<dyn JobStore>,
    config: ReconcilerConfig,
    registry: Mutex<Registry>,
    shutdown: watch::Sender<bool>,
}

impl EngineInner {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, scope: &ScopeId) {
        let poller = {
            let mut registry = self.lock();
            let Some(slot) = registry.slots.get_mut(scope) else {
                return;
            };
            slot.subscribers = slot.subscribers.saturating_sub(1);
            if slot.subscribers > 0 {
                return;
            }
            slot.poller.take()
        };

        if let Some(poller) = poller {
            info!(scope = %scope, "Last subscriber left, stopping poller");
            poller.stop();
        }
    }
}

/// Watches many scopes, one reconciler and poller per scope.
///
/// Pollers start with the first subscription to a scope and stop when the
/// last one is dropped. Reconcilers are kept, so the notified set survives
/// a resubscribe.
#[derive(Clone)]
pub struct ReconciliationEngine {
    inner: Arc<EngineInner>,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn JobStore>, config: ReconcilerConfig) -> EngineResult<Self> {
        config.validate()?;
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(EngineInner {
                store,
                config,
                registry: Mutex::new(Registry::default()),
                shutdown,
            }),
        })
    }

    /// Use a dedicated configuration for `scope`.
    ///
    /// Only affects reconcilers created after the call.
    pub fn configure_scope(&self, scope: ScopeId, config: ReconcilerConfig) -> EngineResult<()> {
        config.validate()?;
        self.inner.lock().overrides.insert(scope, config);
        Ok(())
    }

    /// Reconciler for `scope`, created on first use. Does not start polling.
    pub fn reconciler(&self, scope: &ScopeId) -> EngineResult<Arc<Reconciler>> {
        let mut registry = self.inner.lock();
        self.slot(&mut registry, scope).map(|slot| slot.reconciler.clone())
    }

    fn slot<'a>(&self, registry: &'a mut Registry, scope: &ScopeId) -> EngineResult<&'a mut ScopeSlot> {
        match registry.slots.entry(scope.clone()) {
            Entry::Occupied(slot) => Ok(slot.into_mut()),
            Entry::Vacant(vacant) => {
                let config = registry
                    .overrides
                    .get(scope)
                    .cloned()
                    .unwrap_or_else(|| self.inner.config.clone());
                let reconciler = Reconciler::new(scope.clone(), self.inner.store.clone(), config)?;
                debug!(scope = %scope, "Created reconciler");
                Ok(vacant.insert(ScopeSlot {
                    reconciler: Arc::new(reconciler),
                    poller: None,
                    subscribers: 0,
                }))
            }
        }
    }

    /// Attach an observer to `scope`, starting its poller if needed.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe(&self, scope: &ScopeId, observer: Arc<dyn JobObserver>) -> EngineResult<Subscription> {
        let reconciler = {
            let mut registry = self.inner.lock();
            let slot = self.slot(&mut registry, scope)?;
            if slot.poller.is_none() {
                slot.poller = Some(ScopePoller::spawn(slot.reconciler.clone()));
            }
            slot.subscribers += 1;
            slot.reconciler.clone()
        };

        let engine: Weak<EngineInner> = Arc::downgrade(&self.inner);
        let released = scope.clone();
        Ok(reconciler.subscribe(observer).on_release(move || {
            if let Some(engine) = engine.upgrade() {
                engine.release(&released);
            }
        }))
    }

    /// Scopes with a running poller.
    pub fn active_scopes(&self) -> Vec<ScopeId> {
        let registry = self.inner.lock();
        let mut scopes: Vec<ScopeId> = registry
            .slots
            .iter()
            .filter(|(_, slot)| slot.poller.is_some())
            .map(|(scope, _)| scope.clone())
            .collect();
        scopes.sort();
        scopes
    }

    pub fn is_polling(&self, scope: &ScopeId) -> bool {
        self.inner
            .lock()
            .slots
            .get(scope)
            .is_some_and(|slot| slot.poller.is_some())
    }

    pub fn view(&self, scope: &ScopeId) -> Option<Arc<ReconciliationView>> {
        self.existing(scope).map(|r| r.view())
    }

    /// On-demand pass for a known scope.
    pub async fn refresh(&self, scope: &ScopeId) -> Option<Arc<ReconciliationView>> {
        let reconciler = self.existing(scope)?;
        Some(reconciler.refresh().await)
    }

    fn existing(&self, scope: &ScopeId) -> Option<Arc<Reconciler>> {
        self.inner
            .lock()
            .slots
            .get(scope)
            .map(|slot| slot.reconciler.clone())
    }

    fn reconcilers(&self) -> Vec<Arc<Reconciler>> {
        self.inner
            .lock()
            .slots
            .values()
            .map(|slot| slot.reconciler.clone())
            .collect()
    }

    /// Retry a failed job in whichever scope lists it.
    pub async fn retry_job(&self, job_id: &JobId, context: Option<&str>) -> RetryResult<()> {
        let reconcilers = self.reconcilers();

        let owner = reconcilers
            .iter()
            .find(|r| r.view().failed_entry(job_id).is_some())
            .or_else(|| reconcilers.iter().find(|r| r.view().contains(job_id)));

        match owner {
            Some(reconciler) => reconciler.retry_job(job_id, context).await,
            None => Err(RetryError::UnknownJob(job_id.clone())),
        }
    }

    /// Forward change signals for `scope` to its poller as early-pass hints.
    ///
    /// Signals for other scopes are ignored. The forwarding task ends with
    /// the stream or on shutdown.
    pub fn attach_change_feed<S>(&self, scope: &ScopeId, signals: S) -> EngineResult<()>
    where
        S: Stream<Item = ChangeSignal> + Send + 'static,
    {
        let reconciler = self.reconciler(scope)?;
        let mut shutdown_rx = self.inner.shutdown.subscribe();
        let scope = scope.clone();

        let task = tokio::spawn(async move {
            let mut signals = Box::pin(signals);
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    signal = signals.next() => {
                        let Some(signal) = signal else {
                            break;
                        };
                        if signal.scope == scope {
                            debug!(scope = %scope, job_id = ?signal.job_id, "Change signal received");
                            reconciler.wake();
                        }
                    }
                }
            }
            debug!(scope = %scope, "Change feed detached");
        });

        self.inner.lock().feeds.push(task);
        Ok(())
    }

    /// Subscribe to the Redis change feed for `scope`.
    pub async fn attach_redis_feed(&self, scope: &ScopeId, feed: &ChangeFeed) -> EngineResult<()> {
        let signals = feed.subscribe(scope).await?;
        self.attach_change_feed(scope, signals)
    }

    /// Stop every poller and change feed.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);

        let (pollers, feeds) = {
            let mut registry = self.inner.lock();
            let pollers: Vec<PollerHandle> = registry
                .slots
                .values_mut()
                .filter_map(|slot| slot.poller.take())
                .collect();
            (pollers, std::mem::take(&mut registry.feeds))
        };

        for poller in pollers {
            poller.stopped().await;
        }
        for feed in feeds {
            let _ = feed.await;
        }
        info!("Reconciliation engine stopped");
    }
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vtrack_models::JobRecord;
    use vtrack_store::InMemoryJobStore;

    use crate::observer::ChannelObserver;

    fn engine(store: Arc<InMemoryJobStore>) -> ReconciliationEngine {
        let config = ReconcilerConfig::default().with_poll_interval(Duration::from_secs(60));
        ReconciliationEngine::new(store, config).unwrap()
    }

    #[tokio::test]
    async fn test_poller_follows_subscriptions() {
        let store = Arc::new(InMemoryJobStore::new());
        let engine = engine(store);
        let scope = ScopeId::from("p1");

        let first = engine.subscribe(&scope, Arc::new(ChannelObserver::new().0)).unwrap();
        let second = engine.subscribe(&scope, Arc::new(ChannelObserver::new().0)).unwrap();
        assert_eq!(engine.active_scopes(), vec![scope.clone()]);

        drop(first);
        assert!(engine.is_polling(&scope));
        drop(second);
        assert!(!engine.is_polling(&scope));

        // Reconciler survives for a later resubscribe
        assert!(engine.view(&scope).is_some());
        let _again = engine.subscribe(&scope, Arc::new(ChannelObserver::new().0)).unwrap();
        assert!(engine.is_polling(&scope));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_refresh_after_last_unsubscribe_fetches() {
        let store = Arc::new(InMemoryJobStore::new());
        let engine = engine(store.clone());
        let scope = ScopeId::from("p1");

        let sub = engine.subscribe(&scope, Arc::new(ChannelObserver::new().0)).unwrap();
        let mut views = engine.reconciler(&scope).unwrap().watch_view();
        tokio::time::timeout(Duration::from_secs(2), views.changed())
            .await
            .unwrap()
            .unwrap();
        drop(sub);
        assert!(!engine.is_polling(&scope));

        store.upsert(JobRecord::new("v1", "p1", "a.mp4", "failed").with_error("boom"));
        let fetches = store.fetch_count();
        let view = engine.refresh(&scope).await.unwrap();

        assert_eq!(store.fetch_count(), fetches + 1);
        assert!(view.failed_entry(&JobId::from("v1")).is_some());
    }

    #[tokio::test]
    async fn test_retry_after_last_unsubscribe_runs_pass() {
        let store = Arc::new(InMemoryJobStore::new());
        store.upsert(JobRecord::new("v1", "p1", "a.mp4", "failed").with_error("boom"));
        let engine = engine(store.clone());
        let scope = ScopeId::from("p1");

        let sub = engine.subscribe(&scope, Arc::new(ChannelObserver::new().0)).unwrap();
        let mut views = engine.reconciler(&scope).unwrap().watch_view();
        tokio::time::timeout(Duration::from_secs(2), views.changed())
            .await
            .unwrap()
            .unwrap();
        drop(sub);

        let fetches = store.fetch_count();
        engine.retry_job(&JobId::from("v1"), None).await.unwrap();

        assert_eq!(store.fetch_count(), fetches + 1);
        assert_eq!(store.retry_requests().len(), 1);
        let view = engine.view(&scope).unwrap();
        assert_eq!(view.stage_of(&JobId::from("v1")), Some(vtrack_models::Stage::Queued));
    }

    #[tokio::test]
    async fn test_resubscribe_while_old_poller_stops() {
        let store = Arc::new(InMemoryJobStore::new());
        let engine = engine(store.clone());
        let scope = ScopeId::from("p1");

        let first = engine.subscribe(&scope, Arc::new(ChannelObserver::new().0)).unwrap();
        drop(first);
        let _second = engine.subscribe(&scope, Arc::new(ChannelObserver::new().0)).unwrap();
        let reconciler = engine.reconciler(&scope).unwrap();
        let mut views = reconciler.watch_view();

        store.upsert(JobRecord::new("v1", "p1", "a.mp4", "analyzing"));
        reconciler.wake();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                views.changed().await.unwrap();
                if views.borrow().counts().processing == 1 {
                    break;
                }
            }
        })
        .await
        .unwrap();

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_retry_unknown_job() {
        let store = Arc::new(InMemoryJobStore::new());
        let engine = engine(store);

        let err = engine.retry_job(&JobId::from("ghost"), None).await.unwrap_err();
        assert!(matches!(err, RetryError::UnknownJob(_)));
    }

    #[tokio::test]
    async fn test_retry_routes_to_owning_scope() {
        let store = Arc::new(InMemoryJobStore::new());
        store.upsert(JobRecord::new("v1", "p2", "a.mp4", "failed").with_error("boom"));
        store.upsert(JobRecord::new("v2", "p1", "b.mp4", "analyzing"));
        let engine = engine(store.clone());

        engine.reconciler(&ScopeId::from("p1")).unwrap().tick().await;
        engine.reconciler(&ScopeId::from("p2")).unwrap().tick().await;

        engine.retry_job(&JobId::from("v1"), None).await.unwrap();
        assert_eq!(store.retry_requests().len(), 1);

        let err = engine.retry_job(&JobId::from("v2"), None).await.unwrap_err();
        assert!(matches!(err, RetryError::NotRetryable(_)));
    }

    #[tokio::test]
    async fn test_change_feed_wakes_poller() {
        let store = Arc::new(InMemoryJobStore::new());
        let engine = engine(store.clone());
        let scope = ScopeId::from("p1");

        let _sub = engine.subscribe(&scope, Arc::new(ChannelObserver::new().0)).unwrap();
        let mut views = engine.reconciler(&scope).unwrap().watch_view();
        tokio::time::timeout(Duration::from_secs(2), views.changed())
            .await
            .unwrap()
            .unwrap();

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        engine
            .attach_change_feed(&scope, tokio_stream_from(rx))
            .unwrap();

        store.upsert(JobRecord::new("v1", "p1", "a.mp4", "analyzing"));
        tx.send(ChangeSignal::new(scope.clone())).unwrap();
        tokio::time::timeout(Duration::from_secs(2), views.changed())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(engine.view(&scope).unwrap().counts().processing, 1);
        engine.shutdown().await;
    }

    fn tokio_stream_from(
        mut rx: tokio::sync::mpsc::UnboundedReceiver<ChangeSignal>,
    ) -> impl Stream<Item = ChangeSignal> + Send + 'static {
        futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx))
    }
}
