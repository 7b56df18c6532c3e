//! Observer registration and dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;
use vtrack_models::{CompletedEntry, FailedEntry, JobEvent, ReconciliationView};

/// Receives reconciliation output for one scope.
///
/// Callbacks run inside the reconciliation pass and must not block. Terminal
/// callbacks for a pass are delivered before that pass's view.
pub trait JobObserver: Send + Sync {
    fn on_view(&self, view: &ReconciliationView) {
        let _ = view;
    }

    fn on_completed(&self, entry: &CompletedEntry) {
        let _ = entry;
    }

    fn on_failed(&self, entry: &FailedEntry) {
        let _ = entry;
    }
}

type ViewFn = Box<dyn Fn(&ReconciliationView) + Send + Sync>;
type CompletedFn = Box<dyn Fn(&CompletedEntry) + Send + Sync>;
type FailedFn = Box<dyn Fn(&FailedEntry) + Send + Sync>;

/// Observer built from closures.
pub struct FnObserver {
    on_view: ViewFn,
    on_completed: CompletedFn,
    on_failed: FailedFn,
}

impl FnObserver {
    pub fn new<V, C, F>(on_view: V, on_completed: C, on_failed: F) -> Self
    where
        V: Fn(&ReconciliationView) + Send + Sync + 'static,
        C: Fn(&CompletedEntry) + Send + Sync + 'static,
        F: Fn(&FailedEntry) + Send + Sync + 'static,
    {
        Self {
            on_view: Box::new(on_view),
            on_completed: Box::new(on_completed),
            on_failed: Box::new(on_failed),
        }
    }
}

impl std::fmt::Debug for FnObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnObserver").finish_non_exhaustive()
    }
}

impl JobObserver for FnObserver {
    fn on_view(&self, view: &ReconciliationView) {
        (self.on_view)(view)
    }

    fn on_completed(&self, entry: &CompletedEntry) {
        (self.on_completed)(entry)
    }

    fn on_failed(&self, entry: &FailedEntry) {
        (self.on_failed)(entry)
    }
}

/// Forwards terminal events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<JobEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<JobEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl JobObserver for ChannelObserver {
    fn on_completed(&self, entry: &CompletedEntry) {
        let _ = self.tx.send(JobEvent::completed(entry));
    }

    fn on_failed(&self, entry: &FailedEntry) {
        let _ = self.tx.send(JobEvent::failed(entry));
    }
}

/// Observers attached to one reconciler.
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    next_id: AtomicU64,
    observers: Mutex<Vec<(u64, Arc<dyn JobObserver>)>>,
}

impl ObserverRegistry {
    fn lock(&self) -> MutexGuard<'_, Vec<(u64, Arc<dyn JobObserver>)>> {
        self.observers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn add(self: &Arc<Self>, observer: Arc<dyn JobObserver>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, observer));
        Subscription {
            registry: Arc::downgrade(self),
            id,
            on_release: None,
        }
    }

    fn remove(&self, id: u64) {
        self.lock().retain(|(existing, _)| *existing != id);
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    // Callbacks run on a snapshot so an observer may unsubscribe from inside one.
    fn snapshot(&self) -> Vec<Arc<dyn JobObserver>> {
        self.lock().iter().map(|(_, o)| o.clone()).collect()
    }

    pub(crate) fn completed(&self, entry: &CompletedEntry) {
        for observer in self.snapshot() {
            observer.on_completed(entry);
        }
    }

    pub(crate) fn failed(&self, entry: &FailedEntry) {
        for observer in self.snapshot() {
            observer.on_failed(entry);
        }
    }

    pub(crate) fn view(&self, view: &ReconciliationView) {
        for observer in self.snapshot() {
            observer.on_view(view);
        }
    }
}

/// Detaches its observer when dropped.
#[must_use = "dropping a Subscription detaches the observer"]
pub struct Subscription {
    registry: Weak<ObserverRegistry>,
    id: u64,
    on_release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Run `f` after the observer is detached.
    pub(crate) fn on_release<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_release = Some(Box::new(f));
        self
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
        if let Some(release) = self.on_release.take() {
            release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use vtrack_models::{JobFailure, JobRecord};

    fn completed(id: &str) -> CompletedEntry {
        CompletedEntry {
            record: JobRecord::new(id, "p1", "a.mp4", "completed"),
            completed_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_subscription_drop_detaches() {
        let registry = Arc::new(ObserverRegistry::default());
        let views = Arc::new(AtomicUsize::new(0));

        let counter = views.clone();
        let sub = registry.add(Arc::new(FnObserver::new(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            |_| {},
            |_| {},
        )));

        registry.view(&ReconciliationView::default());
        assert_eq!(views.load(Ordering::SeqCst), 1);

        sub.unsubscribe();
        assert_eq!(registry.len(), 0);
        registry.view(&ReconciliationView::default());
        assert_eq!(views.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_hook_runs_once() {
        let registry = Arc::new(ObserverRegistry::default());
        let released = Arc::new(AtomicUsize::new(0));

        let flag = released.clone();
        let sub = registry
            .add(Arc::new(ChannelObserver::new().0))
            .on_release(move || {
                flag.fetch_add(1, Ordering::SeqCst);
            });
        drop(sub);

        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_channel_observer_forwards_events() {
        let registry = Arc::new(ObserverRegistry::default());
        let (observer, mut rx) = ChannelObserver::new();
        let _sub = registry.add(Arc::new(observer));

        registry.completed(&completed("v1"));
        registry.failed(&FailedEntry {
            record: JobRecord::new("v2", "p1", "b.mp4", "failed"),
            error: JobFailure::job_failed("boom"),
            retryable: true,
            origin: Default::default(),
        });

        assert!(matches!(rx.recv().await, Some(JobEvent::Completed { .. })));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id().as_str(), "v2");
    }
}
