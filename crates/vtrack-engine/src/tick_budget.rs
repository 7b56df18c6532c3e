//! Bounded-poll timeout tracking.

use std::collections::{HashMap, HashSet};

use vtrack_models::{FailedEntry, JobId};

/// Counts passes each job spends non-terminal and remembers the jobs that
/// ran out of budget.
///
/// A timed-out job is pinned to its synthetic failure until a retry clears
/// it; later store records for it are ignored.
#[derive(Debug, Default)]
pub struct TickBudget {
    max_ticks: Option<u32>,
    counts: HashMap<JobId, u32>,
    timed_out: HashMap<JobId, FailedEntry>,
}

impl TickBudget {
    pub fn new(max_ticks: Option<u32>) -> Self {
        Self {
            max_ticks,
            ..Self::default()
        }
    }

    pub fn max_ticks(&self) -> Option<u32> {
        self.max_ticks
    }

    /// Count one non-terminal observation. Returns `true` when this pass
    /// exceeds the budget (pass `max_ticks + 1`).
    pub fn observe(&mut self, id: &JobId) -> bool {
        let Some(max) = self.max_ticks else {
            return false;
        };
        let count = self.counts.entry(id.clone()).or_insert(0);
        *count += 1;
        *count > max
    }

    pub fn ticks(&self, id: &JobId) -> u32 {
        self.counts.get(id).copied().unwrap_or(0)
    }

    /// Pin a job to its timeout failure.
    pub fn mark_timed_out(&mut self, entry: FailedEntry) {
        self.counts.remove(&entry.record.id);
        self.timed_out.insert(entry.record.id.clone(), entry);
    }

    pub fn timed_out(&self, id: &JobId) -> Option<&FailedEntry> {
        self.timed_out.get(id)
    }

    /// Forget a job's counter and timeout pin.
    pub fn clear(&mut self, id: &JobId) {
        self.counts.remove(id);
        self.timed_out.remove(id);
    }

    /// Drop state for jobs that are no longer fetched.
    pub fn retain_seen(&mut self, seen: &HashSet<JobId>) {
        self.counts.retain(|id, _| seen.contains(id));
        self.timed_out.retain(|id, _| seen.contains(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtrack_models::{EntryOrigin, JobFailure, JobRecord};

    fn timed_out_entry(id: &str) -> FailedEntry {
        FailedEntry {
            record: JobRecord::new(id, "p1", "a.mp4", "processing"),
            error: JobFailure::timed_out(2),
            retryable: true,
            origin: EntryOrigin::Store,
        }
    }

    #[test]
    fn test_budget_exceeded_on_pass_n_plus_one() {
        let mut budget = TickBudget::new(Some(2));
        let id = JobId::from("v1");

        assert!(!budget.observe(&id));
        assert!(!budget.observe(&id));
        assert!(budget.observe(&id));
        assert_eq!(budget.ticks(&id), 3);
    }

    #[test]
    fn test_unbounded_never_times_out() {
        let mut budget = TickBudget::new(None);
        let id = JobId::from("v1");
        for _ in 0..1000 {
            assert!(!budget.observe(&id));
        }
        assert_eq!(budget.ticks(&id), 0);
    }

    #[test]
    fn test_pin_and_clear() {
        let mut budget = TickBudget::new(Some(2));
        let id = JobId::from("v1");
        budget.observe(&id);

        budget.mark_timed_out(timed_out_entry("v1"));
        assert!(budget.timed_out(&id).is_some());
        assert_eq!(budget.ticks(&id), 0);

        budget.clear(&id);
        assert!(budget.timed_out(&id).is_none());
    }

    #[test]
    fn test_retain_seen_drops_vanished_jobs() {
        let mut budget = TickBudget::new(Some(5));
        budget.observe(&JobId::from("v1"));
        budget.observe(&JobId::from("v2"));
        budget.mark_timed_out(timed_out_entry("v3"));

        let seen: HashSet<JobId> = [JobId::from("v2")].into_iter().collect();
        budget.retain_seen(&seen);

        assert_eq!(budget.ticks(&JobId::from("v1")), 0);
        assert_eq!(budget.ticks(&JobId::from("v2")), 1);
        assert!(budget.timed_out(&JobId::from("v3")).is_none());
    }
}
