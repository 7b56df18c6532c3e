//! Local register for uploads the remote store has not confirmed yet.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use vtrack_models::{clamp_percent, JobId, UploadEntry, UploadStatus};

/// Ordered set of in-flight uploads, keyed by job ID.
///
/// Entries leave the tracker when the store confirms a record for the same
/// ID, when a finished upload outlives the grace window, or on dismissal.
#[derive(Debug, Default)]
pub struct UploadTracker {
    entries: Vec<UploadEntry>,
}

impl UploadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an upload as `uploading` with zero progress, started at `now`.
    ///
    /// Re-registering an ID replaces the previous entry.
    pub fn begin(&mut self, mut entry: UploadEntry, now: DateTime<Utc>) {
        entry.status = UploadStatus::Uploading;
        entry.progress = 0.0;
        entry.started_at = now;
        entry.finished_at = None;

        match self.position(&entry.id) {
            Some(idx) => self.entries[idx] = entry,
            None => self.entries.push(entry),
        }
    }

    /// Update progress of an active upload. Unknown or finished IDs are ignored.
    pub fn update_progress(&mut self, id: &JobId, pct: f64) -> bool {
        match self.entry_mut(id) {
            Some(entry) if entry.status == UploadStatus::Uploading => {
                entry.progress = clamp_percent(pct);
                true
            }
            _ => false,
        }
    }

    /// Mark an upload finished. It stays visible for the grace window.
    pub fn finish(&mut self, id: &JobId, now: DateTime<Utc>) -> bool {
        match self.entry_mut(id) {
            Some(entry) if entry.status != UploadStatus::Failed => {
                entry.status = UploadStatus::Uploaded;
                entry.progress = 100.0;
                entry.finished_at = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Mark an upload failed. It stays until dismissed.
    pub fn fail(&mut self, id: &JobId, now: DateTime<Utc>) -> bool {
        match self.entry_mut(id) {
            Some(entry) => {
                entry.status = UploadStatus::Failed;
                entry.finished_at = Some(now);
                true
            }
            None => false,
        }
    }

    pub fn dismiss(&mut self, id: &JobId) -> Option<UploadEntry> {
        let idx = self.position(id)?;
        Some(self.entries.remove(idx))
    }

    /// Drop entries whose ID now has a store record.
    pub fn drop_confirmed(&mut self, confirmed: &HashSet<JobId>) -> Vec<JobId> {
        let mut dropped = Vec::new();
        self.entries.retain(|entry| {
            if confirmed.contains(&entry.id) {
                dropped.push(entry.id.clone());
                false
            } else {
                true
            }
        });
        dropped
    }

    /// Drop finished uploads whose grace window has elapsed.
    pub fn prune_expired(&mut self, now: DateTime<Utc>, grace: Duration) -> usize {
        let Ok(grace) = chrono::Duration::from_std(grace) else {
            return 0;
        };
        let before = self.entries.len();
        self.entries.retain(|entry| match (entry.status, entry.finished_at) {
            (UploadStatus::Uploaded, Some(finished)) => finished
                .checked_add_signed(grace)
                .map_or(true, |deadline| now < deadline),
            _ => true,
        });
        before - self.entries.len()
    }

    pub fn get(&self, id: &JobId) -> Option<&UploadEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    pub fn entries(&self) -> &[UploadEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, id: &JobId) -> Option<usize> {
        self.entries.iter().position(|e| &e.id == id)
    }

    fn entry_mut(&mut self, id: &JobId) -> Option<&mut UploadEntry> {
        self.entries.iter_mut().find(|e| &e.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_with(id: &str) -> (UploadTracker, DateTime<Utc>) {
        let now = Utc::now();
        let mut tracker = UploadTracker::new();
        tracker.begin(UploadEntry::new(id, "clip.mp4", 4096), now);
        (tracker, now)
    }

    #[test]
    fn test_begin_normalizes_entry() {
        let now = Utc::now();
        let mut entry = UploadEntry::new("u1", "clip.mp4", 10);
        entry.progress = 55.0;
        entry.status = UploadStatus::Failed;

        let mut tracker = UploadTracker::new();
        tracker.begin(entry, now);

        let entry = tracker.get(&JobId::from("u1")).unwrap();
        assert_eq!(entry.status, UploadStatus::Uploading);
        assert_eq!(entry.progress, 0.0);
        assert_eq!(entry.started_at, now);
    }

    #[test]
    fn test_progress_is_clamped_and_unknown_ignored() {
        let (mut tracker, _) = tracker_with("u1");
        let id = JobId::from("u1");

        assert!(tracker.update_progress(&id, 140.0));
        assert_eq!(tracker.get(&id).unwrap().progress, 100.0);
        assert!(tracker.update_progress(&id, -3.0));
        assert_eq!(tracker.get(&id).unwrap().progress, 0.0);

        assert!(!tracker.update_progress(&JobId::from("ghost"), 10.0));
    }

    #[test]
    fn test_late_progress_after_finish_is_ignored() {
        let (mut tracker, now) = tracker_with("u1");
        let id = JobId::from("u1");

        assert!(tracker.finish(&id, now));
        assert!(!tracker.update_progress(&id, 20.0));
        assert_eq!(tracker.get(&id).unwrap().progress, 100.0);
    }

    #[test]
    fn test_finished_upload_expires_after_grace() {
        let (mut tracker, now) = tracker_with("u1");
        tracker.finish(&JobId::from("u1"), now);

        let grace = Duration::from_secs(2);
        assert_eq!(tracker.prune_expired(now + chrono::Duration::seconds(1), grace), 0);
        assert_eq!(tracker.prune_expired(now + chrono::Duration::seconds(2), grace), 1);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_failed_upload_stays_until_dismissed() {
        let (mut tracker, now) = tracker_with("u1");
        let id = JobId::from("u1");
        tracker.fail(&id, now);

        assert_eq!(tracker.prune_expired(now + chrono::Duration::hours(1), Duration::ZERO), 0);
        assert!(!tracker.finish(&id, now));
        assert!(tracker.dismiss(&id).is_some());
        assert!(tracker.dismiss(&id).is_none());
    }

    #[test]
    fn test_drop_confirmed() {
        let (mut tracker, now) = tracker_with("u1");
        tracker.begin(UploadEntry::new("u2", "b.mp4", 1), now);

        let confirmed: HashSet<JobId> = [JobId::from("u2")].into_iter().collect();
        assert_eq!(tracker.drop_confirmed(&confirmed), vec![JobId::from("u2")]);
        assert_eq!(tracker.len(), 1);
    }
}
