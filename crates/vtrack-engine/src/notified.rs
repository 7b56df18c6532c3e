//! Register of jobs whose terminal outcome has already been reported.

use std::collections::HashSet;

use vtrack_models::JobId;

/// Process-lifetime set of notified job IDs.
///
/// Grows monotonically. The only removal path is `forget`, which the retry
/// flow uses so a new terminal outcome can be reported again.
#[derive(Debug, Default)]
pub struct NotifiedSet {
    ids: HashSet<JobId>,
}

impl NotifiedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job. Returns `true` if it was not yet notified.
    pub fn insert(&mut self, id: &JobId) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        self.ids.insert(id.clone())
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.ids.contains(id)
    }

    pub(crate) fn forget(&mut self, id: &JobId) -> bool {
        self.ids.remove(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
