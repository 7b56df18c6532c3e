//! The partitioned view published after every reconciliation pass.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobRecord};
use crate::stage::Stage;

/// Where a view entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrigin {
    /// Fetched from the remote store
    #[default]
    Store,
    /// Local upload with no backend record yet
    Upload,
}

/// A job still moving through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProcessingEntry {
    pub record: JobRecord,
    pub stage: Stage,
    /// Time since the job started, in milliseconds
    pub elapsed_ms: u64,
    /// Progress percentage when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// Heuristic remaining time in milliseconds; never authoritative
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_ms: Option<u64>,
    #[serde(default)]
    pub origin: EntryOrigin,
}

impl ProcessingEntry {
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.remaining_ms.map(Duration::from_millis)
    }
}

/// A job that reached `Ready`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CompletedEntry {
    pub record: JobRecord,
    pub completed_at: DateTime<Utc>,
}

/// Why a job ended up in the failed partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The backend reported an error on the job
    JobFailed,
    /// The job stayed non-terminal past the tick budget
    TimedOut,
    /// The local upload failed before any backend record existed
    UploadFailed,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::JobFailed => "job_failed",
            FailureKind::TimedOut => "timed_out",
            FailureKind::UploadFailed => "upload_failed",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure description carried in the view and in `Failed` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn job_failed(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::JobFailed,
            message: message.into(),
        }
    }

    pub fn timed_out(ticks: u32) -> Self {
        Self {
            kind: FailureKind::TimedOut,
            message: format!("Processing took too long (no terminal state after {} polls)", ticks),
        }
    }

    pub fn upload_failed() -> Self {
        Self {
            kind: FailureKind::UploadFailed,
            message: "Upload failed".to_string(),
        }
    }
}

/// A job in the failed partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FailedEntry {
    pub record: JobRecord,
    pub error: JobFailure,
    pub retryable: bool,
    #[serde(default)]
    pub origin: EntryOrigin,
}

/// One-shot terminal event delivered to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Completed {
        record: JobRecord,
        completed_at: DateTime<Utc>,
    },
    Failed {
        record: JobRecord,
        failure: JobFailure,
    },
}

impl JobEvent {
    pub fn completed(entry: &CompletedEntry) -> Self {
        JobEvent::Completed {
            record: entry.record.clone(),
            completed_at: entry.completed_at,
        }
    }

    pub fn failed(entry: &FailedEntry) -> Self {
        JobEvent::Failed {
            record: entry.record.clone(),
            failure: entry.error.clone(),
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            JobEvent::Completed { record, .. } | JobEvent::Failed { record, .. } => &record.id,
        }
    }
}

/// Three disjoint partitions, rebuilt on every pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReconciliationView {
    pub processing: Vec<ProcessingEntry>,
    pub completed: Vec<CompletedEntry>,
    pub failed: Vec<FailedEntry>,
    /// When the view was built
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built_at: Option<DateTime<Utc>>,
}

/// Partition sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ViewCounts {
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl ReconciliationView {
    pub fn is_empty(&self) -> bool {
        self.processing.is_empty() && self.completed.is_empty() && self.failed.is_empty()
    }

    pub fn counts(&self) -> ViewCounts {
        ViewCounts {
            processing: self.processing.len(),
            completed: self.completed.len(),
            failed: self.failed.len(),
        }
    }

    pub fn processing_entry(&self, id: &JobId) -> Option<&ProcessingEntry> {
        self.processing.iter().find(|e| &e.record.id == id)
    }

    pub fn completed_entry(&self, id: &JobId) -> Option<&CompletedEntry> {
        self.completed.iter().find(|e| &e.record.id == id)
    }

    pub fn failed_entry(&self, id: &JobId) -> Option<&FailedEntry> {
        self.failed.iter().find(|e| &e.record.id == id)
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.processing_entry(id).is_some()
            || self.completed_entry(id).is_some()
            || self.failed_entry(id).is_some()
    }

    /// Stage of a job as of this view.
    pub fn stage_of(&self, id: &JobId) -> Option<Stage> {
        if let Some(entry) = self.processing_entry(id) {
            return Some(entry.stage);
        }
        if self.completed_entry(id).is_some() {
            return Some(Stage::Ready);
        }
        self.failed_entry(id).map(|_| Stage::Failed)
    }

    /// Remove a job from the failed partition.
    pub fn take_failed(&mut self, id: &JobId) -> Option<FailedEntry> {
        let idx = self.failed.iter().position(|e| &e.record.id == id)?;
        Some(self.failed.remove(idx))
    }

    /// Put a failed entry back (no-op if the job is already present anywhere).
    pub fn restore_failed(&mut self, entry: FailedEntry) {
        if !self.contains(&entry.record.id) {
            self.failed.push(entry);
        }
    }

    /// All job IDs across the three partitions.
    pub fn job_ids(&self) -> HashSet<JobId> {
        self.processing
            .iter()
            .map(|e| e.record.id.clone())
            .chain(self.completed.iter().map(|e| e.record.id.clone()))
            .chain(self.failed.iter().map(|e| e.record.id.clone()))
            .collect()
    }

    /// Check that no job appears in more than one partition (or twice in one).
    pub fn is_disjoint(&self) -> bool {
        let total = self.processing.len() + self.completed.len() + self.failed.len();
        self.job_ids().len() == total
    }
}
