//! Shared data models for the vtrack reconciliation engine.
//!
//! This crate provides Serde-serializable types for:
//! - Job records as read from the remote store
//! - The normalized `Stage` lifecycle and its classifier
//! - Local upload entries
//! - Reconciliation views and terminal events
//! - Progress and remaining-time heuristics

pub mod job;
pub mod progress;
pub mod stage;
pub mod upload;
pub mod view;

// Re-export common types
pub use job::{raw_status, JobId, JobRecord, ScopeId};
pub use progress::{estimate_remaining, format_duration, format_file_size, ProgressSnapshot};
pub use stage::{classify, Stage};
pub use upload::{clamp_percent, UploadEntry, UploadStatus};
pub use view::{
    CompletedEntry, EntryOrigin, FailedEntry, FailureKind, JobEvent, JobFailure, ProcessingEntry,
    ReconciliationView, ViewCounts,
};
