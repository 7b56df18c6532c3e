//! Job records as reported by the remote store.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::upload::{UploadEntry, UploadStatus};

/// Unique identifier for a job (one uploaded asset).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Grouping key over which jobs are fetched and reconciled together
/// (a project).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ScopeId(pub String);

impl ScopeId {
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ScopeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ScopeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Raw status strings the backend is known to emit.
pub mod raw_status {
    pub const QUEUED: &str = "queued";
    pub const CONVERTING: &str = "converting";
    pub const ANALYZING: &str = "analyzing";
    pub const PROCESSING: &str = "processing";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
    /// Synthesized for local upload entries, never sent by the backend.
    pub const UPLOADING: &str = "uploading";
    /// Synthesized for finished uploads awaiting their backend record.
    pub const UPLOADED: &str = "uploaded";
}

/// A job record owned by the remote store.
///
/// Read-only to the engine: workers mutate it externally and every
/// reconciliation pass re-reads it in full.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobRecord {
    /// Job identifier
    pub id: JobId,

    /// Owning scope (project)
    pub scope_id: ScopeId,

    /// Human-readable name (original file name)
    pub name: String,

    /// Raw backend status string
    pub status: String,

    /// Set while the asset is being transcoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_converting: Option<bool>,

    /// Error text reported by a worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the backend record was created
    pub created_at: DateTime<Utc>,

    /// When processing completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Position in the processing queue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<i64>,

    /// Overall progress reported by workers (0-100)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,

    /// Free-text description of the current processing step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_step: Option<String>,

    /// Backend hint; absent means the failure may be retried
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl JobRecord {
    /// Create a record with the given raw status and no optional fields.
    pub fn new(
        id: impl Into<JobId>,
        scope_id: impl Into<ScopeId>,
        name: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            scope_id: scope_id.into(),
            name: name.into(),
            status: status.into(),
            is_converting: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
            queue_position: None,
            progress: None,
            processing_step: None,
            retryable: None,
        }
    }

    /// Synthesize a record for an upload that has no backend record yet.
    pub fn from_upload(entry: &UploadEntry, scope_id: &ScopeId) -> Self {
        let status = match entry.status {
            UploadStatus::Uploading => raw_status::UPLOADING,
            UploadStatus::Uploaded => raw_status::UPLOADED,
            UploadStatus::Failed => raw_status::FAILED,
        };

        Self {
            id: entry.id.clone(),
            scope_id: scope_id.clone(),
            name: entry.name.clone(),
            status: status.to_string(),
            is_converting: None,
            error: None,
            created_at: entry.started_at,
            completed_at: None,
            queue_position: None,
            progress: Some(entry.progress),
            processing_step: None,
            retryable: Some(false),
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_converting(mut self, converting: bool) -> Self {
        self.is_converting = Some(converting);
        self
    }

    pub fn with_completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    pub fn with_queue_position(mut self, position: i64) -> Self {
        self.queue_position = Some(position);
        self
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    /// Whether the error text is present and non-blank.
    pub fn has_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.trim().is_empty())
    }

    /// Whether a failure on this record may be retried.
    pub fn is_retryable(&self) -> bool {
        self.retryable.unwrap_or(true)
    }
}
