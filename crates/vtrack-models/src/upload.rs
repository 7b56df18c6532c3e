//! Local upload entries for jobs the remote store does not know about yet.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::JobId;
use crate::stage::Stage;

/// Local status of a client-side upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    #[default]
    Uploading,
    Uploaded,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Uploading => "uploading",
            UploadStatus::Uploaded => "uploaded",
            UploadStatus::Failed => "failed",
        }
    }

    /// Stage shown for an upload that has no backend record yet.
    ///
    /// Failed uploads have no transient stage; they are surfaced in the
    /// failed partition instead.
    pub fn synthesized_stage(&self) -> Option<Stage> {
        match self {
            UploadStatus::Uploading => Some(Stage::Uploading),
            UploadStatus::Uploaded => Some(Stage::Transferring),
            UploadStatus::Failed => None,
        }
    }
}

/// Ephemeral, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UploadEntry {
    pub id: JobId,
    /// Display name
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Upload progress percentage (0-100)
    pub progress: f64,
    pub status: UploadStatus,
    pub started_at: DateTime<Utc>,
    /// Set when the upload finished; drives the grace-window removal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl UploadEntry {
    /// Create an entry in `uploading` state with zero progress, started now.
    pub fn new(id: impl Into<JobId>, name: impl Into<String>, size: u64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            size,
            progress: 0.0,
            status: UploadStatus::Uploading,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// File extension in lower case, or `"unknown"`.
    pub fn extension(&self) -> String {
        match self.name.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() => ext.to_lowercase(),
            _ => "unknown".to_string(),
        }
    }
}

/// Clamp a reported percentage into `[0, 100]`; NaN becomes 0.
pub fn clamp_percent(pct: f64) -> f64 {
    if pct.is_nan() {
        return 0.0;
    }
    pct.clamp(0.0, 100.0)
}
