//! Normalized job lifecycle stages and the classifier that derives them.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::{raw_status, JobRecord};

/// Normalized lifecycle position of a job.
///
/// Declared in lifecycle order; `ordinal()` exposes that order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Bytes are still leaving the client
    Uploading,
    /// Client upload finished
    Uploaded,
    /// Handing the file off to the backend
    Transferring,
    /// Backend received the file
    TransferComplete,
    /// Waiting for a worker
    Queued,
    /// Transcoding
    Converting,
    /// AI analysis
    Analyzing,
    /// Terminal success
    Ready,
    /// Terminal failure
    Failed,
}

impl Stage {
    /// All stages in lifecycle order.
    pub const ALL: [Stage; 9] = [
        Stage::Uploading,
        Stage::Uploaded,
        Stage::Transferring,
        Stage::TransferComplete,
        Stage::Queued,
        Stage::Converting,
        Stage::Analyzing,
        Stage::Ready,
        Stage::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Uploading => "uploading",
            Stage::Uploaded => "uploaded",
            Stage::Transferring => "transferring",
            Stage::TransferComplete => "transfer_complete",
            Stage::Queued => "queued",
            Stage::Converting => "converting",
            Stage::Analyzing => "analyzing",
            Stage::Ready => "ready",
            Stage::Failed => "failed",
        }
    }

    /// Check if this is a terminal stage (no further transitions without a retry).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Ready | Stage::Failed)
    }

    /// Position in the lifecycle sequence.
    pub fn ordinal(&self) -> u8 {
        *self as u8
    }

    /// Check whether moving from `self` to `next` respects the lifecycle order.
    ///
    /// `Failed` is absorbing and reachable from anywhere. The only backwards
    /// move allowed is a retry reset to `Queued`, which callers signal with
    /// `after_retry`.
    pub fn can_advance_to(&self, next: Stage, after_retry: bool) -> bool {
        if next == Stage::Failed {
            return true;
        }
        if *self == Stage::Failed {
            return after_retry && next.ordinal() >= Stage::Queued.ordinal();
        }
        if after_retry && next.ordinal() >= Stage::Queued.ordinal() {
            return true;
        }
        next.ordinal() >= self.ordinal()
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Map a raw job record to exactly one [`Stage`].
///
/// Pure and total. Failure and completion are checked before any transient
/// signal because a record can keep stale transient flags after reaching a
/// terminal state. Unknown transient statuses land in `Converting`.
pub fn classify(record: &JobRecord) -> Stage {
    if record.has_error() {
        return Stage::Failed;
    }

    if record.completed_at.is_some() {
        return Stage::Ready;
    }

    let status = record.status.trim();

    if record.is_converting.unwrap_or(false) || status.eq_ignore_ascii_case(raw_status::CONVERTING) {
        return Stage::Converting;
    }

    if status.eq_ignore_ascii_case(raw_status::ANALYZING) {
        return Stage::Analyzing;
    }

    if status.eq_ignore_ascii_case(raw_status::QUEUED) && record.queue_position.is_some() {
        return Stage::Queued;
    }

    Stage::Converting
}
