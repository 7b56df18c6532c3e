//! Row types returned by the REST job store and their mapping to [`JobRecord`].

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use vtrack_models::{raw_status, JobId, JobRecord, ScopeId};

/// Columns requested from the `videos` table, with the embedded analysis row.
pub const VIDEO_SELECT: &str = "id,project_id,original_name,created_at,video_analysis(status,is_converting,error_message,processing_completed_at,queue_position,overall_progress,processing_step,retryable)";

/// Error text used when the backend marks a job failed without saying why.
pub const UNKNOWN_FAILURE: &str = "Processing failed";

/// One row of the `videos` table.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoRow {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub video_analysis: Option<AnalysisField>,
}

/// The embedded relation comes back as an object, an array, or null
/// depending on how the foreign key is declared.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AnalysisField {
    Many(Vec<AnalysisRow>),
    One(AnalysisRow),
}

impl AnalysisField {
    fn first(&self) -> Option<&AnalysisRow> {
        match self {
            AnalysisField::One(row) => Some(row),
            AnalysisField::Many(rows) => rows.first(),
        }
    }
}

/// One row of the `video_analysis` table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisRow {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub is_converting: Option<bool>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_timestamp")]
    pub processing_completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub queue_position: Option<i64>,
    #[serde(default)]
    pub overall_progress: Option<f64>,
    #[serde(default)]
    pub processing_step: Option<String>,
    #[serde(default)]
    pub retryable: Option<bool>,
}

/// Body of the retry request.
#[derive(Debug, Clone, Serialize)]
pub struct RetryPatch<'a> {
    pub status: &'a str,
    pub error_message: Option<&'a str>,
    pub processing_completed_at: Option<&'a str>,
    pub is_converting: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_context: Option<&'a str>,
}

impl<'a> RetryPatch<'a> {
    pub fn new(context: Option<&'a str>) -> Self {
        Self {
            status: raw_status::QUEUED,
            error_message: None,
            processing_completed_at: None,
            is_converting: false,
            retry_context: context,
        }
    }
}

impl VideoRow {
    /// Normalize a row into a [`JobRecord`].
    ///
    /// A missing analysis row means the backend has not picked the job up
    /// yet (`processing`). A `completed` status without a timestamp falls
    /// back to the creation time, and a `failed` status without text gets a
    /// generic message, so the classifier sees the terminal state.
    pub fn into_record(self) -> JobRecord {
        let analysis = self
            .video_analysis
            .as_ref()
            .and_then(AnalysisField::first)
            .cloned()
            .unwrap_or_default();

        let status = analysis
            .status
            .clone()
            .unwrap_or_else(|| raw_status::PROCESSING.to_string());

        let mut completed_at = analysis.processing_completed_at;
        if completed_at.is_none() && status.eq_ignore_ascii_case(raw_status::COMPLETED) {
            completed_at = Some(self.created_at);
        }

        let mut error = analysis.error_message.filter(|e| !e.trim().is_empty());
        if error.is_none() && status.eq_ignore_ascii_case(raw_status::FAILED) {
            error = Some(UNKNOWN_FAILURE.to_string());
        }

        JobRecord {
            id: JobId::from(self.id),
            scope_id: ScopeId::from(self.project_id),
            name: self.original_name.unwrap_or_default(),
            status,
            is_converting: analysis.is_converting,
            error,
            created_at: self.created_at,
            completed_at,
            queue_position: analysis.queue_position,
            progress: analysis.overall_progress,
            processing_step: analysis.processing_step,
            retryable: analysis.retryable,
        }
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    // Postgres `timestamp without time zone`, stored as UTC
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
}

fn deserialize_opt_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw))),
    }
}
