//! Job store error types.

use thiserror::Error;

/// Result type for job store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the job store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Server error ({0}): {1}")]
    ServerError(u16, String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Rate limited, retry after {0}ms")]
    RateLimited(u64),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Map an HTTP status code to an error.
    pub fn from_http_status(status: u16, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match status {
            401 | 403 => Self::PermissionDenied(msg),
            404 => Self::NotFound(msg),
            // Retry-After is parsed by the caller when present
            429 => Self::RateLimited(0),
            500..=599 => Self::ServerError(status, msg),
            _ => Self::RequestFailed(msg),
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Network(_)
                | StoreError::RateLimited(_)
                | StoreError::ServerError(_, _)
                | StoreError::Unavailable(_)
        )
    }

    /// Server-requested delay before retrying, when known.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            StoreError::RateLimited(ms) if *ms > 0 => Some(*ms),
            _ => None,
        }
    }

    /// HTTP status associated with the error, for metrics.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            StoreError::PermissionDenied(_) => Some(403),
            StoreError::NotFound(_) => Some(404),
            StoreError::RateLimited(_) => Some(429),
            StoreError::ServerError(status, _) => Some(*status),
            StoreError::RequestFailed(_) => Some(400),
            StoreError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Short label for the error class, used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Config(_) => "config",
            StoreError::NotFound(_) => "not_found",
            StoreError::PermissionDenied(_) => "permission_denied",
            StoreError::RequestFailed(_) => "request_failed",
            StoreError::ServerError(_, _) => "server_error",
            StoreError::InvalidResponse(_) => "invalid_response",
            StoreError::RateLimited(_) => "rate_limited",
            StoreError::Network(_) => "network",
            StoreError::Json(_) => "json",
            StoreError::Redis(_) => "redis",
            StoreError::Unavailable(_) => "unavailable",
        }
    }
}
