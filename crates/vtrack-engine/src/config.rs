//! Engine configuration.

use std::net::SocketAddr;
use std::time::Duration;

use vtrack_models::ScopeId;

use crate::error::{EngineError, EngineResult};

/// Per-scope reconciliation configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilerConfig {
    /// Cadence of timer-driven passes
    pub poll_interval: Duration,
    /// Scheduled passes a job may stay non-terminal before it is reported as
    /// timed out. Only timer ticks and explicit `tick()` calls count; passes
    /// from wake-ups, refreshes and retries do not. `None` disables the bound.
    pub max_ticks: Option<u32>,
    /// How long a finished upload stays visible while the backend record appears
    pub upload_grace: Duration,
    /// Consecutive fetch failures before an error-level alert
    pub fetch_error_alert_threshold: u32,
    /// Consecutive fetch failures logged before suppression
    pub max_logged_fetch_errors: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(3000),
            max_ticks: None,
            upload_grace: Duration::from_millis(2000),
            fetch_error_alert_threshold: 5,
            max_logged_fetch_errors: 3,
        }
    }
}

impl ReconcilerConfig {
    /// Bounded AI-generation jobs: 2s cadence, 24 passes (~48s).
    pub fn ai_generation() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            max_ticks: Some(24),
            ..Self::default()
        }
    }

    /// Create config from environment variables.
    ///
    /// `RECONCILE_MAX_TICKS=0` disables the timeout bound.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: Duration::from_millis(
                std::env::var("RECONCILE_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3000),
            ),
            max_ticks: std::env::var("RECONCILE_MAX_TICKS")
                .ok()
                .and_then(|s| s.parse::<u32>().ok())
                .filter(|n| *n > 0),
            upload_grace: Duration::from_millis(
                std::env::var("UPLOAD_GRACE_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2000),
            ),
            fetch_error_alert_threshold: std::env::var("FETCH_ERROR_ALERT_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.fetch_error_alert_threshold),
            max_logged_fetch_errors: std::env::var("FETCH_ERROR_LOG_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_logged_fetch_errors),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_ticks(mut self, max_ticks: u32) -> Self {
        self.max_ticks = Some(max_ticks);
        self
    }

    pub fn with_upload_grace(mut self, grace: Duration) -> Self {
        self.upload_grace = grace;
        self
    }

    /// Reject values the poller cannot run with.
    pub fn validate(&self) -> EngineResult<()> {
        if self.poll_interval.is_zero() {
            return Err(EngineError::config("poll_interval must be greater than zero"));
        }
        if self.max_ticks == Some(0) {
            return Err(EngineError::config("max_ticks must be at least 1 when set"));
        }
        Ok(())
    }
}

/// Configuration for the `vtrack-monitor` binary.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Scopes to watch
    pub scopes: Vec<ScopeId>,
    /// Redis URL for the change feed; polling only when absent
    pub redis_url: Option<String>,
    /// Prometheus exporter listen address
    pub metrics_addr: Option<SocketAddr>,
    pub reconciler: ReconcilerConfig,
}

impl MonitorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> EngineResult<Self> {
        let scopes = parse_scopes(&std::env::var("MONITOR_SCOPES").unwrap_or_default());
        if scopes.is_empty() {
            return Err(EngineError::config("MONITOR_SCOPES must list at least one scope"));
        }

        let metrics_addr = match std::env::var("METRICS_ADDR") {
            Ok(raw) if !raw.trim().is_empty() => Some(
                raw.trim()
                    .parse()
                    .map_err(|e| EngineError::config(format!("invalid METRICS_ADDR '{}': {}", raw, e)))?,
            ),
            _ => None,
        };

        let reconciler = ReconcilerConfig::from_env();
        reconciler.validate()?;

        Ok(Self {
            scopes,
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.trim().is_empty()),
            metrics_addr,
            reconciler,
        })
    }
}

fn parse_scopes(raw: &str) -> Vec<ScopeId> {
    let mut scopes: Vec<ScopeId> = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let scope = ScopeId::from(part);
        if !scopes.contains(&scope) {
            scopes.push(scope);
        }
    }
    scopes
}
