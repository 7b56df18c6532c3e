//! Consecutive failure tracking for noisy, recoverable errors.

use tracing::{error, info, warn};

/// Tracks consecutive failures to avoid log spam.
///
/// The first `max_logged_failures` failures are logged by the caller. After
/// that a single suppression notice is emitted and further failures stay
/// quiet. Reaching `alert_threshold` raises one error-level alert.
#[derive(Debug)]
pub struct FailureTracker {
    label: String,
    consecutive_failures: u32,
    max_logged_failures: u32,
    alert_threshold: u32,
    suppressed: bool,
}

impl FailureTracker {
    pub fn new(label: impl Into<String>, max_logged_failures: u32, alert_threshold: u32) -> Self {
        Self {
            label: label.into(),
            consecutive_failures: 0,
            max_logged_failures,
            alert_threshold,
            suppressed: false,
        }
    }

    /// Record a successful operation (resets failure count).
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 && (self.suppressed || self.alerted()) {
            info!(
                scope = %self.label,
                "Recovered after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.suppressed = false;
    }

    /// Record a failed operation.
    ///
    /// Returns `true` if this failure should be logged (not suppressed).
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;

        if self.alert_threshold > 0 && self.consecutive_failures == self.alert_threshold {
            error!(
                scope = %self.label,
                failures = self.consecutive_failures,
                "Persistent failures: {} in a row",
                self.consecutive_failures
            );
        }

        if self.consecutive_failures <= self.max_logged_failures {
            true
        } else if self.consecutive_failures == self.max_logged_failures + 1 {
            self.suppressed = true;
            warn!(
                scope = %self.label,
                "Suppressing further failure logs after {} consecutive failures",
                self.max_logged_failures
            );
            false
        } else {
            false
        }
    }

    /// Get the current consecutive failure count.
    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }

    fn alerted(&self) -> bool {
        self.alert_threshold > 0 && self.consecutive_failures >= self.alert_threshold
    }
}
