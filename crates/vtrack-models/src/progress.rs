//! Elapsed-time and remaining-time heuristics.
//!
//! The remaining-time estimate is a linear extrapolation meant for display.
//! Nothing should schedule against it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Time elapsed between `started_at` and `now`, floored at zero.
pub fn elapsed_between(started_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - started_at).to_std().unwrap_or(Duration::ZERO)
}

/// Time elapsed since `started_at`.
pub fn elapsed(started_at: DateTime<Utc>) -> Duration {
    elapsed_between(started_at, Utc::now())
}

/// Linear remaining-time estimate.
///
/// `total = elapsed / (pct / 100)`, `remaining = max(0, total - elapsed)`.
/// Returns `None` when `progress_pct <= 0` (or NaN).
pub fn estimate_remaining(progress_pct: f64, elapsed: Duration) -> Option<Duration> {
    if progress_pct.is_nan() || progress_pct <= 0.0 {
        return None;
    }

    let fraction = progress_pct.min(100.0) / 100.0;
    let total_secs = elapsed.as_secs_f64() / fraction;
    let remaining = (total_secs - elapsed.as_secs_f64()).max(0.0);

    Duration::try_from_secs_f64(remaining).ok()
}

/// Elapsed and remaining time for one job at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressSnapshot {
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_ms: Option<u64>,
}

impl ProgressSnapshot {
    pub fn compute(started_at: DateTime<Utc>, progress_pct: Option<f64>, now: DateTime<Utc>) -> Self {
        let elapsed = elapsed_between(started_at, now);
        let remaining = progress_pct.and_then(|pct| estimate_remaining(pct, elapsed));

        Self {
            elapsed_ms: duration_millis(elapsed),
            remaining_ms: remaining.map(duration_millis),
        }
    }
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// `"42s"` under a minute, `"3m 7s"` otherwise.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        return format!("{}s", secs);
    }
    format!("{}m {}s", secs / 60, secs % 60)
}

/// Human-readable byte size.
pub fn format_file_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{} B", bytes)
    } else if bytes < MB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_half_done() {
        let remaining = estimate_remaining(50.0, Duration::from_secs(30)).unwrap();
        assert_eq!(remaining.as_secs(), 30);
    }

    #[test]
    fn test_estimate_zero_progress_is_absent() {
        assert!(estimate_remaining(0.0, Duration::from_secs(30)).is_none());
        assert!(estimate_remaining(-1.0, Duration::from_secs(30)).is_none());
        assert!(estimate_remaining(f64::NAN, Duration::from_secs(30)).is_none());
    }

    #[test]
    fn test_estimate_complete_is_zero() {
        assert_eq!(estimate_remaining(100.0, Duration::from_secs(10)), Some(Duration::ZERO));
        assert_eq!(estimate_remaining(140.0, Duration::from_secs(10)), Some(Duration::ZERO));
    }

    #[test]
    fn test_estimate_partial_progress_is_positive() {
        let remaining = estimate_remaining(42.0, Duration::from_secs(5)).unwrap();
        assert!(remaining > Duration::ZERO);
        // 5 / 0.42 - 5 ~= 6.9s
        assert!((remaining.as_secs_f64() - 6.904).abs() < 0.01);
    }

    #[test]
    fn test_elapsed_is_never_negative() {
        let now = Utc::now();
        let future = now + chrono::Duration::seconds(10);
        assert_eq!(elapsed_between(future, now), Duration::ZERO);
        assert_eq!(elapsed_between(now - chrono::Duration::seconds(10), now), Duration::from_secs(10));
    }

    #[test]
    fn test_snapshot() {
        let now = Utc::now();
        let snap = ProgressSnapshot::compute(now - chrono::Duration::seconds(20), Some(25.0), now);
        assert_eq!(snap.elapsed_ms, 20_000);
        assert_eq!(snap.remaining_ms, Some(60_000));

        let snap = ProgressSnapshot::compute(now, None, now);
        assert_eq!(snap.remaining_ms, None);
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(187)), "3m 7s");
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_file_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }
}
