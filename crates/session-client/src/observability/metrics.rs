//! Metrics definitions for the session client.
//!
//! All metrics follow Prometheus naming conventions:
//! - `session_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! Recording is a no-op until the embedding binary installs a recorder.

use metrics::{counter, histogram};
use std::time::Duration;

/// Record a completed renewal exchange.
///
/// Metrics: `session_refresh_total{outcome}`, `session_refresh_duration_seconds`
pub fn record_refresh(outcome: &'static str, duration: Duration) {
    histogram!("session_refresh_duration_seconds").record(duration.as_secs_f64());
    counter!("session_refresh_total", "outcome" => outcome).increment(1);
}

/// Record a validation result.
///
/// Metric: `session_validation_total{outcome}`
pub fn record_validation(outcome: &'static str) {
    counter!("session_validation_total", "outcome" => outcome).increment(1);
}

/// Record the end of a session.
///
/// Metric: `session_logout_total{reason}`
pub fn record_logout(reason: &'static str) {
    counter!("session_logout_total", "reason" => reason).increment(1);
}
