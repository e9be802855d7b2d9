//! Observability for the session client.
//!
//! Logging goes through `tracing` with `session.*` targets; credentials are
//! never recorded as fields. Metric labels are bounded:
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `session_refresh_total` | Counter | `outcome` (renewed, retained, terminal) |
//! | `session_refresh_duration_seconds` | Histogram | none |
//! | `session_validation_total` | Counter | `outcome` (valid, fail_open, invalid) |
//! | `session_logout_total` | Counter | `reason` (user_requested, rejected, renewal_failed, revoked) |

pub mod metrics;
