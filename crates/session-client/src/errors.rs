//! Session client error types.
//!
//! Network ambiguity never surfaces here: transient failures are absorbed by
//! the controller (fail-open) and only logged. These errors reach callers of
//! the controller API directly.

use crate::store::StoreError;
use thiserror::Error;

/// Errors returned by [`crate::controller::SessionController`] operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Programming error by the caller (e.g. empty access credential).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Credential store read or write failed.
    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),

    /// The service refused the login attempt.
    #[error("Login rejected: {0}")]
    LoginRejected(String),

    /// The login request could not be completed.
    #[error("Authentication service unavailable: {0}")]
    LoginUnavailable(String),

    /// Invalid setup (e.g. controller created outside a Tokio runtime).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The controller was dropped while a receiver was waiting.
    #[error("Session state channel closed")]
    ChannelClosed,
}
