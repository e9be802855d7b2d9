//! Common utilities shared across the session client crates.

#![warn(clippy::pedantic)]

/// Module for observability configuration
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for credential claims parsing (expiry checks)
pub mod jwt;
