//! Session Client Library
//!
//! Keeps a user's session with a remote authentication service alive for as
//! long as the application runs:
//!
//! - Persists the access and renewal credentials across restarts
//! - Renews the access credential shortly before it expires
//! - Re-confirms the session with the service on a fixed cadence
//! - Publishes a single authentication state to consumers
//!
//! Network trouble never ends a session; only an explicit rejection from the
//! service does.
//!
//! # Architecture
//!
//! ```text
//! consumers -> controller.rs -> services/auth_client.rs -> remote service
//!                   |        -> store.rs                -> credential file
//!                   +-> tasks/{refresh_scheduler, revalidator}.rs
//! ```
//!
//! # Modules
//!
//! - `config` - Configuration from environment
//! - `controller` - Session lifecycle state machine
//! - `errors` - Error types returned to consumers
//! - `models` - Authentication state and result types
//! - `observability` - Metrics
//! - `services` - Authentication service client
//! - `store` - Credential storage
//! - `tasks` - Renewal and revalidation timers

pub mod config;
pub mod controller;
pub mod errors;
pub mod models;
pub mod observability;
pub mod services;
pub mod store;
pub mod tasks;

pub use controller::{AuthStateReceiver, LogoutReason, SessionController};
pub use errors::SessionError;
pub use models::{AccessDecision, AuthState, RefreshOutcome, UserProfile, Validation};
