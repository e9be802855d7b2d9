//! Secret types for keeping credentials out of logs.
//!
//! Re-exports [`secrecy`] types. Access and renewal credentials, passwords
//! and anything else sent to the authentication service should be held as
//! [`SecretString`] so that `Debug` output and `tracing` fields show
//! `[REDACTED]` instead of the value.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct StoredSession {
//!     username: String,
//!     access_credential: SecretString,
//! }
//!
//! let session = StoredSession {
//!     username: "alice".to_string(),
//!     access_credential: SecretString::from("eyJhbGciOi..."),
//! };
//!
//! // Safe: the credential is redacted
//! println!("{:?}", session);
//!
//! // Reading the value is always an explicit call
//! let header = format!("Bearer {}", session.access_credential.expose_secret());
//! # assert!(header.starts_with("Bearer "));
//! ```
//!
//! Secrets are zeroized on drop.

pub use secrecy::{ExposeSecret, SecretString};
