//! # Session Test Utilities
//!
//! Shared test utilities for the session client.
//!
//! This crate provides:
//! - Credential builders (`TestCredentialBuilder`) minting real signed JWTs
//! - Fixed test identities (usernames, passwords, profiles)
//! - Credential assertions (`CredentialAssertions` trait)
//! - An authentication service double (`TestAuthServer`) over `wiremock`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use session_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let server = TestAuthServer::start().await;
//!     server.mount_profile(test_profile()).await;
//!
//!     let access = TestCredentialBuilder::new().expires_in(3600).build();
//!     access.assert_expires_in(3600);
//! }
//! ```

pub mod assertions;
pub mod server_harness;
pub mod test_ids;
pub mod token_builders;

// Re-export commonly used items
pub use assertions::*;
pub use server_harness::*;
pub use test_ids::*;
pub use token_builders::*;
