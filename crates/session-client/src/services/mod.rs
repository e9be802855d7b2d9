//! Service layer for the session client.
//!
//! # Components
//!
//! - `auth_client` - HTTP client for the authentication service (profile,
//!   renewal exchange, password login)

pub mod auth_client;

pub use auth_client::{
    AuthApi, AuthApiError, AuthClientConfig, HttpAuthClient, LoginResponse, TokenPair,
};
