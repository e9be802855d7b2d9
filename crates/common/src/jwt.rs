//! Credential claims parsing.
//!
//! Decodes the claims segment of a three-part credential
//! (`header.claims.signature`) without verifying the signature and without
//! contacting the network. The only claim consumed is `exp`.
//!
//! # Malformed input
//!
//! [`is_expired`] and [`time_to_expiry`] never fail. A credential that cannot
//! be decoded is reported as expired (`true`, zero remaining lifetime), so a
//! garbled value in the credential store always leads to renewal or logout
//! rather than to an authenticated request with a broken token.
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{is_expired, time_to_expiry};
//!
//! if is_expired(access.expose_secret()) {
//!     // renew before use
//! }
//! let remaining = time_to_expiry(access.expose_secret());
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum credential size accepted by the parser (8KB).
///
/// Larger values are rejected before any base64 decoding.
pub const MAX_CREDENTIAL_SIZE_BYTES: usize = 8192;

// =============================================================================
// Error Types
// =============================================================================

/// Reasons a credential could not be decoded.
///
/// Display strings are identical on purpose; the variant is only used for
/// debug logging and tests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Credential exceeds [`MAX_CREDENTIAL_SIZE_BYTES`].
    #[error("The credential is invalid or expired")]
    TooLarge,

    /// Not three segments, bad base64, or claims are not a JSON object.
    #[error("The credential is invalid or expired")]
    Malformed,

    /// Claims decoded but carry no numeric `exp`.
    #[error("The credential is invalid or expired")]
    MissingExpiry,
}

// =============================================================================
// Claims
// =============================================================================

/// Claims this crate reads from a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialClaims {
    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,
}

/// Decode the claims segment of a credential.
///
/// The signature is NOT verified.
///
/// # Errors
///
/// - `TooLarge` - credential exceeds `MAX_CREDENTIAL_SIZE_BYTES`
/// - `Malformed` - wrong segment count, invalid base64url, or non-object JSON
/// - `MissingExpiry` - `exp` absent or not a number
pub fn decode_claims(credential: &str) -> Result<CredentialClaims, CredentialError> {
    if credential.len() > MAX_CREDENTIAL_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            size = credential.len(),
            max_size = MAX_CREDENTIAL_SIZE_BYTES,
            "Credential rejected: size exceeds maximum allowed"
        );
        return Err(CredentialError::TooLarge);
    }

    let segments: Vec<&str> = credential.split('.').collect();
    let [_, claims_segment, _] = segments.as_slice() else {
        tracing::debug!(
            target: "common.jwt",
            segments = segments.len(),
            "Credential rejected: expected three segments"
        );
        return Err(CredentialError::Malformed);
    };

    // Some issuers keep base64 padding on the segments.
    let claims_bytes = URL_SAFE_NO_PAD
        .decode(claims_segment.trim_end_matches('='))
        .map_err(|e| {
            tracing::debug!(target: "common.jwt", error = %e, "Failed to decode claims base64");
            CredentialError::Malformed
        })?;

    let claims: serde_json::Value = serde_json::from_slice(&claims_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse claims JSON");
        CredentialError::Malformed
    })?;

    let object = claims.as_object().ok_or(CredentialError::Malformed)?;
    let exp = object
        .get("exp")
        .and_then(numeric_seconds)
        .ok_or(CredentialError::MissingExpiry)?;

    Ok(CredentialClaims { exp })
}

/// Accept integer or fractional `exp` values; fractions are truncated.
fn numeric_seconds(value: &serde_json::Value) -> Option<i64> {
    if let Some(secs) = value.as_i64() {
        return Some(secs);
    }
    let secs = value.as_f64().filter(|f| f.is_finite())?;
    #[allow(clippy::cast_possible_truncation)]
    Some(secs.trunc() as i64)
}

// =============================================================================
// Expiry Checks
// =============================================================================

/// Returns `true` if the credential is expired or cannot be parsed.
#[must_use]
pub fn is_expired(credential: &str) -> bool {
    is_expired_at(credential, chrono::Utc::now().timestamp())
}

/// Deterministic variant of [`is_expired`] against an explicit `now`.
#[must_use]
pub fn is_expired_at(credential: &str, now: i64) -> bool {
    match decode_claims(credential) {
        Ok(claims) => claims.exp <= now,
        Err(_) => true,
    }
}

/// Remaining lifetime of the credential, clamped at zero.
///
/// Unparsable credentials report zero.
#[must_use]
pub fn time_to_expiry(credential: &str) -> Duration {
    time_to_expiry_at(credential, chrono::Utc::now().timestamp())
}

/// Deterministic variant of [`time_to_expiry`] against an explicit `now`.
#[must_use]
pub fn time_to_expiry_at(credential: &str, now: i64) -> Duration {
    let Ok(claims) = decode_claims(credential) else {
        return Duration::ZERO;
    };
    let remaining = claims.exp.saturating_sub(now).max(0);
    #[allow(clippy::cast_sign_loss)]
    Duration::from_secs(remaining as u64)
}

// =============================================================================
// Tests
// =============================================================================
