//! Custom test assertions for expressive tests
//!
//! Provides trait-based assertions for credentials.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use serde_json::Value;

/// Slack allowed when comparing expiry against the wall clock.
const EXPIRY_TOLERANCE_SECS: i64 = 5;

fn decode_claims(credential: &str) -> Value {
    let parts: Vec<_> = credential.split('.').collect();
    assert_eq!(
        parts.len(),
        3,
        "Credential must have 3 parts (header.claims.signature), got {}",
        parts.len()
    );

    let bytes = URL_SAFE_NO_PAD
        .decode(parts[1])
        .unwrap_or_else(|e| panic!("Failed to base64 decode claims: {e}"));
    serde_json::from_slice(&bytes).unwrap_or_else(|e| panic!("Failed to parse claims JSON: {e}"))
}

/// Custom assertions for credentials
///
/// # Example
/// ```rust,ignore
/// access
///     .assert_well_formed()
///     .assert_for_subject("alice")
///     .assert_expires_in(3600);
/// ```
pub trait CredentialAssertions {
    /// Assert that the credential is three base64url segments with JSON claims
    fn assert_well_formed(&self) -> &Self;

    /// Assert that the credential expires `seconds` from now (within a few seconds)
    fn assert_expires_in(&self, seconds: i64) -> &Self;

    /// Assert that the credential is for the specified subject
    fn assert_for_subject(&self, subject: &str) -> &Self;
}

impl CredentialAssertions for str {
    fn assert_well_formed(&self) -> &Self {
        let claims = decode_claims(self);
        assert!(claims.is_object(), "Claims must be a JSON object");
        self
    }

    fn assert_expires_in(&self, seconds: i64) -> &Self {
        let claims = decode_claims(self);
        let exp = claims["exp"]
            .as_f64()
            .unwrap_or_else(|| panic!("Credential has no numeric exp claim"));
        #[allow(clippy::cast_possible_truncation)]
        let remaining = exp as i64 - Utc::now().timestamp();
        assert!(
            (remaining - seconds).abs() <= EXPIRY_TOLERANCE_SECS,
            "Expected expiry in ~{seconds}s, got {remaining}s"
        );
        self
    }

    fn assert_for_subject(&self, subject: &str) -> &Self {
        let claims = decode_claims(self);
        assert_eq!(claims["sub"], subject, "Credential subject mismatch");
        self
    }
}

impl CredentialAssertions for String {
    fn assert_well_formed(&self) -> &Self {
        self.as_str().assert_well_formed();
        self
    }

    fn assert_expires_in(&self, seconds: i64) -> &Self {
        self.as_str().assert_expires_in(seconds);
        self
    }

    fn assert_for_subject(&self, subject: &str) -> &Self {
        self.as_str().assert_for_subject(subject);
        self
    }
}
