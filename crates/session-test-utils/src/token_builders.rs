//! Builder patterns for test credentials
//!
//! Credentials are real HS256-signed JWTs. The session client never checks
//! signatures, but well-formed tokens keep the fixtures honest.

use chrono::{Duration, Utc};
use common::secret::SecretString;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Map, Value};

use crate::test_ids::TEST_SUBJECT;

/// Signing secret for test credentials.
const TEST_SIGNING_SECRET: &[u8] = b"session-test-utils-signing-secret";

/// Builder for test access credentials
///
/// # Example
/// ```rust,ignore
/// let access = TestCredentialBuilder::new()
///     .for_subject("alice")
///     .expires_in(1000)
///     .build();
/// ```
pub struct TestCredentialBuilder {
    sub: String,
    exp: Value,
    iat: i64,
    extra: Map<String, Value>,
}

impl TestCredentialBuilder {
    /// Create a builder for a credential valid for one hour
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            sub: TEST_SUBJECT.to_string(),
            exp: json!((now + Duration::seconds(3600)).timestamp()),
            iat: now.timestamp(),
            extra: Map::new(),
        }
    }

    /// Set the subject
    pub fn for_subject(mut self, subject: &str) -> Self {
        self.sub = subject.to_string();
        self
    }

    /// Set expiration in seconds from now (negative for the past)
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = json!((Utc::now() + Duration::seconds(seconds)).timestamp());
        self
    }

    /// Expired one minute ago
    pub fn expired(self) -> Self {
        self.expires_in(-60)
    }

    /// Use a fractional `exp`, as some issuers do
    pub fn with_fractional_expiry(mut self, timestamp: f64) -> Self {
        self.exp = json!(timestamp);
        self
    }

    /// Omit the `exp` claim entirely
    pub fn without_expiry(mut self) -> Self {
        self.exp = Value::Null;
        self
    }

    /// Add an arbitrary claim
    pub fn with_claim(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    /// Build the claims as a JSON value
    pub fn claims(&self) -> Value {
        let mut claims = self.extra.clone();
        claims.insert("sub".to_string(), json!(self.sub));
        claims.insert("iat".to_string(), json!(self.iat));
        if !self.exp.is_null() {
            claims.insert("exp".to_string(), self.exp.clone());
        }
        Value::Object(claims)
    }

    /// Build the signed credential
    pub fn build(self) -> String {
        encode(
            &Header::default(),
            &self.claims(),
            &EncodingKey::from_secret(TEST_SIGNING_SECRET),
        )
        .expect("Failed to sign test credential")
    }

    /// Build the signed credential wrapped as a secret
    pub fn build_secret(self) -> SecretString {
        SecretString::from(self.build())
    }
}

impl Default for TestCredentialBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Signed credential expiring `seconds` from now
pub fn credential_expiring_in(seconds: i64) -> String {
    TestCredentialBuilder::new().expires_in(seconds).build()
}

/// Credential whose claims segment is not base64url JSON
pub fn malformed_credential() -> String {
    "header.not-json-!!.signature".to_string()
}
