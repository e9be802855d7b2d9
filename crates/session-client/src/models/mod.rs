//! Data models exposed by the session controller.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// User profile returned by the authentication service.
///
/// The controller does not interpret the fields; it only passes them through
/// to consumers. Always a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserProfile(Map<String, Value>);

impl UserProfile {
    /// Wrap a JSON value, returning `None` unless it is an object.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Look up a single field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Convert back into a JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Authentication state exposed to consumers.
///
/// Invariant: `is_authenticated == false` implies `user == None`.
/// `is_refreshing` is independent of the other flags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthState {
    /// A usable session is held.
    pub is_authenticated: bool,

    /// Profile of the signed-in user, if one has been fetched.
    pub user: Option<UserProfile>,

    /// Startup validation has not finished yet.
    pub is_initializing: bool,

    /// A renewal exchange is in flight.
    pub is_refreshing: bool,
}

impl AuthState {
    /// State at controller construction.
    #[must_use]
    pub fn initializing() -> Self {
        Self {
            is_initializing: true,
            ..Self::default()
        }
    }

    /// Gate for views that require a signed-in user.
    #[must_use]
    pub fn access_decision(&self) -> AccessDecision {
        if self.is_initializing {
            AccessDecision::Pending
        } else if self.is_authenticated {
            AccessDecision::Granted
        } else {
            AccessDecision::LoginRequired
        }
    }
}

/// What a protected view should do with the current [`AuthState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// Still initializing; show a loading indicator.
    Pending,
    /// Render the protected content.
    Granted,
    /// Redirect to the login view.
    LoginRequired,
}

/// Result of a renewal attempt.
///
/// Three outcomes collapsed into two flags:
/// - renewed: `success = true`
/// - retained: `success = false, should_logout = false` (session kept)
/// - terminal: `success = false, should_logout = true`
///
/// Invariant: `success` implies `!should_logout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub success: bool,
    pub should_logout: bool,
}

impl RefreshOutcome {
    /// New credentials were issued and stored.
    #[must_use]
    pub const fn renewed() -> Self {
        Self {
            success: true,
            should_logout: false,
        }
    }

    /// Renewal did not happen but the session stays.
    #[must_use]
    pub const fn retained() -> Self {
        Self {
            success: false,
            should_logout: false,
        }
    }

    /// Renewal was refused; the session must end.
    #[must_use]
    pub const fn terminal() -> Self {
        Self {
            success: false,
            should_logout: true,
        }
    }

    /// Metric label for this outcome.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match (self.success, self.should_logout) {
            (true, _) => "renewed",
            (false, true) => "terminal",
            (false, false) => "retained",
        }
    }
}

/// Result of validating an access credential against the service.
#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    /// `false` only when the service explicitly rejected the session.
    pub is_valid: bool,

    /// Fresh profile, when the service returned one.
    pub user: Option<UserProfile>,
}

impl Validation {
    /// The service accepted the credential and returned a profile.
    #[must_use]
    pub fn valid(user: UserProfile) -> Self {
        Self {
            is_valid: true,
            user: Some(user),
        }
    }

    /// The outcome was ambiguous; keep the session as it is.
    #[must_use]
    pub fn fail_open() -> Self {
        Self {
            is_valid: true,
            user: None,
        }
    }

    /// The service rejected the session.
    #[must_use]
    pub fn invalid() -> Self {
        Self {
            is_valid: false,
            user: None,
        }
    }
}
