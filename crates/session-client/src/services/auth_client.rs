//! Authentication service HTTP client.
//!
//! Three calls, all against the same base URL:
//!
//! | Call | Request | Success |
//! |---|---|---|
//! | Profile | `GET /api/user/me` with `Bearer <access>` | JSON object profile |
//! | Renewal exchange | `POST /api/user/refresh` with `{"renewal_credential": ...}` | new credential pair |
//! | Login | `POST /api/user/login` form `username`, `password` | credential pair + optional user |
//!
//! This layer only classifies failures. Deciding what a failure means for the
//! session (fail-open, logout) belongs to the controller.
//!
//! # Security
//!
//! - Credentials travel as `SecretString` and are never logged
//! - Error bodies are logged at trace level only
//! - Timeouts prevent hanging connections

use crate::models::UserProfile;
use common::secret::{ExposeSecret, SecretString};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

// =============================================================================
// Constants
// =============================================================================

/// Default authentication service base URL.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Default HTTP request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of retries for the renewal exchange.
pub const DEFAULT_REFRESH_MAX_RETRIES: u32 = 2;

/// Initial backoff delay between renewal retries.
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Maximum backoff delay between renewal retries.
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Default connection timeout for the HTTP client.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const PROFILE_PATH: &str = "/api/user/me";
const REFRESH_PATH: &str = "/api/user/refresh";
const LOGIN_PATH: &str = "/api/user/login";

/// Used when a login rejection carries no readable `detail`.
const DEFAULT_LOGIN_FAILURE_DETAIL: &str = "Login failed";

// =============================================================================
// Error Types
// =============================================================================

/// Failures talking to the authentication service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthApiError {
    /// Request never got a response (connect, timeout, reset).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The service refused the credential.
    #[error("Credential rejected with status {0}")]
    Rejected(u16),

    /// Non-2xx status that is not a rejection.
    #[error("Unexpected status {0}")]
    ServerError(u16),

    /// 2xx response with an unusable body.
    #[error("Invalid response body: {0}")]
    InvalidBody(String),

    /// The service refused a password login.
    #[error("Login rejected ({status}): {detail}")]
    LoginRejected { status: u16, detail: String },

    /// HTTP client could not be constructed.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl AuthApiError {
    /// Explicit refusal by the service, as opposed to an ambiguous failure.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            AuthApiError::Rejected(_) | AuthApiError::LoginRejected { .. }
        )
    }

    /// Worth retrying the same request.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            AuthApiError::Transport(_) => true,
            AuthApiError::ServerError(status) => *status >= 500,
            _ => false,
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

/// Credentials issued by the service.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: SecretString,

    /// Present only when the service rotated the renewal credential.
    pub renewal: Option<SecretString>,
}

/// Successful password login.
#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub tokens: TokenPair,
    pub user: Option<UserProfile>,
}

/// Credential payload. Accepts the OAuth-style field names as aliases.
#[derive(Deserialize)]
struct CredentialResponse {
    #[serde(default, alias = "access_token")]
    access_credential: Option<String>,

    #[serde(default, alias = "refresh_token")]
    renewal_credential: Option<String>,

    #[serde(default)]
    user: Option<Value>,
}

impl std::fmt::Debug for CredentialResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialResponse")
            .field("access_credential", &"[REDACTED]")
            .field(
                "renewal_credential",
                &self.renewal_credential.as_ref().map(|_| "[REDACTED]"),
            )
            .field("user", &self.user.is_some())
            .finish()
    }
}

impl CredentialResponse {
    fn into_parts(self) -> Result<(TokenPair, Option<UserProfile>), AuthApiError> {
        let access = self
            .access_credential
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AuthApiError::InvalidBody("missing access credential".to_string()))?;
        let renewal = self
            .renewal_credential
            .filter(|value| !value.is_empty())
            .map(SecretString::from);
        let user = self.user.and_then(UserProfile::from_value);

        Ok((
            TokenPair {
                access: SecretString::from(access),
                renewal,
            },
            user,
        ))
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<Value>,
}

/// Extract a human-readable `detail` from an error body.
fn rejection_detail(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.detail)
        .and_then(|detail| detail.as_str().map(str::to_string))
        .filter(|detail| !detail.is_empty())
        .unwrap_or_else(|| DEFAULT_LOGIN_FAILURE_DETAIL.to_string())
}

// =============================================================================
// Trait
// =============================================================================

/// Operations the session controller needs from the authentication service.
#[async_trait::async_trait]
pub trait AuthApi: Send + Sync {
    /// Fetch the profile for an access credential.
    async fn fetch_profile(&self, access: &SecretString) -> Result<UserProfile, AuthApiError>;

    /// Exchange a renewal credential for a new credential pair.
    async fn exchange_renewal(&self, renewal: &SecretString) -> Result<TokenPair, AuthApiError>;

    /// Password login.
    async fn login(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<LoginResponse, AuthApiError>;
}

// =============================================================================
// Configuration
// =============================================================================

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct AuthClientConfig {
    /// Base URL without trailing slash.
    pub base_url: String,

    pub http_timeout: Duration,

    /// Extra attempts for the renewal exchange after the first one.
    pub refresh_max_retries: u32,

    pub initial_backoff: Duration,

    pub max_backoff: Duration,
}

impl AuthClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            refresh_max_retries: DEFAULT_REFRESH_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }

    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_refresh_max_retries(mut self, retries: u32) -> Self {
        self.refresh_max_retries = retries;
        self
    }

    /// Set the backoff bounds for renewal retries.
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }
}

impl Default for AuthClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

// =============================================================================
// HTTP Client
// =============================================================================

/// `reqwest`-backed [`AuthApi`].
#[derive(Debug, Clone)]
pub struct HttpAuthClient {
    client: Client,
    config: AuthClientConfig,
}

impl HttpAuthClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns `AuthApiError::Configuration` if the HTTP client cannot be built.
    pub fn new(config: AuthClientConfig) -> Result<Self, AuthApiError> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                AuthApiError::Configuration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }

    /// One renewal exchange attempt.
    async fn exchange_once(&self, renewal: &SecretString) -> Result<TokenPair, AuthApiError> {
        let body = serde_json::json!({ "renewal_credential": renewal.expose_secret() });

        let response = self
            .client
            .post(self.url(REFRESH_PATH))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                debug!(target: "session.auth_client", error = %e, "Renewal request failed");
                AuthApiError::Transport(e.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            let payload: CredentialResponse = response.json().await.map_err(|e| {
                warn!(target: "session.auth_client", error = %e, "Failed to parse renewal response");
                AuthApiError::InvalidBody(e.to_string())
            })?;
            let (tokens, _) = payload.into_parts()?;
            Ok(tokens)
        } else if status.is_client_error() {
            log_error_body(response, "Renewal rejected").await;
            Err(AuthApiError::Rejected(status.as_u16()))
        } else {
            warn!(
                target: "session.auth_client",
                status = %status,
                "Renewal endpoint returned server error"
            );
            Err(AuthApiError::ServerError(status.as_u16()))
        }
    }
}

/// Drain an error body and log it at trace level only.
async fn log_error_body(response: reqwest::Response, message: &'static str) {
    let status = response.status();
    let body = response.text().await.unwrap_or_else(|e| {
        trace!(target: "session.auth_client", error = %e, "Failed to read error response body");
        String::new()
    });
    warn!(target: "session.auth_client", status = %status, "{message}");
    trace!(target: "session.auth_client", body = %body, "Error response body");
}

#[async_trait::async_trait]
impl AuthApi for HttpAuthClient {
    #[instrument(skip_all)]
    async fn fetch_profile(&self, access: &SecretString) -> Result<UserProfile, AuthApiError> {
        let response = self
            .client
            .get(self.url(PROFILE_PATH))
            .bearer_auth(access.expose_secret())
            .send()
            .await
            .map_err(|e| {
                debug!(target: "session.auth_client", error = %e, "Profile request failed");
                AuthApiError::Transport(e.to_string())
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            debug!(target: "session.auth_client", status = %status, "Access credential rejected");
            return Err(AuthApiError::Rejected(status.as_u16()));
        }
        if !status.is_success() {
            warn!(
                target: "session.auth_client",
                status = %status,
                "Unexpected profile response status"
            );
            return Err(AuthApiError::ServerError(status.as_u16()));
        }

        let body: Value = response.json().await.map_err(|e| {
            warn!(target: "session.auth_client", error = %e, "Failed to parse profile response");
            AuthApiError::InvalidBody(e.to_string())
        })?;

        UserProfile::from_value(body)
            .ok_or_else(|| AuthApiError::InvalidBody("profile is not a JSON object".to_string()))
    }

    #[instrument(skip_all)]
    async fn exchange_renewal(&self, renewal: &SecretString) -> Result<TokenPair, AuthApiError> {
        let mut backoff = self.config.initial_backoff;
        let mut attempt: u32 = 0;

        loop {
            match self.exchange_once(renewal).await {
                Ok(tokens) => {
                    debug!(target: "session.auth_client", attempt, "Renewal exchange succeeded");
                    return Ok(tokens);
                }
                Err(e) if e.is_retryable() && attempt < self.config.refresh_max_retries => {
                    warn!(
                        target: "session.auth_client",
                        error = %e,
                        attempt,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        "Renewal exchange failed, will retry"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2).min(self.config.max_backoff);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    #[instrument(skip_all)]
    async fn login(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<LoginResponse, AuthApiError> {
        let form = [
            ("username", username),
            ("password", password.expose_secret()),
        ];

        let response = self
            .client
            .post(self.url(LOGIN_PATH))
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                debug!(target: "session.auth_client", error = %e, "Login request failed");
                AuthApiError::Transport(e.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            let payload: CredentialResponse = response.json().await.map_err(|e| {
                warn!(target: "session.auth_client", error = %e, "Failed to parse login response");
                AuthApiError::InvalidBody(e.to_string())
            })?;
            let (tokens, user) = payload.into_parts()?;
            Ok(LoginResponse { tokens, user })
        } else if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            let detail = rejection_detail(&body);
            warn!(target: "session.auth_client", status = %status, "Login rejected");
            Err(AuthApiError::LoginRejected {
                status: status.as_u16(),
                detail,
            })
        } else {
            warn!(
                target: "session.auth_client",
                status = %status,
                "Login endpoint returned server error"
            );
            Err(AuthApiError::ServerError(status.as_u16()))
        }
    }
}

// =============================================================================
// Mock
// =============================================================================

/// Mock authentication service for testing.
///
/// Behaviour is supplied as closures so tests can mint fresh credentials per
/// call. Every call is counted.
pub mod mock {
    use super::{AuthApi, AuthApiError, LoginResponse, TokenPair};
    use crate::models::UserProfile;
    use common::secret::{ExposeSecret, SecretString};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;

    type ProfileFn = dyn Fn(usize, &str) -> Result<UserProfile, AuthApiError> + Send + Sync;
    type RenewalFn = dyn Fn(usize) -> Result<TokenPair, AuthApiError> + Send + Sync;
    type LoginFn = dyn Fn(&str, &str) -> Result<LoginResponse, AuthApiError> + Send + Sync;

    pub struct MockAuthApi {
        profile: Box<ProfileFn>,
        renewal: Box<RenewalFn>,
        login: Box<LoginFn>,
        renewal_delay: Option<Duration>,
        profile_calls: AtomicUsize,
        renewal_calls: AtomicUsize,
        login_calls: AtomicUsize,
        profile_credentials: Mutex<Vec<String>>,
        renewal_credentials: Mutex<Vec<String>>,
    }

    impl MockAuthApi {
        /// Accepts every access credential with an empty profile; refuses
        /// renewals and logins.
        #[must_use]
        pub fn accepting() -> Self {
            Self {
                profile: Box::new(|_, _| Ok(UserProfile::default())),
                renewal: Box::new(|_| Err(AuthApiError::Rejected(401))),
                login: Box::new(|_, _| {
                    Err(AuthApiError::LoginRejected {
                        status: 401,
                        detail: "Login failed".to_string(),
                    })
                }),
                renewal_delay: None,
                profile_calls: AtomicUsize::new(0),
                renewal_calls: AtomicUsize::new(0),
                login_calls: AtomicUsize::new(0),
                profile_credentials: Mutex::new(Vec::new()),
                renewal_credentials: Mutex::new(Vec::new()),
            }
        }

        /// Every call fails with a transport error.
        #[must_use]
        pub fn unreachable() -> Self {
            Self::accepting()
                .with_profile(|_, _| Err(AuthApiError::Transport("connection refused".into())))
                .with_renewal(|_| Err(AuthApiError::Transport("connection refused".into())))
                .with_login(|_, _| Err(AuthApiError::Transport("connection refused".into())))
        }

        /// Profile behaviour; receives the call index and access credential.
        #[must_use]
        pub fn with_profile(
            mut self,
            f: impl Fn(usize, &str) -> Result<UserProfile, AuthApiError> + Send + Sync + 'static,
        ) -> Self {
            self.profile = Box::new(f);
            self
        }

        /// Renewal behaviour; receives the call index.
        #[must_use]
        pub fn with_renewal(
            mut self,
            f: impl Fn(usize) -> Result<TokenPair, AuthApiError> + Send + Sync + 'static,
        ) -> Self {
            self.renewal = Box::new(f);
            self
        }

        /// Login behaviour; receives username and password.
        #[must_use]
        pub fn with_login(
            mut self,
            f: impl Fn(&str, &str) -> Result<LoginResponse, AuthApiError> + Send + Sync + 'static,
        ) -> Self {
            self.login = Box::new(f);
            self
        }

        /// Sleep before answering each renewal.
        #[must_use]
        pub fn with_renewal_delay(mut self, delay: Duration) -> Self {
            self.renewal_delay = Some(delay);
            self
        }

        pub fn profile_calls(&self) -> usize {
            self.profile_calls.load(Ordering::SeqCst)
        }

        pub fn renewal_calls(&self) -> usize {
            self.renewal_calls.load(Ordering::SeqCst)
        }

        pub fn login_calls(&self) -> usize {
            self.login_calls.load(Ordering::SeqCst)
        }

        /// Access credentials presented to `fetch_profile`, in call order.
        pub fn profile_credentials(&self) -> Vec<String> {
            self.profile_credentials
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Renewal credentials presented to `exchange_renewal`, in call order.
        pub fn renewal_credentials(&self) -> Vec<String> {
            self.renewal_credentials
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    #[async_trait::async_trait]
    impl AuthApi for MockAuthApi {
        async fn fetch_profile(&self, access: &SecretString) -> Result<UserProfile, AuthApiError> {
            let call = self.profile_calls.fetch_add(1, Ordering::SeqCst);
            self.profile_credentials
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(access.expose_secret().to_string());
            (self.profile)(call, access.expose_secret())
        }

        async fn exchange_renewal(
            &self,
            renewal: &SecretString,
        ) -> Result<TokenPair, AuthApiError> {
            let call = self.renewal_calls.fetch_add(1, Ordering::SeqCst);
            self.renewal_credentials
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(renewal.expose_secret().to_string());
            if let Some(delay) = self.renewal_delay {
                tokio::time::sleep(delay).await;
            }
            (self.renewal)(call)
        }

        async fn login(
            &self,
            username: &str,
            password: &SecretString,
        ) -> Result<LoginResponse, AuthApiError> {
            self.login_calls.fetch_add(1, Ordering::SeqCst);
            (self.login)(username, password.expose_secret())
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
