//! Session client configuration.
//!
//! Configuration is loaded from environment variables. The login password is
//! redacted in Debug output.

use crate::services::auth_client::{
    AuthClientConfig, DEFAULT_BASE_URL, DEFAULT_HTTP_TIMEOUT, DEFAULT_REFRESH_MAX_RETRIES,
};
use common::config::ObservabilityConfig;
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Renew this long before the access credential expires.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// Cadence of the periodic revalidation.
pub const DEFAULT_REVALIDATE_INTERVAL: Duration = Duration::from_secs(600);

/// Lower bound on the delay between two scheduled renewals.
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound for `REFRESH_MAX_RETRIES`.
pub const MAX_REFRESH_RETRIES: u32 = 10;

const STORE_DIR_NAME: &str = "session-agent";
const STORE_FILE_NAME: &str = "credentials.json";

/// Timer settings for the session controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub refresh_margin: Duration,
    pub revalidate_interval: Duration,
    pub min_refresh_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            revalidate_interval: DEFAULT_REVALIDATE_INTERVAL,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
        }
    }
}

/// Username/password pair used by the agent when no session is restored.
#[derive(Clone)]
pub struct LoginCredentials {
    pub username: String,
    pub password: SecretString,
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Session agent configuration.
#[derive(Clone)]
pub struct Config {
    /// Authentication service base URL (default: `http://127.0.0.1:8000`).
    pub auth_base_url: String,

    /// Credential file location.
    pub credential_store_path: PathBuf,

    pub session: SessionSettings,

    pub http_timeout: Duration,

    /// Transport retries for the renewal exchange.
    pub refresh_max_retries: u32,

    /// Optional unattended login.
    pub login: Option<LoginCredentials>,

    pub observability: ObservabilityConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("auth_base_url", &self.auth_base_url)
            .field("credential_store_path", &self.credential_store_path)
            .field("session", &self.session)
            .field("http_timeout", &self.http_timeout)
            .field("refresh_max_retries", &self.refresh_max_retries)
            .field("login", &self.login)
            .field("observability", &self.observability)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid duration configuration: {0}")]
    InvalidDuration(String),

    #[error("Invalid retry configuration: {0}")]
    InvalidRetries(String),

    #[error("Invalid login configuration: {0}")]
    InvalidLogin(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but invalid.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let auth_base_url = vars
            .get("AUTH_BASE_URL")
            .filter(|v| !v.trim().is_empty())
            .map_or_else(|| DEFAULT_BASE_URL.to_string(), |v| v.trim().to_string());

        let credential_store_path = credential_store_path(vars)?;

        let session = SessionSettings {
            refresh_margin: parse_seconds(vars, "REFRESH_MARGIN_SECONDS", DEFAULT_REFRESH_MARGIN)?,
            revalidate_interval: parse_seconds(
                vars,
                "REVALIDATE_INTERVAL_SECONDS",
                DEFAULT_REVALIDATE_INTERVAL,
            )?,
            min_refresh_interval: parse_seconds(
                vars,
                "MIN_REFRESH_INTERVAL_SECONDS",
                DEFAULT_MIN_REFRESH_INTERVAL,
            )?,
        };

        let http_timeout = parse_seconds(vars, "HTTP_TIMEOUT_SECONDS", DEFAULT_HTTP_TIMEOUT)?;

        let refresh_max_retries = if let Some(value_str) = vars.get("REFRESH_MAX_RETRIES") {
            let value: u32 = value_str.trim().parse().map_err(|e| {
                ConfigError::InvalidRetries(format!(
                    "REFRESH_MAX_RETRIES must be a valid non-negative integer, got '{value_str}': {e}"
                ))
            })?;

            if value > MAX_REFRESH_RETRIES {
                return Err(ConfigError::InvalidRetries(format!(
                    "REFRESH_MAX_RETRIES must not exceed {MAX_REFRESH_RETRIES}, got {value}"
                )));
            }

            value
        } else {
            DEFAULT_REFRESH_MAX_RETRIES
        };

        let login = match (vars.get("SESSION_USERNAME"), vars.get("SESSION_PASSWORD")) {
            (None, None) => None,
            (Some(username), Some(password)) if !username.trim().is_empty() => {
                Some(LoginCredentials {
                    username: username.trim().to_string(),
                    password: SecretString::from(password.clone()),
                })
            }
            (Some(_), Some(_)) => {
                return Err(ConfigError::InvalidLogin(
                    "SESSION_USERNAME must not be empty".to_string(),
                ))
            }
            _ => {
                return Err(ConfigError::InvalidLogin(
                    "SESSION_USERNAME and SESSION_PASSWORD must be set together".to_string(),
                ))
            }
        };

        let observability =
            ObservabilityConfig::from_vars(vars).map_err(ConfigError::InvalidLogging)?;

        Ok(Self {
            auth_base_url,
            credential_store_path,
            session,
            http_timeout,
            refresh_max_retries,
            login,
            observability,
        })
    }

    /// HTTP client settings derived from this configuration.
    #[must_use]
    pub fn auth_client_config(&self) -> AuthClientConfig {
        AuthClientConfig::new(self.auth_base_url.clone())
            .with_http_timeout(self.http_timeout)
            .with_refresh_max_retries(self.refresh_max_retries)
    }
}

/// `CREDENTIAL_STORE_PATH`, else `$XDG_STATE_HOME/session-agent/credentials.json`,
/// else `$HOME/.local/state/session-agent/credentials.json`.
fn credential_store_path(vars: &HashMap<String, String>) -> Result<PathBuf, ConfigError> {
    let non_empty = |key: &str| vars.get(key).filter(|v| !v.trim().is_empty());

    if let Some(path) = non_empty("CREDENTIAL_STORE_PATH") {
        return Ok(PathBuf::from(path));
    }
    if let Some(state_home) = non_empty("XDG_STATE_HOME") {
        return Ok(PathBuf::from(state_home)
            .join(STORE_DIR_NAME)
            .join(STORE_FILE_NAME));
    }
    if let Some(home) = non_empty("HOME") {
        return Ok(PathBuf::from(home)
            .join(".local")
            .join("state")
            .join(STORE_DIR_NAME)
            .join(STORE_FILE_NAME));
    }
    Err(ConfigError::MissingEnvVar(
        "CREDENTIAL_STORE_PATH".to_string(),
    ))
}

/// Parse a positive whole number of seconds.
fn parse_seconds(
    vars: &HashMap<String, String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(value_str) = vars.get(key) else {
        return Ok(default);
    };

    let value: u64 = value_str.trim().parse().map_err(|e| {
        ConfigError::InvalidDuration(format!(
            "{key} must be a valid positive integer, got '{value_str}': {e}"
        ))
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidDuration(format!(
            "{key} must be greater than 0"
        )));
    }

    Ok(Duration::from_secs(value))
}
