//! Authentication service double for E2E testing
//!
//! Provides TestAuthServer, a `wiremock` server that speaks the profile,
//! renewal and login endpoints.

use crate::test_ids::{test_profile, TEST_LOGIN_REJECTION, TEST_PASSWORD, TEST_USERNAME};
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const PROFILE_PATH: &str = "/api/user/me";
pub const REFRESH_PATH: &str = "/api/user/refresh";
pub const LOGIN_PATH: &str = "/api/user/login";

/// Mock authentication service
///
/// # Example
/// ```rust,ignore
/// let server = TestAuthServer::start().await;
/// server.mount_profile(test_profile()).await;
/// server.mount_renewal(&new_access, Some("renewal-2")).await;
///
/// let config = AuthClientConfig::new(server.url());
/// ```
pub struct TestAuthServer {
    server: MockServer,
}

impl TestAuthServer {
    /// Start a server on a random local port
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL of the server
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Underlying mock server, for custom mounts
    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Profile endpoint returns `profile` for any bearer credential
    pub async fn mount_profile(&self, profile: Value) {
        Mock::given(method("GET"))
            .and(path(PROFILE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(profile))
            .mount(&self.server)
            .await;
    }

    /// Profile endpoint answers `template` for exactly this access credential
    pub async fn mount_profile_for(&self, access: &str, template: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(PROFILE_PATH))
            .and(header("authorization", format!("Bearer {access}").as_str()))
            .respond_with(template)
            .mount(&self.server)
            .await;
    }

    /// Profile endpoint answers `template` for any credential
    pub async fn mount_profile_response(&self, template: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(PROFILE_PATH))
            .respond_with(template)
            .mount(&self.server)
            .await;
    }

    /// Renewal endpoint issues `access` (and `renewal`, when given)
    pub async fn mount_renewal(&self, access: &str, renewal: Option<&str>) {
        self.mount_renewal_response(renewal_response(access, renewal))
            .await;
    }

    /// Renewal endpoint answers `template`
    pub async fn mount_renewal_response(&self, template: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(template)
            .mount(&self.server)
            .await;
    }

    /// Login endpoint accepts `TEST_USERNAME` / `TEST_PASSWORD` and issues
    /// `access`; any other form is rejected with `TEST_LOGIN_REJECTION`
    pub async fn mount_login(&self, access: &str, user: Option<Value>) {
        let mut body = json!({
            "access_token": access,
            "token_type": "bearer",
        });
        if let Some(user) = user {
            body["user"] = user;
        }

        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .and(body_string_contains(format!("username={TEST_USERNAME}").as_str()))
            .and(body_string_contains(format!("password={TEST_PASSWORD}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .with_priority(1)
            .mount(&self.server)
            .await;

        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({ "detail": TEST_LOGIN_REJECTION })),
            )
            .with_priority(10)
            .mount(&self.server)
            .await;
    }

    /// Number of requests received on `request_path`
    pub async fn request_count(&self, request_path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == request_path)
            .count()
    }

    /// Bearer credentials presented to the profile endpoint, in order
    pub async fn profile_credentials(&self) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == PROFILE_PATH)
            .filter_map(|request| {
                request
                    .headers
                    .get("authorization")
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.strip_prefix("Bearer "))
                    .map(str::to_string)
            })
            .collect()
    }

    /// Renewal credentials presented to the renewal endpoint, in order
    pub async fn renewal_credentials(&self) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == REFRESH_PATH)
            .filter_map(|request| {
                serde_json::from_slice::<Value>(&request.body)
                    .ok()
                    .and_then(|body| body["renewal_credential"].as_str().map(str::to_string))
            })
            .collect()
    }
}

/// Successful renewal body
pub fn renewal_response(access: &str, renewal: Option<&str>) -> ResponseTemplate {
    let mut body = json!({ "access_credential": access });
    if let Some(renewal) = renewal {
        body["renewal_credential"] = json!(renewal);
    }
    ResponseTemplate::new(200).set_body_json(body)
}

/// Default profile body
pub fn profile_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(test_profile())
}
