//! Renewal timer and periodic revalidation tests.
//!
//! Run on a paused clock: `tokio::time::sleep` in the test body advances
//! virtual time and fires every timer due before it.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::secret::{ExposeSecret, SecretString};
use session_client::config::SessionSettings;
use session_client::services::auth_client::mock::MockAuthApi;
use session_client::services::{AuthApiError, TokenPair};
use session_client::store::{CredentialSlot, CredentialStore, MemoryCredentialStore};
use session_client::{SessionController, UserProfile};
use session_test_utils::*;
use std::sync::Arc;
use std::time::Duration;

fn start(
    api: MockAuthApi,
) -> (Arc<SessionController>, Arc<MockAuthApi>, Arc<MemoryCredentialStore>) {
    let api = Arc::new(api);
    let store = Arc::new(MemoryCredentialStore::new());
    let controller =
        SessionController::new(SessionSettings::default(), store.clone(), api.clone()).unwrap();
    (controller, api, store)
}

fn login(controller: &SessionController, access_lifetime_secs: i64) {
    controller
        .login(
            TestCredentialBuilder::new()
                .expires_in(access_lifetime_secs)
                .build_secret(),
            Some(SecretString::from(TEST_RENEWAL_CREDENTIAL)),
            UserProfile::default(),
        )
        .unwrap();
}

fn issues_fresh_credentials() -> MockAuthApi {
    MockAuthApi::accepting().with_renewal(|call| {
        Ok(TokenPair {
            access: SecretString::from(credential_expiring_in(3600)),
            renewal: Some(SecretString::from(format!("renewal-{}", call + 2))),
        })
    })
}

async fn advance(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
    // Let woken tasks run to their next suspension point
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Refresh timer
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_credential_inside_margin_renews_immediately() {
    let (controller, api, store) = start(issues_fresh_credentials());

    login(&controller, 100);
    advance(1).await;

    assert_eq!(api.renewal_calls(), 1);
    assert_eq!(api.renewal_credentials(), vec![TEST_RENEWAL_CREDENTIAL]);
    let rotated = store.load(CredentialSlot::Renewal).unwrap().unwrap();
    assert_eq!(rotated.expose_secret(), "renewal-2");
    assert!(controller.state().is_authenticated);

    // Re-armed against the new credential's expiry
    assert!(controller.refresh_scheduled());
    advance(1000).await;
    assert_eq!(api.renewal_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_fires_margin_before_expiry() {
    let (controller, api, _store) = start(issues_fresh_credentials());

    login(&controller, 1000);

    advance(650).await;
    assert_eq!(api.renewal_calls(), 0);

    advance(52).await;
    assert_eq!(api.renewal_calls(), 1);
    assert!(controller.state().is_authenticated);
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_renewal_refused_logs_out() {
    let (controller, api, store) = start(MockAuthApi::accepting());

    login(&controller, 100);
    advance(1).await;

    assert_eq!(api.renewal_calls(), 1);
    let state = controller.state();
    assert!(!state.is_authenticated);
    assert!(state.user.is_none());
    assert!(store.load(CredentialSlot::Access).unwrap().is_none());
    assert!(!controller.refresh_scheduled());
    assert!(!controller.revalidation_active());
}

#[tokio::test(start_paused = true)]
async fn test_logout_cancels_both_timers() {
    let (controller, api, _store) = start(issues_fresh_credentials());

    login(&controller, 1000);
    assert!(controller.refresh_scheduled());
    assert!(controller.revalidation_active());

    controller.logout();
    assert!(!controller.refresh_scheduled());
    assert!(!controller.revalidation_active());

    advance(2000).await;
    assert_eq!(api.renewal_calls(), 0);
    assert_eq!(api.profile_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_relogin_replaces_pending_timer() {
    let (controller, api, _store) = start(issues_fresh_credentials());

    login(&controller, 400);
    login(&controller, 3600);

    // The first session's timer would have fired at 100s
    advance(200).await;
    assert_eq!(api.renewal_calls(), 0);
}

// ============================================================================
// Periodic revalidation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_revalidation_waits_a_full_period() {
    let (controller, api, _store) = start(MockAuthApi::accepting());

    login(&controller, 3600);

    advance(599).await;
    assert_eq!(api.profile_calls(), 0);

    advance(2).await;
    assert_eq!(api.profile_calls(), 1);

    advance(600).await;
    assert_eq!(api.profile_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_revalidation_rejection_logs_out() {
    let api = MockAuthApi::accepting().with_profile(|_, _| Err(AuthApiError::Rejected(401)));
    let (controller, api, store) = start(api);

    login(&controller, 3600);
    advance(601).await;

    // One renewal attempt after the rejection, refused
    assert_eq!(api.renewal_calls(), 1);
    assert!(!controller.state().is_authenticated);
    assert!(store.load(CredentialSlot::Access).unwrap().is_none());
    assert!(!controller.revalidation_active());
}

#[tokio::test(start_paused = true)]
async fn test_revalidation_transport_failure_keeps_session() {
    let (controller, api, store) = start(MockAuthApi::unreachable());

    login(&controller, 3600);
    advance(601).await;

    assert_eq!(api.profile_calls(), 1);
    assert_eq!(api.renewal_calls(), 0);
    assert!(controller.state().is_authenticated);
    assert!(store.load(CredentialSlot::Access).unwrap().is_some());
    assert!(controller.revalidation_active());
}

#[tokio::test(start_paused = true)]
async fn test_revalidation_publishes_updated_profile() {
    let api = MockAuthApi::accepting().with_profile(|_, _| {
        Ok(UserProfile::from_value(test_profile()).unwrap())
    });
    let (controller, _api, _store) = start(api);

    login(&controller, 3600);
    assert_eq!(controller.state().user, Some(UserProfile::default()));

    advance(601).await;
    assert_eq!(
        controller.state().user,
        Some(UserProfile::from_value(test_profile()).unwrap())
    );
}
