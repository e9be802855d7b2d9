//! Session lifecycle controller.
//!
//! Owns the credential store, renews the access credential before it expires
//! (and after the service rejects it), periodically re-confirms the session,
//! and publishes one [`AuthState`] for the rest of the application.
//!
//! # State machine
//!
//! ```text
//! Initializing ──restore ok──▶ Authenticated ──logout / rejection──▶ Unauthenticated
//!      │                            ▲                                     │
//!      └──no credential / rejected──┼──────────▶ Unauthenticated ─login───┘
//! ```
//!
//! `is_refreshing` is orthogonal and set for the duration of any renewal
//! exchange.
//!
//! # Failure policy
//!
//! Only an explicit rejection (401/403 on validation, a failed renewal
//! exchange) ends a session. Transport errors, 5xx responses and unreadable
//! bodies keep the session as it is (fail-open).
//!
//! # Concurrency
//!
//! - State lives in a `watch` channel; every transition is one `send_modify`.
//! - Renewals are single-flight: callers arriving while an exchange is in
//!   flight wait for it and share its outcome.
//! - A session epoch changes on login and logout. Results of network calls
//!   started under an older epoch are discarded.

use crate::config::SessionSettings;
use crate::errors::SessionError;
use crate::models::{AuthState, RefreshOutcome, UserProfile, Validation};
use crate::observability::metrics;
use crate::services::auth_client::{AuthApi, AuthApiError, TokenPair};
use crate::store::{CredentialSlot, CredentialStore};
use crate::tasks::refresh_scheduler::{refresh_delay, run_refresh_timer};
use crate::tasks::revalidator::run_revalidator;
use crate::tasks::ScheduledTask;
use common::jwt;
use common::secret::{ExposeSecret, SecretString};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// `logout()` was called.
    UserRequested,
    /// The stored session was rejected during startup.
    Rejected,
    /// The renewal exchange was refused.
    RenewalFailed,
    /// Periodic revalidation found the session invalid.
    Revoked,
}

impl LogoutReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            LogoutReason::UserRequested => "user_requested",
            LogoutReason::Rejected => "rejected",
            LogoutReason::RenewalFailed => "renewal_failed",
            LogoutReason::Revoked => "revoked",
        }
    }
}

/// Read side of the controller's state.
#[derive(Debug, Clone)]
pub struct AuthStateReceiver(watch::Receiver<AuthState>);

impl AuthStateReceiver {
    /// Snapshot of the current state.
    #[must_use]
    pub fn current(&self) -> AuthState {
        self.0.borrow().clone()
    }

    /// Wait for the next state change.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::ChannelClosed` if the controller was dropped.
    pub async fn changed(&mut self) -> Result<AuthState, SessionError> {
        self.0
            .changed()
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        Ok(self.0.borrow_and_update().clone())
    }

    /// Wait until startup validation has finished.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::ChannelClosed` if the controller was dropped.
    pub async fn wait_until_initialized(&mut self) -> Result<AuthState, SessionError> {
        self.0
            .wait_for(|state| !state.is_initializing)
            .await
            .map(|state| state.clone())
            .map_err(|_| SessionError::ChannelClosed)
    }
}

#[derive(Debug, Default)]
struct Timers {
    refresh: Option<ScheduledTask>,
    revalidate: Option<ScheduledTask>,
}

/// Outcome of restoring a stored session.
enum Restored {
    Authenticated(Option<UserProfile>),
    Rejected,
}

/// Clears `is_initializing` when dropped.
struct InitializingGuard<'a>(&'a watch::Sender<AuthState>);

impl Drop for InitializingGuard<'_> {
    fn drop(&mut self) {
        self.0
            .send_if_modified(|state| std::mem::replace(&mut state.is_initializing, false));
    }
}

/// Publishes `is_refreshing` for its lifetime.
struct RefreshingGuard<'a>(&'a watch::Sender<AuthState>);

impl<'a> RefreshingGuard<'a> {
    fn new(state: &'a watch::Sender<AuthState>) -> Self {
        state.send_if_modified(|s| !std::mem::replace(&mut s.is_refreshing, true));
        Self(state)
    }
}

impl Drop for RefreshingGuard<'_> {
    fn drop(&mut self) {
        self.0
            .send_if_modified(|state| std::mem::replace(&mut state.is_refreshing, false));
    }
}

/// Session lifecycle controller.
///
/// Construct once with [`SessionController::new`], call
/// [`initialize`](Self::initialize), share the `Arc` with consumers and call
/// [`shutdown`](Self::shutdown) on exit.
pub struct SessionController {
    settings: SessionSettings,
    store: Arc<dyn CredentialStore>,
    api: Arc<dyn AuthApi>,
    state: watch::Sender<AuthState>,

    /// Bumped on login and logout.
    epoch: AtomicU64,

    /// Serializes session transitions (epoch check + store write + state).
    /// Never held across an await.
    session_lock: Mutex<()>,

    /// Single-flight gate for renewals, holding the latest outcome.
    refresh_gate: tokio::sync::Mutex<RefreshOutcome>,
    refreshes_completed: AtomicU64,

    timers: Mutex<Timers>,
    runtime: Handle,
    self_ref: Weak<SessionController>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("settings", &self.settings)
            .field("state", &*self.state.borrow())
            .field("epoch", &self.epoch.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// Create a controller in the `Initializing` state.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Configuration` when called outside a Tokio
    /// runtime.
    pub fn new(
        settings: SessionSettings,
        store: Arc<dyn CredentialStore>,
        api: Arc<dyn AuthApi>,
    ) -> Result<Arc<Self>, SessionError> {
        let runtime = Handle::try_current().map_err(|e| {
            SessionError::Configuration(format!("session controller requires a Tokio runtime: {e}"))
        })?;
        let (state, _) = watch::channel(AuthState::initializing());

        Ok(Arc::new_cyclic(|self_ref| Self {
            settings,
            store,
            api,
            state,
            epoch: AtomicU64::new(0),
            session_lock: Mutex::new(()),
            refresh_gate: tokio::sync::Mutex::new(RefreshOutcome::retained()),
            refreshes_completed: AtomicU64::new(0),
            timers: Mutex::new(Timers::default()),
            runtime,
            self_ref: self_ref.clone(),
        }))
    }

    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> AuthStateReceiver {
        AuthStateReceiver(self.state.subscribe())
    }

    /// Currently stored access credential, for attaching to outgoing requests.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Store` if the store cannot be read.
    pub fn access_credential(&self) -> Result<Option<SecretString>, SessionError> {
        Ok(self.store.load(CredentialSlot::Access)?)
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, ()> {
        self.session_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Restore the stored session.
    ///
    /// Always ends with `is_initializing == false`.
    #[instrument(skip_all)]
    pub async fn initialize(&self) {
        let _initializing = InitializingGuard(&self.state);
        let epoch = self.current_epoch();

        let stored = match self.store.load(CredentialSlot::Access) {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                info!(target: "session.controller", "No stored session");
                return;
            }
            Err(e) => {
                warn!(
                    target: "session.controller",
                    error = %e,
                    "Failed to read credential store, starting unauthenticated"
                );
                self.end_session(Some(epoch), LogoutReason::Rejected);
                return;
            }
        };

        match self.restore(&stored).await {
            Ok(Restored::Authenticated(user)) => {
                if self.resume_session(epoch, user, None) {
                    info!(target: "session.controller", "Session restored");
                }
            }
            Ok(Restored::Rejected) => {
                info!(target: "session.controller", "Stored session rejected");
                self.end_session(Some(epoch), LogoutReason::Rejected);
            }
            Err(e) => {
                warn!(
                    target: "session.controller",
                    error = %e,
                    "Session restore failed, falling back to stored credential"
                );
                if jwt::is_expired(stored.expose_secret()) {
                    self.end_session(Some(epoch), LogoutReason::Rejected);
                } else {
                    self.resume_session(epoch, None, Some(stored));
                }
            }
        }
    }

    async fn restore(&self, stored: &SecretString) -> Result<Restored, SessionError> {
        if jwt::is_expired(stored.expose_secret()) {
            debug!(target: "session.controller", "Stored access credential expired, renewing");
            let outcome = self.renew().await;
            if !outcome.success {
                return Ok(Restored::Rejected);
            }
        }

        let validation = self.check_credential().await?;
        Ok(if validation.is_valid {
            Restored::Authenticated(validation.user)
        } else {
            Restored::Rejected
        })
    }

    /// Enter `Authenticated` for a restored session and arm both timers.
    ///
    /// `access` overrides the stored credential when the store is unreadable.
    fn resume_session(
        &self,
        epoch: u64,
        user: Option<UserProfile>,
        access: Option<SecretString>,
    ) -> bool {
        let retired = {
            let _session = self.lock_session();
            if self.current_epoch() != epoch {
                debug!(target: "session.controller", "Session changed during restore, discarding");
                return false;
            }

            let access = access.or_else(|| {
                self.store
                    .load(CredentialSlot::Access)
                    .unwrap_or_else(|e| {
                        warn!(target: "session.controller", error = %e, "Failed to read access credential");
                        None
                    })
            });

            self.state.send_modify(|state| {
                state.is_authenticated = true;
                state.is_initializing = false;
                if let Some(user) = user {
                    state.user = Some(user);
                }
            });

            self.arm_timers_locked(access.as_ref())
        };
        drop(retired);
        true
    }

    // =========================================================================
    // Login / logout
    // =========================================================================

    /// Start a session with credentials obtained elsewhere.
    ///
    /// Without a renewal credential any previously stored one is removed.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidArgument` if `access` is empty (no state change)
    /// - `SessionError::Store` if the credentials cannot be persisted
    pub fn login(
        &self,
        access: SecretString,
        renewal: Option<SecretString>,
        user: UserProfile,
    ) -> Result<(), SessionError> {
        if access.expose_secret().trim().is_empty() {
            return Err(SessionError::InvalidArgument(
                "access credential is empty".to_string(),
            ));
        }
        let renewal = renewal.filter(|r| !r.expose_secret().trim().is_empty());

        let retired = {
            let _session = self.lock_session();

            self.store.save(CredentialSlot::Access, &access)?;
            match &renewal {
                Some(renewal) => self.store.save(CredentialSlot::Renewal, renewal)?,
                None => self.store.remove(CredentialSlot::Renewal)?,
            }

            self.epoch.fetch_add(1, Ordering::SeqCst);
            self.state.send_modify(|state| {
                state.is_authenticated = true;
                state.is_initializing = false;
                state.user = Some(user);
            });

            self.arm_timers_locked(Some(&access))
        };
        drop(retired);

        info!(
            target: "session.controller",
            has_renewal = renewal.is_some(),
            "Session started"
        );
        Ok(())
    }

    /// Log in with a username and password.
    ///
    /// When the service does not return a profile it is fetched separately;
    /// if that fails too the session starts with an empty profile.
    ///
    /// # Errors
    ///
    /// - `SessionError::LoginRejected` with the service's message
    /// - `SessionError::LoginUnavailable` if the service could not be reached
    /// - `SessionError::Store` if the credentials cannot be persisted
    #[instrument(skip_all)]
    pub async fn login_with_password(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<(), SessionError> {
        if username.trim().is_empty() {
            return Err(SessionError::InvalidArgument("username is empty".to_string()));
        }

        let response = self
            .api
            .login(username, password)
            .await
            .map_err(|e| match e {
                AuthApiError::LoginRejected { detail, .. } => SessionError::LoginRejected(detail),
                other => SessionError::LoginUnavailable(other.to_string()),
            })?;

        let TokenPair { access, renewal } = response.tokens;
        let user = match response.user {
            Some(user) => user,
            None => self.api.fetch_profile(&access).await.unwrap_or_else(|e| {
                warn!(
                    target: "session.controller",
                    error = %e,
                    "Profile unavailable after login"
                );
                UserProfile::default()
            }),
        };

        self.login(access, renewal, user)
    }

    /// End the session. Idempotent.
    pub fn logout(&self) {
        self.end_session(None, LogoutReason::UserRequested);
    }

    /// Clear credentials, drop to `Unauthenticated` and cancel both timers.
    ///
    /// With `expected_epoch`, does nothing if a newer session has started.
    fn end_session(&self, expected_epoch: Option<u64>, reason: LogoutReason) -> bool {
        let (was_authenticated, retired) = {
            let _session = self.lock_session();
            if let Some(expected) = expected_epoch {
                if self.current_epoch() != expected {
                    debug!(
                        target: "session.controller",
                        reason = reason.as_str(),
                        "Session already replaced, not ending it"
                    );
                    return false;
                }
            }

            self.epoch.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = self.store.clear() {
                warn!(target: "session.controller", error = %e, "Failed to clear credential store");
            }

            let was_authenticated = self.state.send_if_modified(|state| {
                let changed = state.is_authenticated || state.user.is_some();
                state.is_authenticated = false;
                state.user = None;
                changed
            });

            (was_authenticated, self.take_timers())
        };
        drop(retired);

        if was_authenticated {
            info!(target: "session.controller", reason = reason.as_str(), "Session ended");
            metrics::record_logout(reason.as_str());
        }
        true
    }

    /// Cancel both timers. Credentials stay in the store for the next start.
    pub fn shutdown(&self) {
        let retired = self.take_timers();
        drop(retired);
        info!(target: "session.controller", "Session controller stopped");
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Check the stored access credential with the service.
    ///
    /// A rejection triggers one renewal and one retry with the new
    /// credential. Ambiguous failures report `is_valid == true` with no
    /// profile.
    #[instrument(skip_all)]
    pub async fn validate(&self) -> Validation {
        self.check_credential().await.unwrap_or_else(|e| {
            warn!(target: "session.controller", error = %e, "Validation failed, keeping session");
            metrics::record_validation("fail_open");
            Validation::fail_open()
        })
    }

    async fn check_credential(&self) -> Result<Validation, SessionError> {
        let mut renewed = false;

        loop {
            let Some(access) = self.store.load(CredentialSlot::Access)? else {
                metrics::record_validation("invalid");
                return Ok(Validation::invalid());
            };

            match self.api.fetch_profile(&access).await {
                Ok(profile) => {
                    metrics::record_validation("valid");
                    return Ok(Validation::valid(profile));
                }
                Err(e) if e.is_rejection() => {
                    if renewed {
                        warn!(
                            target: "session.controller",
                            error = %e,
                            "Renewed credential rejected"
                        );
                        metrics::record_validation("invalid");
                        return Ok(Validation::invalid());
                    }

                    debug!(target: "session.controller", "Access credential rejected, renewing");
                    let outcome = self.renew().await;
                    if outcome.should_logout {
                        metrics::record_validation("invalid");
                        return Ok(Validation::invalid());
                    }
                    if !outcome.success {
                        metrics::record_validation("fail_open");
                        return Ok(Validation::fail_open());
                    }
                    renewed = true;
                }
                Err(e) => {
                    warn!(
                        target: "session.controller",
                        error = %e,
                        "Validation inconclusive, keeping session"
                    );
                    metrics::record_validation("fail_open");
                    return Ok(Validation::fail_open());
                }
            }
        }
    }

    /// Periodic revalidation tick.
    pub(crate) async fn revalidate(&self) {
        let epoch = self.current_epoch();
        let authenticated = self.state.borrow().is_authenticated;
        if !authenticated {
            return;
        }

        let validation = self.validate().await;
        if !validation.is_valid {
            self.end_session(Some(epoch), LogoutReason::Revoked);
        } else if let Some(user) = validation.user {
            self.apply_user(epoch, user);
        }
    }

    fn apply_user(&self, epoch: u64, user: UserProfile) {
        let _session = self.lock_session();
        if self.current_epoch() != epoch {
            return;
        }
        self.state.send_if_modified(|state| {
            if !state.is_authenticated || state.user.as_ref() == Some(&user) {
                return false;
            }
            state.user = Some(user);
            true
        });
    }

    // =========================================================================
    // Renewal
    // =========================================================================

    /// Renew the access credential on behalf of a consumer.
    ///
    /// A refused renewal ends the session. Any other failure keeps the
    /// session and reports success. If the session ended or was replaced
    /// while the exchange was in flight the outcome is terminal and the
    /// current session is left alone.
    #[instrument(skip_all)]
    pub async fn refresh_token(&self) -> RefreshOutcome {
        let epoch = self.current_epoch();
        let outcome = self.renew().await;

        if self.current_epoch() != epoch {
            debug!(
                target: "session.controller",
                "Session changed during renewal, discarding outcome"
            );
            return RefreshOutcome::terminal();
        }

        if outcome.success {
            self.refresh_profile(epoch).await;
            outcome
        } else if outcome.should_logout {
            self.end_session(Some(epoch), LogoutReason::RenewalFailed);
            outcome
        } else {
            warn!(target: "session.controller", "Renewal incomplete, keeping session");
            RefreshOutcome::renewed()
        }
    }

    /// Fetch the profile with the current credential and publish it.
    async fn refresh_profile(&self, epoch: u64) {
        let access = match self.store.load(CredentialSlot::Access) {
            Ok(Some(access)) => access,
            Ok(None) => return,
            Err(e) => {
                warn!(target: "session.controller", error = %e, "Failed to read access credential");
                return;
            }
        };

        match self.api.fetch_profile(&access).await {
            Ok(user) => {
                metrics::record_validation("valid");
                self.apply_user(epoch, user);
            }
            Err(e) => {
                debug!(target: "session.controller", error = %e, "Profile refresh skipped");
            }
        }
    }

    /// Refresh timer callback.
    pub(crate) async fn on_refresh_timer(&self) {
        let epoch = self.current_epoch();
        let outcome = self.renew().await;

        if outcome.should_logout {
            self.end_session(Some(epoch), LogoutReason::RenewalFailed);
        } else if !outcome.success {
            debug!(target: "session.scheduler", "Scheduled renewal incomplete, keeping session");
        }
    }

    /// Single-flight renewal exchange.
    async fn renew(&self) -> RefreshOutcome {
        let observed = self.refreshes_completed.load(Ordering::SeqCst);
        let mut last_outcome = self.refresh_gate.lock().await;
        if self.refreshes_completed.load(Ordering::SeqCst) != observed {
            debug!(target: "session.controller", "Joined in-flight renewal");
            return *last_outcome;
        }

        let epoch = self.current_epoch();
        let started = Instant::now();
        let outcome = {
            let _refreshing = RefreshingGuard::new(&self.state);
            self.exchange(epoch).await
        };

        metrics::record_refresh(outcome.label(), started.elapsed());
        *last_outcome = outcome;
        self.refreshes_completed.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    async fn exchange(&self, epoch: u64) -> RefreshOutcome {
        let renewal = match self.store.load(CredentialSlot::Renewal) {
            Ok(Some(renewal)) => renewal,
            Ok(None) => {
                info!(target: "session.controller", "No renewal credential stored");
                return RefreshOutcome::terminal();
            }
            Err(e) => {
                warn!(target: "session.controller", error = %e, "Failed to read renewal credential");
                return RefreshOutcome::retained();
            }
        };

        match self.api.exchange_renewal(&renewal).await {
            Ok(tokens) => self.apply_renewal(epoch, &tokens),
            Err(e) => {
                warn!(target: "session.controller", error = %e, "Renewal exchange failed");
                RefreshOutcome::terminal()
            }
        }
    }

    /// Persist renewed credentials and re-arm the refresh timer.
    fn apply_renewal(&self, epoch: u64, tokens: &TokenPair) -> RefreshOutcome {
        let retired = {
            let _session = self.lock_session();
            if self.current_epoch() != epoch {
                info!(
                    target: "session.controller",
                    "Session changed during renewal, discarding credentials"
                );
                return RefreshOutcome::retained();
            }

            if let Err(e) = self.store.save(CredentialSlot::Access, &tokens.access) {
                warn!(target: "session.controller", error = %e, "Failed to store renewed credential");
                return RefreshOutcome::retained();
            }
            if let Some(renewal) = &tokens.renewal {
                if let Err(e) = self.store.save(CredentialSlot::Renewal, renewal) {
                    warn!(
                        target: "session.controller",
                        error = %e,
                        "Failed to store rotated renewal credential"
                    );
                }
            }

            let delay = refresh_delay(
                jwt::time_to_expiry(tokens.access.expose_secret()),
                self.settings.refresh_margin,
            )
            .max(self.settings.min_refresh_interval);
            self.arm_refresh_locked(delay)
        };
        drop(retired);

        info!(
            target: "session.controller",
            rotated = tokens.renewal.is_some(),
            "Access credential renewed"
        );
        RefreshOutcome::renewed()
    }

    // =========================================================================
    // Timers
    // =========================================================================

    /// Arm both timers for `access`. Returns the replaced handles so the
    /// caller can drop them outside the session lock.
    fn arm_timers_locked(&self, access: Option<&SecretString>) -> Vec<ScheduledTask> {
        let mut retired = Vec::with_capacity(2);
        if let Some(access) = access {
            let delay = refresh_delay(
                jwt::time_to_expiry(access.expose_secret()),
                self.settings.refresh_margin,
            );
            retired.extend(self.arm_refresh_locked(delay));
        }

        let controller = self.self_ref.clone();
        let period = self.settings.revalidate_interval;
        let task = ScheduledTask::spawn(&self.runtime, move |cancel_token| {
            run_revalidator(controller, period, cancel_token)
        });
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        retired.extend(timers.revalidate.replace(task));
        retired
    }

    fn arm_refresh_locked(&self, delay: Duration) -> Option<ScheduledTask> {
        debug!(
            target: "session.scheduler",
            delay_secs = delay.as_secs(),
            "Refresh scheduled"
        );

        let controller = self.self_ref.clone();
        let task = ScheduledTask::spawn(&self.runtime, move |cancel_token| {
            run_refresh_timer(controller, delay, cancel_token)
        });
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        timers.refresh.replace(task)
    }

    fn take_timers(&self) -> Timers {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *timers)
    }

    /// Whether a refresh timer is armed and still waiting.
    #[must_use]
    pub fn refresh_scheduled(&self) -> bool {
        let timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        timers
            .refresh
            .as_ref()
            .is_some_and(|task| !task.is_cancelled() && !task.is_finished())
    }

    /// Whether the revalidator is running.
    #[must_use]
    pub fn revalidation_active(&self) -> bool {
        let timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        timers
            .revalidate
            .as_ref()
            .is_some_and(|task| !task.is_cancelled() && !task.is_finished())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::services::auth_client::mock::MockAuthApi;
    use crate::store::{MemoryCredentialStore, StoreError};
    use common::secret::SecretString;
    use serde_json::json;
    use session_test_utils::credential_expiring_in as credential;

    fn profile(name: &str) -> UserProfile {
        UserProfile::from_value(json!({ "name": name })).unwrap()
    }

    fn controller_with(
        store: Arc<MemoryCredentialStore>,
        api: MockAuthApi,
    ) -> (Arc<SessionController>, Arc<MockAuthApi>) {
        let api = Arc::new(api);
        let controller =
            SessionController::new(SessionSettings::default(), store, api.clone()).unwrap();
        (controller, api)
    }

    fn stored(store: &MemoryCredentialStore, slot: CredentialSlot) -> Option<String> {
        store
            .load(slot)
            .unwrap()
            .map(|s| s.expose_secret().to_string())
    }

    #[test]
    fn test_new_requires_runtime() {
        let result = SessionController::new(
            SessionSettings::default(),
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(MockAuthApi::accepting()),
        );
        assert!(matches!(result, Err(SessionError::Configuration(_))));
    }

    #[test]
    fn test_logout_reason_labels() {
        assert_eq!(LogoutReason::UserRequested.as_str(), "user_requested");
        assert_eq!(LogoutReason::RenewalFailed.as_str(), "renewal_failed");
    }

    #[tokio::test]
    async fn test_initial_state_is_initializing() {
        let (controller, _) =
            controller_with(Arc::new(MemoryCredentialStore::new()), MockAuthApi::accepting());
        let state = controller.state();
        assert!(state.is_initializing);
        assert!(!state.is_authenticated);
    }

    #[tokio::test]
    async fn test_initialize_without_credential() {
        let (controller, api) =
            controller_with(Arc::new(MemoryCredentialStore::new()), MockAuthApi::accepting());

        controller.initialize().await;

        let state = controller.state();
        assert!(!state.is_initializing);
        assert!(!state.is_authenticated);
        assert_eq!(api.profile_calls(), 0);
        assert!(!controller.revalidation_active());
    }

    #[tokio::test]
    async fn test_login_persists_and_authenticates() {
        let store = Arc::new(MemoryCredentialStore::new());
        let (controller, _) = controller_with(store.clone(), MockAuthApi::accepting());
        let access = credential(3600);

        controller
            .login(
                SecretString::from(access.clone()),
                Some(SecretString::from("renewal-1")),
                profile("Kim"),
            )
            .unwrap();

        let state = controller.state();
        assert!(state.is_authenticated);
        assert_eq!(state.user, Some(profile("Kim")));
        assert_eq!(stored(&store, CredentialSlot::Access), Some(access));
        assert_eq!(
            stored(&store, CredentialSlot::Renewal),
            Some("renewal-1".to_string())
        );
        assert!(controller.refresh_scheduled());
        assert!(controller.revalidation_active());
    }

    #[tokio::test]
    async fn test_login_without_renewal_removes_stale_renewal() {
        let store = Arc::new(MemoryCredentialStore::new());
        store
            .save(CredentialSlot::Renewal, &SecretString::from("old-renewal"))
            .unwrap();
        let (controller, _) = controller_with(store.clone(), MockAuthApi::accepting());

        controller
            .login(SecretString::from(credential(3600)), None, profile("Kim"))
            .unwrap();

        assert!(stored(&store, CredentialSlot::Renewal).is_none());
    }

    #[tokio::test]
    async fn test_login_rejects_empty_access() {
        let store = Arc::new(MemoryCredentialStore::new());
        let (controller, _) = controller_with(store.clone(), MockAuthApi::accepting());
        controller.initialize().await;
        let before = controller.state();

        let result = controller.login(SecretString::from(""), None, profile("Kim"));

        assert!(matches!(result, Err(SessionError::InvalidArgument(_))));
        assert_eq!(controller.state(), before);
        assert!(stored(&store, CredentialSlot::Access).is_none());
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let store = Arc::new(MemoryCredentialStore::new());
        let (controller, _) = controller_with(store.clone(), MockAuthApi::accepting());
        controller
            .login(
                SecretString::from(credential(3600)),
                Some(SecretString::from("renewal-1")),
                profile("Kim"),
            )
            .unwrap();

        controller.logout();
        controller.logout();

        let state = controller.state();
        assert!(!state.is_authenticated);
        assert!(state.user.is_none());
        assert!(stored(&store, CredentialSlot::Access).is_none());
        assert!(stored(&store, CredentialSlot::Renewal).is_none());
        assert!(!controller.refresh_scheduled());
        assert!(!controller.revalidation_active());
    }

    #[tokio::test]
    async fn test_refresh_without_renewal_is_terminal() {
        let store = Arc::new(MemoryCredentialStore::new());
        let (controller, api) = controller_with(store.clone(), MockAuthApi::accepting());
        controller
            .login(SecretString::from(credential(3600)), None, profile("Kim"))
            .unwrap();

        let outcome = controller.refresh_token().await;

        assert_eq!(outcome, RefreshOutcome::terminal());
        assert_eq!(api.renewal_calls(), 0);
        assert!(!controller.state().is_authenticated);
    }

    #[tokio::test]
    async fn test_validate_transport_failure_keeps_state() {
        let store = Arc::new(MemoryCredentialStore::new());
        let (controller, _) = controller_with(store.clone(), MockAuthApi::unreachable());
        controller
            .login(
                SecretString::from(credential(3600)),
                Some(SecretString::from("renewal-1")),
                profile("Kim"),
            )
            .unwrap();

        let validation = controller.validate().await;

        assert_eq!(validation, Validation::fail_open());
        let state = controller.state();
        assert!(state.is_authenticated);
        assert_eq!(state.user, Some(profile("Kim")));
    }

    #[tokio::test]
    async fn test_validate_rejection_renews_once_and_retries() {
        let store = Arc::new(MemoryCredentialStore::new());
        let first = credential(3600);
        let renewed = credential(7200);
        let renewed_for_api = renewed.clone();
        let first_for_api = first.clone();
        let api = MockAuthApi::accepting()
            .with_profile(move |_, access| {
                if access == first_for_api {
                    Err(AuthApiError::Rejected(403))
                } else {
                    Ok(UserProfile::from_value(json!({"name": "Lee"})).unwrap())
                }
            })
            .with_renewal(move |_| {
                Ok(TokenPair {
                    access: SecretString::from(renewed_for_api.clone()),
                    renewal: None,
                })
            });
        let (controller, api) = controller_with(store.clone(), api);
        controller
            .login(
                SecretString::from(first.clone()),
                Some(SecretString::from("renewal-1")),
                profile("Kim"),
            )
            .unwrap();

        let validation = controller.validate().await;

        assert_eq!(validation, Validation::valid(profile("Lee")));
        assert_eq!(api.renewal_calls(), 1);
        assert_eq!(api.profile_credentials(), vec![first, renewed.clone()]);
        assert_eq!(stored(&store, CredentialSlot::Access), Some(renewed));
        // Renewal slot untouched when the service does not rotate it
        assert_eq!(
            stored(&store, CredentialSlot::Renewal),
            Some("renewal-1".to_string())
        );
    }

    #[tokio::test]
    async fn test_validate_second_rejection_is_invalid() {
        let store = Arc::new(MemoryCredentialStore::new());
        let api = MockAuthApi::accepting()
            .with_profile(|_, _| Err(AuthApiError::Rejected(401)))
            .with_renewal(|_| {
                Ok(TokenPair {
                    access: SecretString::from(credential(3600)),
                    renewal: Some(SecretString::from("renewal-2")),
                })
            });
        let (controller, api) = controller_with(store, api);
        controller
            .login(
                SecretString::from(credential(3600)),
                Some(SecretString::from("renewal-1")),
                profile("Kim"),
            )
            .unwrap();

        let validation = controller.validate().await;

        assert_eq!(validation, Validation::invalid());
        assert_eq!(api.renewal_calls(), 1);
        assert_eq!(api.profile_calls(), 2);
    }

    #[tokio::test]
    async fn test_refresh_token_updates_user() {
        let store = Arc::new(MemoryCredentialStore::new());
        let api = MockAuthApi::accepting()
            .with_profile(|_, _| Ok(UserProfile::from_value(json!({"name": "Park"})).unwrap()))
            .with_renewal(|_| {
                Ok(TokenPair {
                    access: SecretString::from(credential(3600)),
                    renewal: Some(SecretString::from("renewal-2")),
                })
            });
        let (controller, _) = controller_with(store.clone(), api);
        controller
            .login(
                SecretString::from(credential(3600)),
                Some(SecretString::from("renewal-1")),
                profile("Kim"),
            )
            .unwrap();

        let outcome = controller.refresh_token().await;

        assert_eq!(outcome, RefreshOutcome::renewed());
        let state = controller.state();
        assert!(state.is_authenticated);
        assert!(!state.is_refreshing);
        assert_eq!(state.user, Some(profile("Park")));
        assert_eq!(
            stored(&store, CredentialSlot::Renewal),
            Some("renewal-2".to_string())
        );
    }

    #[tokio::test]
    async fn test_renewal_after_logout_is_discarded() {
        let store = Arc::new(MemoryCredentialStore::new());
        let api = MockAuthApi::accepting()
            .with_renewal_delay(Duration::from_millis(50))
            .with_renewal(|_| {
                Ok(TokenPair {
                    access: SecretString::from(credential(3600)),
                    renewal: None,
                })
            });
        let (controller, _) = controller_with(store.clone(), api);
        controller
            .login(
                SecretString::from(credential(3600)),
                Some(SecretString::from("renewal-1")),
                profile("Kim"),
            )
            .unwrap();

        let refreshing = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.refresh_token().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.logout();
        let outcome = refreshing.await.unwrap();

        assert_eq!(outcome, RefreshOutcome::terminal());
        assert!(!controller.state().is_authenticated);
        assert!(stored(&store, CredentialSlot::Access).is_none());
        assert!(!controller.refresh_scheduled());
    }

    #[tokio::test]
    async fn test_login_with_password_fetches_missing_profile() {
        let store = Arc::new(MemoryCredentialStore::new());
        let api = MockAuthApi::accepting()
            .with_login(|username, password| {
                assert_eq!(username, "01012345678");
                assert_eq!(password, "hunter2");
                Ok(crate::services::auth_client::LoginResponse {
                    tokens: TokenPair {
                        access: SecretString::from(credential(3600)),
                        renewal: None,
                    },
                    user: None,
                })
            })
            .with_profile(|_, _| Ok(UserProfile::from_value(json!({"name": "Kim"})).unwrap()));
        let (controller, api) = controller_with(store, api);

        controller
            .login_with_password("01012345678", &SecretString::from("hunter2"))
            .await
            .unwrap();

        assert_eq!(api.login_calls(), 1);
        assert_eq!(api.profile_calls(), 1);
        assert_eq!(controller.state().user, Some(profile("Kim")));
    }

    #[tokio::test]
    async fn test_login_with_password_maps_errors() {
        let (controller, _) =
            controller_with(Arc::new(MemoryCredentialStore::new()), MockAuthApi::accepting());
        let result = controller
            .login_with_password("01012345678", &SecretString::from("wrong"))
            .await;
        assert!(matches!(result, Err(SessionError::LoginRejected(ref d)) if d == "Login failed"));

        let (controller, _) =
            controller_with(Arc::new(MemoryCredentialStore::new()), MockAuthApi::unreachable());
        let result = controller
            .login_with_password("01012345678", &SecretString::from("hunter2"))
            .await;
        assert!(matches!(result, Err(SessionError::LoginUnavailable(_))));
        assert!(!controller.state().is_authenticated);
    }

    /// Store whose reads always fail.
    struct BrokenStore;

    impl CredentialStore for BrokenStore {
        fn load(&self, _slot: CredentialSlot) -> Result<Option<SecretString>, StoreError> {
            Err(StoreError::Io("disk unavailable".to_string()))
        }

        fn save(&self, _slot: CredentialSlot, _value: &SecretString) -> Result<(), StoreError> {
            Err(StoreError::Io("disk unavailable".to_string()))
        }

        fn remove(&self, _slot: CredentialSlot) -> Result<(), StoreError> {
            Err(StoreError::Io("disk unavailable".to_string()))
        }
    }

    /// Memory store that fails reads of one slot, or every read after a
    /// number of successful ones.
    struct FlakyStore {
        inner: MemoryCredentialStore,
        reads_left: std::sync::atomic::AtomicUsize,
        unreadable: Option<CredentialSlot>,
    }

    impl FlakyStore {
        fn failing_after_reads(reads: usize) -> Self {
            Self {
                inner: MemoryCredentialStore::new(),
                reads_left: std::sync::atomic::AtomicUsize::new(reads),
                unreadable: None,
            }
        }

        fn unreadable_slot(slot: CredentialSlot) -> Self {
            Self {
                inner: MemoryCredentialStore::new(),
                reads_left: std::sync::atomic::AtomicUsize::new(usize::MAX),
                unreadable: Some(slot),
            }
        }
    }

    impl CredentialStore for FlakyStore {
        fn load(&self, slot: CredentialSlot) -> Result<Option<SecretString>, StoreError> {
            let budget_spent = self
                .reads_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err();
            if budget_spent || self.unreadable == Some(slot) {
                return Err(StoreError::Io("read failed".to_string()));
            }
            self.inner.load(slot)
        }

        fn save(&self, slot: CredentialSlot, value: &SecretString) -> Result<(), StoreError> {
            self.inner.save(slot, value)
        }

        fn remove(&self, slot: CredentialSlot) -> Result<(), StoreError> {
            self.inner.remove(slot)
        }
    }

    #[tokio::test]
    async fn test_initialize_falls_back_to_unexpired_stored_credential() {
        // First read succeeds, validation's read fails
        let store = Arc::new(FlakyStore::failing_after_reads(1));
        store
            .save(CredentialSlot::Access, &SecretString::from(credential(3600)))
            .unwrap();
        let api = Arc::new(MockAuthApi::accepting());
        let controller =
            SessionController::new(SessionSettings::default(), store, api.clone()).unwrap();

        controller.initialize().await;

        let state = controller.state();
        assert!(!state.is_initializing);
        assert!(state.is_authenticated);
        assert!(state.user.is_none());
        assert_eq!(api.profile_calls(), 0);
        assert!(controller.refresh_scheduled());
        assert!(controller.revalidation_active());
    }

    #[tokio::test]
    async fn test_refresh_token_keeps_session_when_renewal_unreadable() {
        let store = Arc::new(FlakyStore::unreadable_slot(CredentialSlot::Renewal));
        let api = Arc::new(MockAuthApi::accepting());
        let controller =
            SessionController::new(SessionSettings::default(), store.clone(), api.clone())
                .unwrap();
        controller
            .login(
                SecretString::from(credential(3600)),
                Some(SecretString::from("renewal-1")),
                profile("Kim"),
            )
            .unwrap();

        let outcome = controller.refresh_token().await;

        assert_eq!(outcome, RefreshOutcome::renewed());
        assert_eq!(api.renewal_calls(), 0);
        let state = controller.state();
        assert!(state.is_authenticated);
        assert_eq!(state.user, Some(profile("Kim")));
        assert!(store.load(CredentialSlot::Access).unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_renewal_incomplete_keeps_session() {
        let store = Arc::new(FlakyStore::unreadable_slot(CredentialSlot::Renewal));
        let api = Arc::new(MockAuthApi::accepting());
        let controller =
            SessionController::new(SessionSettings::default(), store.clone(), api.clone())
                .unwrap();
        controller
            .login(
                SecretString::from(credential(100)),
                Some(SecretString::from("renewal-1")),
                profile("Kim"),
            )
            .unwrap();

        // Inside the margin, so the timer fires right away
        tokio::time::sleep(Duration::from_secs(1)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(api.renewal_calls(), 0);
        assert!(controller.state().is_authenticated);
        assert!(store.load(CredentialSlot::Access).unwrap().is_some());
        assert!(controller.revalidation_active());
    }

    #[tokio::test]
    async fn test_renewal_across_relogin_leaves_new_session() {
        let store = Arc::new(MemoryCredentialStore::new());
        let api = MockAuthApi::accepting()
            .with_renewal_delay(Duration::from_millis(50))
            .with_renewal(|_| {
                Ok(TokenPair {
                    access: SecretString::from(credential(3600)),
                    renewal: None,
                })
            });
        let (controller, _) = controller_with(store.clone(), api);
        controller
            .login(
                SecretString::from(credential(3600)),
                Some(SecretString::from("renewal-1")),
                profile("Kim"),
            )
            .unwrap();

        let refreshing = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.refresh_token().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = credential(7200);
        controller
            .login(
                SecretString::from(second.clone()),
                Some(SecretString::from("renewal-b")),
                profile("Lee"),
            )
            .unwrap();

        assert_eq!(refreshing.await.unwrap(), RefreshOutcome::terminal());
        let state = controller.state();
        assert!(state.is_authenticated);
        assert_eq!(state.user, Some(profile("Lee")));
        assert_eq!(stored(&store, CredentialSlot::Access), Some(second));
        assert_eq!(
            stored(&store, CredentialSlot::Renewal),
            Some("renewal-b".to_string())
        );
    }

    #[tokio::test]
    async fn test_login_before_initialize_clears_initializing() {
        let (controller, _) =
            controller_with(Arc::new(MemoryCredentialStore::new()), MockAuthApi::accepting());

        controller
            .login(SecretString::from(credential(3600)), None, profile("Kim"))
            .unwrap();

        let state = controller.state();
        assert!(state.is_authenticated);
        assert!(!state.is_initializing);
        assert_eq!(state.access_decision(), crate::models::AccessDecision::Granted);
    }

    #[tokio::test]
    async fn test_restore_publishes_authenticated_and_initialized() {
        let store = Arc::new(MemoryCredentialStore::new());
        store
            .save(CredentialSlot::Access, &SecretString::from(credential(3600)))
            .unwrap();
        let (controller, _) = controller_with(store, MockAuthApi::accepting());
        let mut receiver = controller.subscribe();

        controller.initialize().await;

        let state = receiver.changed().await.unwrap();
        assert!(state.is_authenticated);
        assert!(!state.is_initializing);
        assert_eq!(state.access_decision(), crate::models::AccessDecision::Granted);
    }

    #[tokio::test]
    async fn test_initialize_with_broken_store_ends_unauthenticated() {
        let controller = SessionController::new(
            SessionSettings::default(),
            Arc::new(BrokenStore),
            Arc::new(MockAuthApi::accepting()),
        )
        .unwrap();

        controller.initialize().await;

        let state = controller.state();
        assert!(!state.is_initializing);
        assert!(!state.is_authenticated);
    }

    #[tokio::test]
    async fn test_login_surfaces_store_errors() {
        let controller = SessionController::new(
            SessionSettings::default(),
            Arc::new(BrokenStore),
            Arc::new(MockAuthApi::accepting()),
        )
        .unwrap();

        let result = controller.login(SecretString::from(credential(3600)), None, profile("Kim"));

        assert!(matches!(result, Err(SessionError::Store(_))));
        assert!(!controller.state().is_authenticated);
    }

    #[tokio::test]
    async fn test_subscribe_sees_transitions() {
        let (controller, _) =
            controller_with(Arc::new(MemoryCredentialStore::new()), MockAuthApi::accepting());
        let mut receiver = controller.subscribe();

        controller.initialize().await;
        let state = receiver.wait_until_initialized().await.unwrap();
        assert!(!state.is_authenticated);

        controller
            .login(SecretString::from(credential(3600)), None, profile("Kim"))
            .unwrap();
        let state = receiver.changed().await.unwrap();
        assert!(state.is_authenticated);
    }
}
