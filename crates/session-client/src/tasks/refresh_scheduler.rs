//! Proactive renewal timer.
//!
//! A single one-shot timer per session, armed on login, on restore, and after
//! every successful renewal. It fires `margin` before the access credential
//! expires; a credential already inside the margin is renewed immediately.

use crate::controller::SessionController;
use std::sync::Weak;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Delay before renewing a credential that expires in `time_to_expiry`.
///
/// Zero when the credential is already within `margin` of expiry.
#[must_use]
pub fn refresh_delay(time_to_expiry: Duration, margin: Duration) -> Duration {
    time_to_expiry.saturating_sub(margin)
}

/// Wait `delay`, then hand control to the controller.
///
/// Cancellation before the deadline ends the task without renewing.
#[instrument(skip_all, name = "session.task.refresh_timer")]
pub(crate) async fn run_refresh_timer(
    controller: Weak<SessionController>,
    delay: Duration,
    cancel_token: CancellationToken,
) {
    tokio::select! {
        biased;
        () = cancel_token.cancelled() => {
            debug!(target: "session.scheduler", "Refresh timer cancelled");
            return;
        }
        () = tokio::time::sleep(delay) => {}
    }

    let Some(controller) = controller.upgrade() else {
        return;
    };

    debug!(target: "session.scheduler", "Refresh timer fired");
    controller.on_refresh_timer().await;
}
