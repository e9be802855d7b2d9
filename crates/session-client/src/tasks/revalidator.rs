//! Periodic session revalidation.
//!
//! While a session is active the controller re-confirms it with the
//! authentication service on a fixed cadence. The first check happens one
//! full period after arming, never immediately.

use crate::controller::SessionController;
use std::sync::Weak;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Run revalidation every `period` until cancelled or the controller is
/// dropped.
#[instrument(skip_all, name = "session.task.revalidator")]
pub(crate) async fn run_revalidator(
    controller: Weak<SessionController>,
    period: Duration,
    cancel_token: CancellationToken,
) {
    debug!(
        target: "session.revalidator",
        period_secs = period.as_secs(),
        "Starting revalidator"
    );

    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    // A suspended host should trigger one check on wake, not a burst
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel_token.cancelled() => break,
            _ = interval.tick() => {}
        }

        let Some(controller) = controller.upgrade() else {
            break;
        };
        controller.revalidate().await;
    }

    debug!(target: "session.revalidator", "Revalidator stopped");
}
