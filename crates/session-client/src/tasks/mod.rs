//! Background timers owned by the session controller.
//!
//! # Tasks
//!
//! - `refresh_scheduler` - one-shot timer that renews the access credential
//!   a fixed margin before it expires
//! - `revalidator` - fixed-cadence re-confirmation of the session
//!
//! Both run as [`ScheduledTask`]s. A task holds only a `Weak` reference to the
//! controller and exits once the controller is gone.

pub mod refresh_scheduler;
pub mod revalidator;

pub use refresh_scheduler::refresh_delay;

use std::future::Future;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handle to a spawned timer task.
///
/// Dropping the handle cancels the task. Cancellation only interrupts the
/// wait; work the task already started (a renewal, a validation) runs to
/// completion.
#[derive(Debug)]
pub struct ScheduledTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Spawn `task` on `runtime`, handing it the cancellation token.
    pub(crate) fn spawn<F, Fut>(runtime: &Handle, task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = runtime.spawn(task(cancel.clone()));
        Self { cancel, handle }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
