//! Startup and shutdown wiring for replication rounds.
//!
//! [`ReplicationLifecycle`] starts the replication queue and, when the
//! server is booting and the configuration asks for it, schedules one full
//! push round after a grace period. Stopping cancels that round on a
//! best-effort basis and stops the queue.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info};

use crate::config::ConfigProvider;
use crate::filter::ReplicationFilter;
use crate::processing::PushResultProcessing;
use crate::queue::{QueueError, ScheduledTask, WorkQueue};
use crate::state::ReplicationState;

/// Grace period between server startup and the startup push round.
pub const STARTUP_PUSH_DELAY: Duration = Duration::from_secs(30);

/// Future returned by push operations.
pub type PushFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Phase of the hosting server's lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServerState {
    /// The server is booting.
    Startup,
    /// The server is serving requests.
    Running,
    /// The server is shutting down.
    Shutdown,
}

/// Enumerates destinations and pushes matching refs to them.
///
/// Implementations register every push task on `state` before running it,
/// report each outcome back, and call
/// [`ReplicationState::mark_all_push_tasks_scheduled`] once enumeration is
/// complete.
pub trait PushAll: Send + Sync {
    /// Pushes every ref of every project selected by `filter`.
    fn push_all(&self, filter: ReplicationFilter, state: Arc<ReplicationState>) -> PushFuture<'_>;
}

/// Starts and stops replication alongside the hosting server.
pub struct ReplicationLifecycle {
    queue: WorkQueue,
    config: Arc<dyn ConfigProvider>,
    pusher: Arc<dyn PushAll>,
    processing: Arc<dyn PushResultProcessing>,
    startup_delay: Duration,
    pending_round: Mutex<Option<ScheduledTask>>,
}

impl ReplicationLifecycle {
    /// Wires the lifecycle to its collaborators. `processing` receives the
    /// notifications of the startup round.
    #[must_use]
    pub fn new(
        queue: WorkQueue,
        config: Arc<dyn ConfigProvider>,
        pusher: Arc<dyn PushAll>,
        processing: Arc<dyn PushResultProcessing>,
    ) -> Self {
        Self {
            queue,
            config,
            pusher,
            processing,
            startup_delay: STARTUP_PUSH_DELAY,
            pending_round: Mutex::new(None),
        }
    }

    /// Overrides the grace period before the startup round.
    #[must_use]
    pub const fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// Starts the replication queue and schedules the startup round when
    /// `server_state` is [`ServerState::Startup`] and replication on startup
    /// is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] when the round cannot be scheduled.
    pub fn start(&self, server_state: ServerState) -> Result<(), QueueError> {
        self.queue.start();
        if server_state != ServerState::Startup || !self.config.current().replicate_on_startup() {
            debug!(?server_state, "no startup replication round scheduled");
            return Ok(());
        }

        let state = Arc::new(ReplicationState::new(Arc::clone(&self.processing)));
        let pusher = Arc::clone(&self.pusher);
        let task = self.queue.schedule(self.startup_delay, async move {
            pusher.push_all(ReplicationFilter::All, state).await;
        })?;
        if let Some(previous) = self.lock_round().replace(task)
            && previous.cancel()
        {
            debug!("replaced a pending startup replication round");
        }
        info!(
            delay_secs = self.startup_delay.as_secs(),
            "startup replication round scheduled"
        );
        Ok(())
    }

    /// Cancels the startup round if one is pending or running, then stops
    /// the queue. Does not wait for in-flight pushes to finish.
    pub fn stop(&self) {
        if let Some(round) = self.lock_round().take()
            && !round.cancel()
        {
            debug!("startup replication round already finished");
        }
        self.queue.stop();
    }

    /// Reports whether a startup round is still pending or running.
    #[must_use]
    pub fn has_pending_round(&self) -> bool {
        self.lock_round()
            .as_ref()
            .is_some_and(|round| !round.is_finished() && !round.is_cancelled())
    }

    fn lock_round(&self) -> MutexGuard<'_, Option<ScheduledTask>> {
        self.pending_round
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
