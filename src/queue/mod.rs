//! Named task queues with delayed and fixed-rate scheduling.
//!
//! A [`WorkQueue`] spawns work on a captured Tokio runtime handle. Every task
//! it schedules is tied to the queue's root cancellation token, so stopping
//! the queue cancels everything still pending on it.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Errors raised when scheduling work.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum QueueError {
    /// Raised when work is submitted to a queue that is not running.
    #[error("work queue {queue} is not running")]
    NotRunning {
        /// Name of the queue.
        queue: String,
    },
    /// Raised when a fixed-rate task is given a zero period.
    #[error("work queue {queue} rejected a zero scheduling period")]
    ZeroPeriod {
        /// Name of the queue.
        queue: String,
    },
    /// Raised when no Tokio runtime is available to run the queue.
    #[error("no async runtime available for work queue {queue}: {message}")]
    NoRuntime {
        /// Name of the queue.
        queue: String,
        /// Runtime lookup failure.
        message: String,
    },
}

/// A named queue that runs scheduled work on a Tokio runtime.
#[derive(Debug)]
pub struct WorkQueue {
    name: String,
    handle: Handle,
    root: Mutex<Option<CancellationToken>>,
}

impl WorkQueue {
    /// Creates a stopped queue named `name` that spawns on `handle`.
    #[must_use]
    pub fn new(name: impl Into<String>, handle: Handle) -> Self {
        Self {
            name: name.into(),
            handle,
            root: Mutex::new(None),
        }
    }

    /// Creates a stopped queue bound to the runtime of the calling context.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NoRuntime`] when called outside a Tokio runtime.
    pub fn current(name: impl Into<String>) -> Result<Self, QueueError> {
        let queue_name = name.into();
        let handle = Handle::try_current().map_err(|err| QueueError::NoRuntime {
            queue: queue_name.clone(),
            message: err.to_string(),
        })?;
        Ok(Self::new(queue_name, handle))
    }

    /// Returns the queue name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts accepting work. Starting a running queue is a no-op.
    pub fn start(&self) {
        let mut root = self.lock_root();
        if root.as_ref().is_some_and(|token| !token.is_cancelled()) {
            return;
        }
        *root = Some(CancellationToken::new());
        debug!(queue = %self.name, "work queue started");
    }

    /// Cancels all pending and running work and stops accepting new work.
    pub fn stop(&self) {
        if let Some(token) = self.lock_root().take() {
            token.cancel();
            debug!(queue = %self.name, "work queue stopped");
        }
    }

    /// Reports whether the queue currently accepts work.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock_root()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    /// Runs `work` once after `delay`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotRunning`] when the queue is stopped.
    pub fn schedule<W>(&self, delay: Duration, work: W) -> Result<ScheduledTask, QueueError>
    where
        W: Future<Output = ()> + Send + 'static,
    {
        let token = self.child_token()?;
        let task_token = token.clone();
        let handle = self.handle.spawn(async move {
            tokio::select! {
                biased;
                () = task_token.cancelled() => {}
                () = async {
                    time::sleep(delay).await;
                    work.await;
                } => {}
            }
        });
        Ok(ScheduledTask { token, handle })
    }

    /// Runs `job` first after `initial_delay` and then every `period`,
    /// measured from the scheduled start of each run rather than its end.
    ///
    /// Runs never overlap; a run that overshoots its period is followed
    /// immediately by the next.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotRunning`] when the queue is stopped and
    /// [`QueueError::ZeroPeriod`] when `period` is zero.
    pub fn schedule_at_fixed_rate<J, Fut>(
        &self,
        initial_delay: Duration,
        period: Duration,
        mut job: J,
    ) -> Result<ScheduledTask, QueueError>
    where
        J: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period.is_zero() {
            return Err(QueueError::ZeroPeriod {
                queue: self.name.clone(),
            });
        }
        let token = self.child_token()?;
        let task_token = token.clone();
        let handle = self.handle.spawn(async move {
            let mut ticks = time::interval_at(Instant::now() + initial_delay, period);
            tokio::select! {
                biased;
                () = task_token.cancelled() => {}
                () = async {
                    loop {
                        ticks.tick().await;
                        job().await;
                    }
                } => {}
            }
        });
        Ok(ScheduledTask { token, handle })
    }

    fn child_token(&self) -> Result<CancellationToken, QueueError> {
        self.lock_root()
            .as_ref()
            .filter(|token| !token.is_cancelled())
            .map(CancellationToken::child_token)
            .ok_or_else(|| QueueError::NotRunning {
                queue: self.name.clone(),
            })
    }

    fn lock_root(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.root.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handle to work scheduled on a [`WorkQueue`].
#[derive(Debug)]
pub struct ScheduledTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Cancels the task, interrupting it if it is running.
    ///
    /// Returns `false` when the task had already completed or been cancelled,
    /// `true` when this call cancelled it.
    #[must_use = "a false result means the task was not cancelled by this call"]
    pub fn cancel(&self) -> bool {
        if self.token.is_cancelled() || self.handle.is_finished() {
            return false;
        }
        self.token.cancel();
        self.handle.abort();
        true
    }

    /// Reports whether the task has finished running.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Reports whether the task was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[cfg(test)]
mod tests;
