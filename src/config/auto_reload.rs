//! Background refresh of the active configuration snapshot.

use std::panic;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{ConfigError, ConfigProvider, ConfigSource, ReplicationConfig};
use crate::queue::{QueueError, ScheduledTask, WorkQueue};

/// Delay before the first background reload.
pub const DEFAULT_RELOAD_DELAY: Duration = Duration::from_secs(120);

/// Interval between background reloads.
pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(60);

/// Errors that prevent an orderly shutdown.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ShutdownError {
    /// Raised when the background reload task refuses cancellation.
    #[error(
        "unable to cancel replication reload task on {queue}: cannot guarantee orderly shutdown"
    )]
    ReloadTaskNotCancelled {
        /// Queue that ran the reload task.
        queue: String,
    },
}

struct Reloader {
    source: Arc<dyn ConfigSource>,
    current: watch::Sender<Arc<ReplicationConfig>>,
}

impl Reloader {
    fn reload(&self) -> Result<bool, ConfigError> {
        let next = self.source.load().map_err(|err| {
            warn!(error = %err, "configuration reload failed; keeping previous snapshot");
            err
        })?;
        let version = next.version().to_owned();
        let published = self.current.send_if_modified(|snapshot| {
            if snapshot.version() == next.version() {
                return false;
            }
            *snapshot = Arc::new(next);
            true
        });
        if published {
            info!(%version, "replication configuration reloaded");
        } else {
            debug!(%version, "replication configuration unchanged");
        }
        Ok(published)
    }

    fn current(&self) -> Arc<ReplicationConfig> {
        Arc::clone(&self.current.borrow())
    }
}

/// Configuration proxy that periodically swaps in freshly loaded snapshots.
///
/// Readers never block on a reload: every accessor reads one snapshot, and
/// callers needing several consistent fields should take [`current`] once.
///
/// [`current`]: AutoReloadConfig::current
pub struct AutoReloadConfig {
    reloader: Arc<Reloader>,
    queue: WorkQueue,
    reload_task: Mutex<Option<ScheduledTask>>,
    initial_delay: Duration,
    interval: Duration,
}

impl AutoReloadConfig {
    /// Loads the initial snapshot from `source` and prepares a reload queue
    /// named `<plugin_name>_auto-reload-config` on `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the initial load fails.
    pub fn new(
        plugin_name: &str,
        source: Arc<dyn ConfigSource>,
        handle: Handle,
    ) -> Result<Self, ConfigError> {
        let initial = source.load()?;
        let (current, _initial_rx) = watch::channel(Arc::new(initial));
        Ok(Self {
            reloader: Arc::new(Reloader { source, current }),
            queue: WorkQueue::new(format!("{plugin_name}_auto-reload-config"), handle),
            reload_task: Mutex::new(None),
            initial_delay: DEFAULT_RELOAD_DELAY,
            interval: DEFAULT_RELOAD_INTERVAL,
        })
    }

    /// Overrides the reload schedule.
    #[must_use]
    pub const fn with_schedule(mut self, initial_delay: Duration, interval: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.interval = interval;
        self
    }

    /// Schedules the recurring reload. Starting twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] when the reload cannot be scheduled.
    pub fn start(&self) -> Result<(), QueueError> {
        let mut slot = self.lock_task();
        if slot.is_some() {
            debug!(queue = self.queue.name(), "configuration reload already running");
            return Ok(());
        }
        self.queue.start();
        let reloader = Arc::clone(&self.reloader);
        let task = self
            .queue
            .schedule_at_fixed_rate(self.initial_delay, self.interval, move || {
                let run = Arc::clone(&reloader);
                async move {
                    // Failures are logged by the reloader and retried next tick.
                    match tokio::task::spawn_blocking(move || run.reload()).await {
                        Ok(_published) => {}
                        Err(err) if err.is_panic() => panic::resume_unwind(err.into_panic()),
                        Err(err) => {
                            warn!(error = %err, "configuration reload task did not complete");
                        }
                    }
                }
            })?;
        *slot = Some(task);
        info!(
            queue = self.queue.name(),
            delay_secs = self.initial_delay.as_secs(),
            interval_secs = self.interval.as_secs(),
            "configuration auto-reload started"
        );
        Ok(())
    }

    /// Cancels the recurring reload, interrupting a reload in progress.
    /// Stopping when not running is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::ReloadTaskNotCancelled`] when the task had
    /// already terminated and could not be cancelled.
    pub fn stop(&self) -> Result<(), ShutdownError> {
        let Some(task) = self.lock_task().take() else {
            return Ok(());
        };
        let cancelled = task.cancel();
        self.queue.stop();
        if !cancelled {
            return Err(ShutdownError::ReloadTaskNotCancelled {
                queue: self.queue.name().to_owned(),
            });
        }
        info!(queue = self.queue.name(), "configuration auto-reload stopped");
        Ok(())
    }

    /// Reports whether the recurring reload is scheduled.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock_task().is_some()
    }

    /// Re-reads the configuration and publishes it when its version changed.
    ///
    /// Returns whether a new snapshot was published. On failure the previous
    /// snapshot stays active.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] raised by the source.
    pub fn reload(&self) -> Result<bool, ConfigError> {
        self.reloader.reload()
    }

    /// Returns the active snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<ReplicationConfig> {
        self.reloader.current()
    }

    /// Returns a receiver that observes every published snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<ReplicationConfig>> {
        self.reloader.current.subscribe()
    }

    /// Version of the active snapshot.
    #[must_use]
    pub fn version(&self) -> String {
        self.current().version().to_owned()
    }

    /// See [`ReplicationConfig::replicate_on_startup`].
    #[must_use]
    pub fn replicate_on_startup(&self) -> bool {
        self.current().replicate_on_startup()
    }

    /// See [`ReplicationConfig::default_force_update`].
    #[must_use]
    pub fn default_force_update(&self) -> bool {
        self.current().default_force_update()
    }

    /// See [`ReplicationConfig::distribution_interval`].
    #[must_use]
    pub fn distribution_interval(&self) -> Duration {
        self.current().distribution_interval()
    }

    /// See [`ReplicationConfig::max_refs_to_log`].
    #[must_use]
    pub fn max_refs_to_log(&self) -> usize {
        self.current().max_refs_to_log()
    }

    /// See [`ReplicationConfig::max_refs_to_show`].
    #[must_use]
    pub fn max_refs_to_show(&self) -> usize {
        self.current().max_refs_to_show()
    }

    /// See [`ReplicationConfig::ssh_connection_timeout`].
    #[must_use]
    pub fn ssh_connection_timeout(&self) -> Duration {
        self.current().ssh_connection_timeout()
    }

    /// See [`ReplicationConfig::ssh_command_timeout`].
    #[must_use]
    pub fn ssh_command_timeout(&self) -> Option<Duration> {
        self.current().ssh_command_timeout()
    }

    /// See [`ReplicationConfig::events_directory`].
    #[must_use]
    pub fn events_directory(&self) -> Utf8PathBuf {
        self.current().events_directory()
    }

    /// See [`ReplicationConfig::use_legacy_credentials`].
    #[must_use]
    pub fn use_legacy_credentials(&self) -> bool {
        self.current().use_legacy_credentials()
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<ScheduledTask>> {
        self.reload_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConfigProvider for AutoReloadConfig {
    fn current(&self) -> Arc<ReplicationConfig> {
        self.reloader.current()
    }
}
