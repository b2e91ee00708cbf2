//! Remote command execution over SSH sessions.
//!
//! [`SshHelper`] connects through a [`SessionFactory`], runs one command,
//! drains both output streams concurrently into a caller-supplied sink and
//! returns the remote exit code. The session is disconnected on every path.

use std::io::{self, Read, Write};
use std::process::Child;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ReplicationConfig;

mod error_buffer;
mod openssh;
mod session;
mod target;
mod wait;

pub use error_buffer::ErrorBuffer;
pub use openssh::{OpenSshSession, OpenSshSessionFactory};
pub use session::{RemoteSession, SessionFactory};
pub use target::RemoteTarget;

use wait::{WaitOutcome, join_until, kill_and_reap, wait_bounded};

/// Time granted to the drain threads once the remote command exited.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Errors surfaced while connecting to or running commands on a remote node.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SshError {
    /// Raised when a destination cannot be parsed.
    #[error("invalid ssh target {target}: {message}")]
    InvalidTarget {
        /// Destination as supplied by the caller.
        target: String,
        /// Reason the destination was rejected.
        message: String,
    },
    /// Raised when the session could not be established.
    #[error("failed to connect to {target}: {message}")]
    Connect {
        /// Destination that refused the session.
        target: String,
        /// Transport diagnostics.
        message: String,
    },
    /// Raised when establishing the session exceeded the connection timeout.
    #[error("connection to {target} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Destination being connected to.
        target: String,
        /// Configured connection timeout.
        timeout: Duration,
    },
    /// Raised when a local process cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when waiting on a process fails.
    #[error("failed to wait for remote command: {message}")]
    Wait {
        /// Operating system error string.
        message: String,
    },
    /// Raised when the remote command outlives the command timeout.
    #[error("remote command `{command}` timed out after {timeout:?}")]
    CommandTimeout {
        /// Command that was running.
        command: String,
        /// Configured command timeout.
        timeout: Duration,
    },
}

/// Runs commands on remote nodes with bounded timeouts.
#[derive(Clone, Debug)]
pub struct SshHelper<F: SessionFactory> {
    factory: F,
    connection_timeout: Duration,
    command_timeout: Option<Duration>,
}

impl<F: SessionFactory> SshHelper<F> {
    /// Creates a helper using the SSH timeouts of `config`.
    #[must_use]
    pub fn new(config: &ReplicationConfig, factory: F) -> Self {
        Self {
            factory,
            connection_timeout: config.ssh_connection_timeout(),
            command_timeout: config.ssh_command_timeout(),
        }
    }

    /// Overrides the command timeout; `None` waits without bound.
    #[must_use]
    pub const fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Returns a fresh buffer suitable as the output sink.
    #[must_use]
    pub fn new_error_buffer_stream(&self) -> Arc<ErrorBuffer> {
        Arc::new(ErrorBuffer::new())
    }

    /// Executes `command` on `target` and returns its exit code.
    ///
    /// Both output streams are copied into `sink`. `None` is returned when
    /// the process was terminated by a signal.
    ///
    /// # Errors
    ///
    /// Returns [`SshError`] when the session cannot be established, the
    /// command cannot be started or it exceeds the command timeout.
    pub fn execute_remote_ssh<S>(
        &self,
        target: &RemoteTarget,
        command: &str,
        sink: Arc<S>,
    ) -> Result<Option<i32>, SshError>
    where
        S: Send + Sync + 'static,
        for<'a> &'a S: Write,
    {
        self.execute_remote_ssh_with_cancel(target, command, sink, &CancellationToken::new())
    }

    /// Like [`execute_remote_ssh`](Self::execute_remote_ssh), but stops
    /// waiting as soon as `cancel` fires.
    ///
    /// A cancelled wait neither kills the remote process nor joins the drain
    /// threads; the exit code is `None` unless the process already exited.
    ///
    /// # Errors
    ///
    /// Returns [`SshError`] under the same conditions as
    /// [`execute_remote_ssh`](Self::execute_remote_ssh).
    pub fn execute_remote_ssh_with_cancel<S>(
        &self,
        target: &RemoteTarget,
        command: &str,
        sink: Arc<S>,
        cancel: &CancellationToken,
    ) -> Result<Option<i32>, SshError>
    where
        S: Send + Sync + 'static,
        for<'a> &'a S: Write,
    {
        let mut session = self.factory.connect(target, self.connection_timeout)?;
        let result = self.run_in_session(&mut session, command, sink, cancel);
        session.disconnect();
        result
    }

    fn run_in_session<S>(
        &self,
        session: &mut F::Session,
        command: &str,
        sink: Arc<S>,
        cancel: &CancellationToken,
    ) -> Result<Option<i32>, SshError>
    where
        S: Send + Sync + 'static,
        for<'a> &'a S: Write,
    {
        let mut process = session.exec(command)?;
        drop(process.stdin.take());

        let drains = [
            spawn_drain(process.stdout.take(), Arc::clone(&sink), "stdout"),
            spawn_drain(process.stderr.take(), sink, "stderr"),
        ];

        let started = Instant::now();
        let outcome = match wait_bounded(&mut process, self.command_timeout, cancel) {
            Ok(outcome) => outcome,
            Err(err) => {
                kill_and_reap(&mut process);
                return Err(SshError::Wait {
                    message: err.to_string(),
                });
            }
        };

        match outcome {
            WaitOutcome::Exited(status) => {
                let grace = Instant::now() + DRAIN_GRACE;
                let deadline = self
                    .command_timeout
                    .map_or(grace, |limit| grace.max(started + limit));
                let detached = join_until(drains.into_iter().flatten().collect(), deadline);
                if detached != 0 {
                    debug!(command, detached, "remote output still open after exit");
                }
                Ok(status.code())
            }
            WaitOutcome::Abandoned => {
                debug!(command, "wait for remote command abandoned");
                Ok(available_exit_code(&mut process))
            }
            WaitOutcome::TimedOut => {
                kill_and_reap(&mut process);
                Err(SshError::CommandTimeout {
                    command: command.to_owned(),
                    timeout: self.command_timeout.unwrap_or_default(),
                })
            }
        }
    }
}

fn available_exit_code(process: &mut Child) -> Option<i32> {
    process
        .try_wait()
        .ok()
        .flatten()
        .and_then(|status| status.code())
}

fn spawn_drain<R, S>(
    source: Option<R>,
    sink: Arc<S>,
    label: &'static str,
) -> Option<JoinHandle<()>>
where
    R: Read + Send + 'static,
    S: Send + Sync + 'static,
    for<'a> &'a S: Write,
{
    let mut reader = source?;
    let spawned = thread::Builder::new()
        .name(format!("ssh-drain-{label}"))
        .spawn(move || {
            let mut writer = &*sink;
            if let Err(err) = io::copy(&mut reader, &mut writer) {
                debug!(stream = label, error = %err, "remote stream copy stopped");
            }
        });
    match spawned {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!(stream = label, error = %err, "failed to start drain thread");
            None
        }
    }
}
