//! Session abstraction over the remote-shell transport.

use std::process::Child;
use std::time::Duration;

use super::{RemoteTarget, SshError};

/// Opens sessions to remote nodes.
pub trait SessionFactory {
    /// Session type produced by this factory.
    type Session: RemoteSession;

    /// Connects to `target`, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::Connect`] or [`SshError::ConnectTimeout`] when the
    /// session cannot be established.
    fn connect(&self, target: &RemoteTarget, timeout: Duration)
    -> Result<Self::Session, SshError>;
}

/// A connected session able to start remote commands.
pub trait RemoteSession {
    /// Starts `command` remotely with stdin, stdout and stderr piped.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::Spawn`] when the command cannot be started.
    fn exec(&mut self, command: &str) -> Result<Child, SshError>;

    /// Tears the session down. Failures are logged, never raised.
    fn disconnect(&mut self);
}
