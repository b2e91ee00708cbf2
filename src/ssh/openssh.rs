//! Session transport backed by the system OpenSSH client.
//!
//! `connect` starts a multiplexing master on a private control socket and
//! returns once authentication completed; every `exec` reuses that socket,
//! and `disconnect` asks the master to exit.

use std::ffi::OsString;
use std::fs;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::wait::{WaitOutcome, kill_and_reap, wait_bounded};
use super::{RemoteSession, RemoteTarget, SessionFactory, SshError};
use crate::config::ReplicationConfig;
use crate::util::expand_tilde;

/// Opens sessions by running the `ssh` binary as a control master.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OpenSshSessionFactory {
    ssh_bin: String,
    identity_file: Option<String>,
    batch_mode: bool,
    control_dir: Utf8PathBuf,
}

impl OpenSshSessionFactory {
    /// Builds a factory from the SSH settings of a configuration snapshot.
    #[must_use]
    pub fn from_config(config: &ReplicationConfig) -> Self {
        let settings = config.settings();
        Self {
            ssh_bin: settings.ssh_bin.clone(),
            identity_file: settings.ssh_identity_file.clone(),
            batch_mode: config.ssh_batch_mode(),
            control_dir: default_control_dir(),
        }
    }

    /// Places control sockets and logs under `dir` instead of the system
    /// temporary directory.
    #[must_use]
    pub fn with_control_dir(mut self, dir: Utf8PathBuf) -> Self {
        self.control_dir = dir;
        self
    }

    fn common_options(&self, target: &RemoteTarget) -> Vec<OsString> {
        let mut args = Vec::new();
        if let Some(port) = target.port {
            args.push(OsString::from("-p"));
            args.push(OsString::from(port.to_string()));
        }
        if let Some(ref identity_file) = self.identity_file {
            args.push(OsString::from("-i"));
            args.push(OsString::from(expand_tilde(identity_file)));
        }
        if self.batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }
        args
    }

    pub(crate) fn master_args(
        &self,
        target: &RemoteTarget,
        control_path: &Utf8Path,
        log_path: &Utf8Path,
        timeout: Duration,
    ) -> Vec<OsString> {
        let connect_secs = timeout.as_millis().div_ceil(1000).max(1);
        let mut args = self.common_options(target);
        args.extend([
            OsString::from("-o"),
            OsString::from("ControlMaster=yes"),
            OsString::from("-o"),
            OsString::from(format!("ControlPath={control_path}")),
            OsString::from("-o"),
            OsString::from(format!("ConnectTimeout={connect_secs}")),
            OsString::from("-E"),
            OsString::from(log_path.as_str()),
            OsString::from("-N"),
            OsString::from("-f"),
            OsString::from(target.destination()),
        ]);
        args
    }
}

impl SessionFactory for OpenSshSessionFactory {
    type Session = OpenSshSession;

    fn connect(
        &self,
        target: &RemoteTarget,
        timeout: Duration,
    ) -> Result<Self::Session, SshError> {
        let id = Uuid::new_v4().simple();
        let control_path = self.control_dir.join(format!("replication-{id}.sock"));
        let log_path = self.control_dir.join(format!("replication-{id}.log"));
        let args = self.master_args(target, &control_path, &log_path, timeout);

        let mut master = Command::new(&self.ssh_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| SshError::Spawn {
                program: self.ssh_bin.clone(),
                message: err.to_string(),
            })?;

        let outcome = wait_bounded(&mut master, Some(timeout), &CancellationToken::new())
            .map_err(|err| SshError::Wait {
                message: err.to_string(),
            });
        let diagnostics = fs::read_to_string(&log_path).unwrap_or_default();
        if fs::remove_file(&log_path).is_err() {
            debug!(path = %log_path, "no ssh log to remove");
        }

        match outcome? {
            WaitOutcome::Exited(status) if status.success() => Ok(OpenSshSession {
                ssh_bin: self.ssh_bin.clone(),
                control_path,
                options: self.common_options(target),
                destination: target.destination(),
                connected: true,
            }),
            WaitOutcome::Exited(status) => Err(SshError::Connect {
                target: target.to_string(),
                message: format!("{status}: {}", diagnostics.trim()),
            }),
            WaitOutcome::TimedOut | WaitOutcome::Abandoned => {
                kill_and_reap(&mut master);
                Err(SshError::ConnectTimeout {
                    target: target.to_string(),
                    timeout,
                })
            }
        }
    }
}

/// A session multiplexed over an OpenSSH control socket.
#[derive(Debug)]
pub struct OpenSshSession {
    ssh_bin: String,
    control_path: Utf8PathBuf,
    options: Vec<OsString>,
    destination: String,
    connected: bool,
}

impl OpenSshSession {
    fn control_args(&self) -> Vec<OsString> {
        let mut args = self.options.clone();
        args.extend([
            OsString::from("-o"),
            OsString::from(format!("ControlPath={}", self.control_path)),
        ]);
        args
    }
}

impl RemoteSession for OpenSshSession {
    fn exec(&mut self, command: &str) -> Result<Child, SshError> {
        let mut args = self.control_args();
        args.extend([
            OsString::from("-o"),
            OsString::from("ControlMaster=no"),
            OsString::from(&self.destination),
            OsString::from(command),
        ]);
        Command::new(&self.ssh_bin)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| SshError::Spawn {
                program: self.ssh_bin.clone(),
                message: err.to_string(),
            })
    }

    fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        let mut args = self.control_args();
        args.extend([
            OsString::from("-O"),
            OsString::from("exit"),
            OsString::from(&self.destination),
        ]);
        let result = Command::new(&self.ssh_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match result {
            Ok(status) if status.success() => {}
            Ok(status) => debug!(destination = %self.destination, %status, "ssh master exit failed"),
            Err(err) => debug!(destination = %self.destination, error = %err, "ssh master exit failed"),
        }
    }
}

impl Drop for OpenSshSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn default_control_dir() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(std::env::temp_dir()).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}
