//! Replication configuration loading via `ortho-config`.
//!
//! [`ReplicationSettings`] is the layered, user-facing configuration.
//! [`ReplicationConfig`] is an immutable snapshot of those settings tagged
//! with a version so reloads can tell whether anything changed.
//! [`AutoReloadConfig`] keeps the active snapshot fresh in the background.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::resolve_under;

mod auto_reload;
mod source;

pub use auto_reload::{
    AutoReloadConfig, DEFAULT_RELOAD_DELAY, DEFAULT_RELOAD_INTERVAL, ShutdownError,
};
pub use source::{ConfigSource, OrthoConfigSource};

/// Default connection timeout in milliseconds (two minutes).
pub const DEFAULT_SSH_CONNECTION_TIMEOUT_MS: u64 = 120_000;

/// Default number of refs shown in user-facing messages.
pub const DEFAULT_MAX_REFS_TO_SHOW: u64 = 2;

/// Events directory used when none is configured, relative to the site.
pub const DEFAULT_EVENTS_DIRECTORY: &str = "data/replication";

const NAME_PLACEHOLDER: &str = "${name}";

/// Replication settings loaded via `ortho-config`.
///
/// Toggles skip the CLI layer. A generated `SetTrue` flag always contributes
/// `false` when absent and would mask the file and environment layers.
#[derive(Clone, Debug, Deserialize, Serialize, OrthoConfig, PartialEq, Eq, Hash)]
#[ortho_config(
    prefix = "REPLICATION",
    discovery(
        app_name = "replication",
        env_var = "REPLICATION_CONFIG_PATH",
        config_file_name = "replication.toml",
        dotfile_name = ".replication.toml",
        project_file_name = "replication.toml"
    )
)]
#[expect(
    clippy::struct_excessive_bools,
    reason = "configuration struct with user-facing toggle settings that are naturally expressed as booleans"
)]
pub struct ReplicationSettings {
    /// Whether to push every project to every destination when the server
    /// starts.
    #[ortho_config(default = false, skip_cli)]
    pub replicate_on_startup: bool,
    /// Whether pushes force-update refs unless a destination overrides it.
    #[ortho_config(default = false, skip_cli)]
    pub default_force_update: bool,
    /// Seconds between distribution runs; zero disables distribution.
    #[ortho_config(default = 0)]
    pub distribution_interval: u64,
    /// Maximum refs named in log lines; zero logs every ref.
    #[ortho_config(default = 0)]
    pub max_refs_to_log: u64,
    /// Maximum refs named in user-facing messages.
    #[ortho_config(default = DEFAULT_MAX_REFS_TO_SHOW)]
    pub max_refs_to_show: u64,
    /// Seconds a remote command may run; zero waits without bound.
    #[ortho_config(default = 0)]
    pub ssh_command_timeout: u64,
    /// Milliseconds allowed for establishing an SSH session.
    #[ortho_config(default = DEFAULT_SSH_CONNECTION_TIMEOUT_MS)]
    pub ssh_connection_timeout: u64,
    /// Directory for persisted replication events, resolved against
    /// `site_path` when relative.
    pub events_directory: Option<String>,
    /// Whether credentials come from the clear-text `secure.toml` file.
    #[ortho_config(default = false, skip_cli)]
    pub use_legacy_credentials: bool,
    /// Root directory of the server installation.
    #[ortho_config(default = ".".to_owned())]
    pub site_path: String,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Private key passed to `ssh -i`. Supports tilde expansion.
    pub ssh_identity_file: Option<String>,
    /// Whether to force batch mode for SSH to avoid password prompts.
    #[ortho_config(default = true, skip_cli)]
    pub ssh_batch_mode: bool,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            replicate_on_startup: false,
            default_force_update: false,
            distribution_interval: 0,
            max_refs_to_log: 0,
            max_refs_to_show: DEFAULT_MAX_REFS_TO_SHOW,
            ssh_command_timeout: 0,
            ssh_connection_timeout: DEFAULT_SSH_CONNECTION_TIMEOUT_MS,
            events_directory: None,
            use_legacy_credentials: false,
            site_path: String::from("."),
            ssh_bin: String::from("ssh"),
            ssh_identity_file: None,
            ssh_batch_mode: true,
        }
    }
}

impl ReplicationSettings {
    /// Ensures required values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] naming the first empty field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_value(&self.site_path, "site_path")?;
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_optional_value(self.ssh_identity_file.as_deref(), "ssh_identity_file")?;
        Ok(())
    }

    fn require_value(value: &str, field: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::InvalidField {
                field: field.to_owned(),
            });
        }
        Ok(())
    }

    fn require_optional_value(value: Option<&str>, field: &str) -> Result<(), ConfigError> {
        value.map_or(Ok(()), |present| Self::require_value(present, field))
    }
}

/// Errors raised while loading replication configuration.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Raised when parsing or merging configuration layers fails.
    #[error("replication configuration parsing failed: {message}")]
    Load {
        /// Loader diagnostics.
        message: String,
    },
    /// Raised when a required value is empty.
    #[error("replication configuration field {field} must not be empty")]
    InvalidField {
        /// Name of the offending field.
        field: String,
    },
}

/// An immutable, versioned configuration snapshot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReplicationConfig {
    settings: ReplicationSettings,
    version: String,
}

impl ReplicationConfig {
    /// Wraps `settings`, deriving the version from their content.
    #[must_use]
    pub fn from_settings(settings: ReplicationSettings) -> Self {
        let version = content_version(&settings);
        Self { settings, version }
    }

    /// Returns the raw settings behind this snapshot.
    #[must_use]
    pub const fn settings(&self) -> &ReplicationSettings {
        &self.settings
    }

    /// Opaque tag identifying this snapshot's content.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Whether a full replication round runs at startup.
    #[must_use]
    pub const fn replicate_on_startup(&self) -> bool {
        self.settings.replicate_on_startup
    }

    /// Whether pushes force-update refs by default.
    #[must_use]
    pub const fn default_force_update(&self) -> bool {
        self.settings.default_force_update
    }

    /// Interval between distribution runs; zero when disabled.
    #[must_use]
    pub const fn distribution_interval(&self) -> Duration {
        Duration::from_secs(self.settings.distribution_interval)
    }

    /// Maximum refs named in log lines; zero means unlimited.
    #[must_use]
    pub fn max_refs_to_log(&self) -> usize {
        usize::try_from(self.settings.max_refs_to_log).unwrap_or(usize::MAX)
    }

    /// Maximum refs named in user-facing messages.
    #[must_use]
    pub fn max_refs_to_show(&self) -> usize {
        usize::try_from(self.settings.max_refs_to_show).unwrap_or(usize::MAX)
    }

    /// Time allowed for establishing an SSH session.
    #[must_use]
    pub const fn ssh_connection_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.ssh_connection_timeout)
    }

    /// Time a remote command may run, or `None` when unbounded.
    #[must_use]
    pub const fn ssh_command_timeout(&self) -> Option<Duration> {
        match self.settings.ssh_command_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Whether credentials come from the clear-text `secure.toml` file.
    #[must_use]
    pub const fn use_legacy_credentials(&self) -> bool {
        self.settings.use_legacy_credentials
    }

    /// Whether SSH runs with `BatchMode=yes`.
    #[must_use]
    pub const fn ssh_batch_mode(&self) -> bool {
        self.settings.ssh_batch_mode
    }

    /// Root directory of the server installation.
    #[must_use]
    pub fn site_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.settings.site_path)
    }

    /// Directory for persisted replication events.
    ///
    /// A blank or absent setting falls back to `data/replication` under the
    /// site.
    #[must_use]
    pub fn events_directory(&self) -> Utf8PathBuf {
        let configured = self
            .settings
            .events_directory
            .as_deref()
            .filter(|dir| !dir.trim().is_empty())
            .unwrap_or(DEFAULT_EVENTS_DIRECTORY);
        resolve_under(&self.site_path(), configured)
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self::from_settings(ReplicationSettings::default())
    }
}

/// Read access to the currently active configuration snapshot.
pub trait ConfigProvider: Send + Sync {
    /// Returns the active snapshot.
    fn current(&self) -> Arc<ReplicationConfig>;
}

impl ConfigProvider for Arc<ReplicationConfig> {
    fn current(&self) -> Arc<ReplicationConfig> {
        Self::clone(self)
    }
}

/// Substitutes `name` for the first `${name}` placeholder in `template`.
///
/// Templates without the placeholder are returned unchanged when
/// `key_is_optional` is set and rejected with `None` otherwise.
///
/// # Examples
///
/// ```
/// # use replication::config::replace_name;
/// assert_eq!(
///     replace_name("git@host:${name}.git", "tools/app", false).as_deref(),
///     Some("git@host:tools/app.git")
/// );
/// assert_eq!(replace_name("git@host:fixed.git", "app", false), None);
/// ```
#[must_use]
pub fn replace_name(template: &str, name: &str, key_is_optional: bool) -> Option<String> {
    match template.split_once(NAME_PLACEHOLDER) {
        Some((before, after)) => Some(format!("{before}{name}{after}")),
        None if key_is_optional => Some(template.to_owned()),
        None => None,
    }
}

fn content_version(settings: &ReplicationSettings) -> String {
    let mut hasher = DefaultHasher::new();
    settings.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests;
