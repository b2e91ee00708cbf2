//! Sources that produce fresh configuration snapshots on demand.

use std::ffi::OsString;

use ortho_config::OrthoConfig;

use super::{ConfigError, ReplicationConfig, ReplicationSettings};

/// Re-readable origin of configuration snapshots.
pub trait ConfigSource: Send + Sync {
    /// Parses the persisted configuration into a new snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration cannot be read,
    /// merged or validated.
    fn load(&self) -> Result<ReplicationConfig, ConfigError>;
}

/// Loads settings from defaults, configuration files and environment
/// variables without parsing command-line arguments.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OrthoConfigSource {
    app_name: String,
}

impl OrthoConfigSource {
    /// Creates a source that reports `app_name` as the program name.
    #[must_use]
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }
}

impl Default for OrthoConfigSource {
    fn default() -> Self {
        Self::new("replication")
    }
}

impl ConfigSource for OrthoConfigSource {
    fn load(&self) -> Result<ReplicationConfig, ConfigError> {
        let settings = ReplicationSettings::load_from_iter([OsString::from(&self.app_name)])
            .map_err(|err| ConfigError::Load {
                message: err.to_string(),
            })?;
        settings.validate()?;
        Ok(ReplicationConfig::from_settings(settings))
    }
}
