//! Credential lookup for named replication remotes.
//!
//! [`FileCredentialsFactory`] reads the clear-text `etc/secure.toml` file of
//! a site, where each remote has a `[remote.<name>]` table carrying
//! `username` and `password` strings.

use std::fmt;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::toml;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::ReplicationConfig;

/// Location of the secure configuration file relative to the site.
pub const SECURE_CONFIG_FILE: &str = "etc/secure.toml";

const REMOTE_SECTION: &str = "remote";

/// Username and password for one remote. Missing values are empty.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct Credentials {
    /// Login name.
    pub username: String,
    /// Password or token.
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Produces credentials for named remotes.
pub trait CredentialsFactory: Send + Sync {
    /// Returns the credentials configured for `remote`.
    fn create(&self, remote: &str) -> Credentials;

    /// Reports whether the credentials of `remote` can be read.
    fn validate(&self, remote: &str) -> bool {
        let _credentials = self.create(remote);
        true
    }
}

/// Errors raised while loading credential files.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CredentialsError {
    /// Raised when the file exists but cannot be read.
    #[error("cannot read {path}: {message}")]
    Io {
        /// Path that could not be read.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the file is not valid TOML.
    #[error("credentials file {path} is invalid: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Parser diagnostics.
        message: String,
    },
    /// Raised when the `remote` section is not a table.
    #[error("credentials file {path} has an invalid structure: {message}")]
    InvalidStructure {
        /// Path with unexpected content.
        path: Utf8PathBuf,
        /// Description of the problem.
        message: String,
    },
}

/// Credentials read from a clear-text TOML file.
#[derive(Clone, Default)]
pub struct FileCredentialsFactory {
    remotes: toml::value::Table,
}

impl fmt::Debug for FileCredentialsFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileCredentialsFactory")
            .field("remotes", &self.remotes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FileCredentialsFactory {
    /// Loads `<site>/etc/secure.toml` for the site of `config`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError`] when the file exists but cannot be read
    /// or parsed.
    pub fn for_site(config: &ReplicationConfig) -> Result<Self, CredentialsError> {
        Self::load(&config.site_path().join(SECURE_CONFIG_FILE))
    }

    /// Loads credentials from `path`. A missing or empty file yields a
    /// factory that returns empty credentials.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError`] when the file exists but cannot be read
    /// or parsed.
    pub fn load(path: &Utf8Path) -> Result<Self, CredentialsError> {
        let Some(contents) = read_optional(path)? else {
            debug!(%path, "no credentials file; using empty credentials");
            return Ok(Self::default());
        };
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut root: toml::value::Table =
            toml::from_str(&contents).map_err(|err| CredentialsError::Parse {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        let remotes = match root.remove(REMOTE_SECTION) {
            None => toml::value::Table::new(),
            Some(toml::Value::Table(table)) => table,
            Some(_) => {
                return Err(CredentialsError::InvalidStructure {
                    path: path.to_path_buf(),
                    message: format!("[{REMOTE_SECTION}] must be a table"),
                });
            }
        };
        Ok(Self { remotes })
    }

    fn field(&self, remote: &str, key: &str) -> Result<Option<&str>, String> {
        let Some(section) = self.remotes.get(remote) else {
            return Ok(None);
        };
        let table = section
            .as_table()
            .ok_or_else(|| format!("[{REMOTE_SECTION}.{remote}] must be a table"))?;
        table.get(key).map_or(Ok(None), |raw| {
            raw.as_str()
                .map(Some)
                .ok_or_else(|| format!("{REMOTE_SECTION}.{remote}.{key} must be a string"))
        })
    }
}

impl CredentialsFactory for FileCredentialsFactory {
    fn create(&self, remote: &str) -> Credentials {
        let lookup = |key: &str| {
            self.field(remote, key)
                .ok()
                .flatten()
                .unwrap_or_default()
                .to_owned()
        };
        Credentials {
            username: lookup("username"),
            password: lookup("password"),
        }
    }

    fn validate(&self, remote: &str) -> bool {
        let checked = self
            .field(remote, "username")
            .and_then(|_| self.field(remote, "password"));
        match checked {
            Ok(_) => true,
            Err(message) => {
                error!(remote, %message, "credentials for replication remote are invalid");
                false
            }
        }
    }
}

fn read_optional(path: &Utf8Path) -> Result<Option<String>, CredentialsError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let Some(file_name) = path.file_name() else {
        return Ok(None);
    };
    let io_error = |err: io::Error| CredentialsError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    };
    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_error(err)),
    };
    match dir.read_to_string(file_name) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_error(err)),
    }
}

#[cfg(test)]
mod tests;
