//! Parsing of remote SSH destinations.

use std::fmt;

use url::Url;

use super::SshError;

/// Host, user and port of a remote node reachable over SSH.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RemoteTarget {
    /// Optional login user.
    pub user: Option<String>,
    /// Host name or address.
    pub host: String,
    /// Optional TCP port; SSH uses its default when absent.
    pub port: Option<u16>,
}

impl RemoteTarget {
    /// Parses `ssh://[user@]host[:port][/path]` or scp-like
    /// `[user@]host:path` destinations. Any path component is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::InvalidTarget`] when the scheme is not `ssh` or
    /// no host can be found.
    pub fn parse(raw: &str) -> Result<Self, SshError> {
        let trimmed = raw.trim();
        if trimmed.contains("://") {
            return Self::parse_url(trimmed);
        }
        Self::parse_scp_like(trimmed)
    }

    /// Returns `user@host` (or just `host`) as passed to the SSH client.
    #[must_use]
    pub fn destination(&self) -> String {
        self.user
            .as_ref()
            .map_or_else(|| self.host.clone(), |user| format!("{user}@{}", self.host))
    }

    fn parse_url(raw: &str) -> Result<Self, SshError> {
        let url = Url::parse(raw).map_err(|err| invalid(raw, &err.to_string()))?;
        if url.scheme() != "ssh" {
            return Err(invalid(raw, &format!("unsupported scheme {}", url.scheme())));
        }
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| invalid(raw, "missing host"))?;
        let user = Some(url.username())
            .filter(|user| !user.is_empty())
            .map(str::to_owned);
        Ok(Self {
            user,
            host: host.to_owned(),
            port: url.port(),
        })
    }

    fn parse_scp_like(raw: &str) -> Result<Self, SshError> {
        let authority = raw.split_once(':').map_or(raw, |(authority, _)| authority);
        let (user, host) = match authority.split_once('@') {
            Some((user, host)) => (Some(user), host),
            None => (None, authority),
        };
        if host.is_empty() || host.contains('/') {
            return Err(invalid(raw, "missing host"));
        }
        Ok(Self {
            user: user.filter(|name| !name.is_empty()).map(str::to_owned),
            host: host.to_owned(),
            port: None,
        })
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ssh://{}", self.destination())?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

fn invalid(target: &str, message: &str) -> SshError {
    SshError::InvalidTarget {
        target: target.to_owned(),
        message: message.to_owned(),
    }
}
