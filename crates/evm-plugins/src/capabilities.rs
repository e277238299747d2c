//! Capability grants attached to a spawned plugin.
//!
//! A [`CapabilitySet`] enumerates everything a worker may touch beyond its
//! own executable and the system libraries it needs to start. The default set
//! grants nothing.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PluginError, PluginResult};

/// Access level of a filesystem grant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FsAccess {
    /// Read files and list directories.
    #[default]
    Read,
    /// Read, create, modify, and remove.
    ReadWrite,
}

/// Access to one directory tree (or file).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilesystemGrant {
    /// Absolute path the grant applies beneath.
    pub path: PathBuf,
    /// Access level.
    #[serde(default)]
    pub access: FsAccess,
}

/// An outbound network destination: `host` or `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetworkGrant {
    host: String,
    port: Option<u16>,
}

impl NetworkGrant {
    /// Grant access to `host` on any port.
    #[must_use]
    pub fn host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
        }
    }

    /// Grant access to `host` on `port` only.
    #[must_use]
    pub fn host_port(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port: Some(port),
        }
    }

    /// Parse `host`, `host:port`, or `[v6addr]:port`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidCapability`] for an empty host, a bad
    /// port, or an unterminated IPv6 bracket.
    pub fn parse(s: &str) -> PluginResult<Self> {
        let invalid = |why: &str| PluginError::InvalidCapability(format!("network grant {s:?}: {why}"));

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, after) = rest
                .split_once(']')
                .ok_or_else(|| invalid("unterminated '['"))?;
            match after {
                "" => (host, None),
                _ => {
                    let port = after
                        .strip_prefix(':')
                        .ok_or_else(|| invalid("expected ':' after ']'"))?;
                    (host, Some(port))
                },
            }
        } else if s.matches(':').count() > 1 {
            // Bare IPv6 address without a port.
            (s, None)
        } else {
            match s.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (s, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("host is empty"));
        }
        if host.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(invalid("host contains whitespace or '/'"));
        }
        let port = port
            .map(|p| {
                p.parse::<u16>()
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| invalid("port must be 1-65535"))
            })
            .transpose()?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// The host name or address.
    #[must_use]
    pub fn host_name(&self) -> &str {
        &self.host
    }

    /// The port, if the grant is restricted to one.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.port
    }
}

impl fmt::Display for NetworkGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bracketed = self.host.contains(':');
        match (self.port, bracketed) {
            (Some(port), true) => write!(f, "[{}]:{port}", self.host),
            (Some(port), false) => write!(f, "{}:{port}", self.host),
            (None, _) => f.write_str(&self.host),
        }
    }
}

impl FromStr for NetworkGrant {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NetworkGrant {
    type Error = PluginError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<NetworkGrant> for String {
    fn from(grant: NetworkGrant) -> Self {
        grant.to_string()
    }
}

/// Everything a plugin worker may access. Deny by default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CapabilitySet {
    /// Outbound network destinations.
    pub network: Vec<NetworkGrant>,
    /// Filesystem trees.
    pub filesystem: Vec<FilesystemGrant>,
    /// Files the worker may execute, in addition to its own executable.
    pub execute: Vec<PathBuf>,
}

impl CapabilitySet {
    /// The empty set.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether nothing is granted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.network.is_empty() && self.filesystem.is_empty() && self.execute.is_empty()
    }

    /// Add a network grant.
    #[must_use]
    pub fn with_network(mut self, grant: NetworkGrant) -> Self {
        self.network.push(grant);
        self
    }

    /// Add a read-only filesystem grant.
    #[must_use]
    pub fn with_read(mut self, path: impl Into<PathBuf>) -> Self {
        self.filesystem.push(FilesystemGrant {
            path: path.into(),
            access: FsAccess::Read,
        });
        self
    }

    /// Add a read-write filesystem grant.
    #[must_use]
    pub fn with_read_write(mut self, path: impl Into<PathBuf>) -> Self {
        self.filesystem.push(FilesystemGrant {
            path: path.into(),
            access: FsAccess::ReadWrite,
        });
        self
    }

    /// Allow executing `path`.
    #[must_use]
    pub fn with_execute(mut self, path: impl Into<PathBuf>) -> Self {
        self.execute.push(path.into());
        self
    }

    /// Whether `path` lies beneath a grant allowing at least `access`.
    #[must_use]
    pub fn allows_path(&self, path: &Path, access: FsAccess) -> bool {
        self.filesystem.iter().any(|grant| {
            path.starts_with(&grant.path) && (access == FsAccess::Read || grant.access == FsAccess::ReadWrite)
        })
    }

    /// Check that every path grant is absolute.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidCapability`] naming the first relative
    /// path.
    pub fn validate(&self) -> PluginResult<()> {
        let paths = self
            .filesystem
            .iter()
            .map(|grant| &grant.path)
            .chain(self.execute.iter());
        for path in paths {
            if !path.is_absolute() {
                return Err(PluginError::InvalidCapability(format!(
                    "path {} must be absolute",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}
