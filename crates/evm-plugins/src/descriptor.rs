//! Plugin locators and the descriptor a worker is spawned from.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use evm_core::env_policy::SpawnEnv;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::capabilities::CapabilitySet;
use crate::error::{PluginError, PluginResult};

/// Where a plugin executable lives: a filesystem path or a URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PluginLocator {
    /// A local executable.
    Path(PathBuf),
    /// A URL. Only `file:` URLs can be spawned.
    Url(Url),
}

fn has_url_scheme(s: &str) -> bool {
    let Some((scheme, _)) = s.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    let starts_alpha = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let rest_valid = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !(starts_alpha && rest_valid) {
        return false;
    }
    // `C:\plugins\node.exe` is a drive letter, not a scheme.
    !(cfg!(windows) && scheme.len() == 1)
}

impl PluginLocator {
    /// Parse a locator string.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidLocator`] for an empty string or an
    /// unparseable URL.
    pub fn parse(s: &str) -> PluginResult<Self> {
        if s.trim().is_empty() {
            return Err(PluginError::InvalidLocator {
                locator: s.to_string(),
                message: "locator is empty".into(),
            });
        }
        if has_url_scheme(s) {
            Url::parse(s)
                .map(Self::Url)
                .map_err(|e| PluginError::InvalidLocator {
                    locator: s.to_string(),
                    message: e.to_string(),
                })
        } else {
            Ok(Self::Path(PathBuf::from(s)))
        }
    }

    /// Absolute path of the executable to spawn.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::UnsupportedLocator`] for non-`file:` URLs, or
    /// [`PluginError::InvalidLocator`] if the path cannot be made absolute.
    pub fn executable(&self) -> PluginResult<PathBuf> {
        match self {
            Self::Path(path) => std::path::absolute(path).map_err(|e| PluginError::InvalidLocator {
                locator: self.to_string(),
                message: e.to_string(),
            }),
            Self::Url(url) if url.scheme() == "file" => {
                url.to_file_path().map_err(|()| PluginError::InvalidLocator {
                    locator: self.to_string(),
                    message: "file URL does not name a local path".into(),
                })
            },
            Self::Url(_) => Err(PluginError::UnsupportedLocator(self.to_string())),
        }
    }

    /// The executable's file stem, used as a default plugin name.
    #[must_use]
    pub fn file_stem(&self) -> Option<String> {
        let stem = match self {
            Self::Path(path) => path.file_stem().map(|s| s.to_string_lossy().into_owned()),
            Self::Url(url) => url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .and_then(|last| Path::new(last).file_stem())
                .map(|s| s.to_string_lossy().into_owned()),
        };
        stem.filter(|s| !s.is_empty())
    }
}

impl fmt::Display for PluginLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Url(url) => f.write_str(url.as_str()),
        }
    }
}

impl FromStr for PluginLocator {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PluginLocator {
    type Error = PluginError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<PluginLocator> for String {
    fn from(locator: PluginLocator) -> Self {
        locator.to_string()
    }
}

/// Everything needed to spawn one plugin worker. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    locator: PluginLocator,
    capabilities: CapabilitySet,
    args: Vec<String>,
    env: BTreeMap<String, String>,
}

impl PluginDescriptor {
    /// Describe the plugin at `locator` with `capabilities`.
    #[must_use]
    pub fn new(locator: PluginLocator, capabilities: CapabilitySet) -> Self {
        Self {
            locator,
            capabilities,
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    /// Pass `args` to the plugin executable.
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Add environment entries for the worker.
    #[must_use]
    pub fn with_env<K, V>(mut self, env: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(env.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// The plugin locator.
    #[must_use]
    pub fn locator(&self) -> &PluginLocator {
        &self.locator
    }

    /// The capability grants.
    #[must_use]
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Command-line arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Configured environment entries, before filtering.
    #[must_use]
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// The worker environment: forwarded host variables plus configured
    /// entries that pass the spawn blocklist.
    #[must_use]
    pub fn spawn_env(&self) -> SpawnEnv {
        SpawnEnv::build(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}
