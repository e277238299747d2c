//! CLI command implementations.

pub(crate) mod install;
pub(crate) mod list;
pub(crate) mod location;
pub(crate) mod plugin;
pub(crate) mod use_version;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use evm_config::{Config, PluginSection};
use evm_core::{EvmHome, PathSafeString};

/// Loaded configuration and the paths it came from.
pub(crate) struct Context {
    /// Effective configuration.
    pub(crate) config: Config,
    /// File that `save` writes the user layer to.
    pub(crate) config_path: PathBuf,
    /// The evm home directory.
    pub(crate) home: EvmHome,
}

impl Context {
    /// Resolve the evm home and load the configuration.
    ///
    /// `config_path` overrides `$EVM_HOME/config.toml`.
    pub(crate) fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let home = EvmHome::resolve().context("cannot determine the evm home directory")?;
        let config_path = config_path.unwrap_or_else(|| home.config_path());
        let config = Config::load(&config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?;
        Ok(Self {
            config,
            config_path,
            home,
        })
    }

    /// Persist the configuration.
    pub(crate) fn save(&self) -> Result<()> {
        self.config
            .save(&self.config_path)
            .with_context(|| format!("failed to save {}", self.config_path.display()))
    }

    /// Directory of the named location.
    pub(crate) fn location_dir(&self, name: &PathSafeString) -> Result<PathBuf> {
        match self.config.location_path(name.as_str(), &self.home) {
            Some(path) => Ok(path),
            None => bail!("unknown location '{name}'"),
        }
    }

    /// The registered plugin for `ident`.
    pub(crate) fn plugin(&self, ident: &PathSafeString) -> Result<&PluginSection> {
        match self.config.plugins.get(ident.as_str()) {
            Some(section) => Ok(section),
            None => bail!("no plugin registered for '{ident}'; run `evm plugin install` first"),
        }
    }
}

/// `<location>/<ident>/<version>`.
pub(crate) fn version_dir(location: &Path, ident: &PathSafeString, version: &PathSafeString) -> PathBuf {
    location.join(ident.as_str()).join(version.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context {
            config: Config::default(),
            config_path: PathBuf::from("/home/u/.evm/config.toml"),
            home: EvmHome::from_path("/home/u/.evm"),
        }
    }

    fn safe(s: &str) -> PathSafeString {
        PathSafeString::new(s).unwrap()
    }

    #[test]
    fn default_location_resolves() {
        assert_eq!(
            ctx().location_dir(&safe("default")).unwrap(),
            PathBuf::from("/home/u/.evm/versions")
        );
        assert!(ctx().location_dir(&safe("work")).is_err());
    }

    #[test]
    fn unregistered_plugin_is_an_error() {
        let err = ctx().plugin(&safe("node")).unwrap_err();
        assert!(err.to_string().contains("evm plugin install"));
    }

    #[test]
    fn version_dir_layout() {
        assert_eq!(
            version_dir(Path::new("/srv/evm"), &safe("node"), &safe("20.11.1")),
            PathBuf::from("/srv/evm/node/20.11.1")
        );
    }
}
