#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Configuration for `evm`.
//!
//! # Usage
//!
//! ```rust,no_run
//! use evm_config::Config;
//!
//! let config = Config::load_default().unwrap();
//! for (name, plugin) in &config.plugins {
//!     println!("{name}: {}", plugin.locator);
//! }
//! ```
//!
//! # Configuration Precedence
//!
//! From highest to lowest priority:
//!
//! 1. **User** (`$EVM_HOME/config.toml`, default `~/.evm/config.toml`, or the
//!    file passed with `--config`)
//! 2. **Embedded defaults** (`defaults.toml` compiled into the binary)
//!
//! # Design
//!
//! Config types mirror the domain types of `evm-plugins` and `evm-telemetry`
//! without depending on them. Conversion happens in the CLI.

/// Configuration error types.
pub mod error;
/// Configuration file loading and saving.
pub mod loader;
/// Layered configuration merging.
pub mod merge;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

use std::path::{Path, PathBuf};

use evm_core::EvmHome;
use evm_core::dirs::DEFAULT_LOCATION;

pub use error::{ConfigError, ConfigResult};
pub use types::*;

impl Config {
    /// Load the defaults with the file at `path` merged over them.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file is malformed or the final
    /// configuration fails validation.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        loader::load(path)
    }

    /// Load `$EVM_HOME/config.toml` over the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoHomeDir`] if the evm home cannot be
    /// determined, or any error from [`Config::load`].
    pub fn load_default() -> ConfigResult<Self> {
        let home = EvmHome::resolve().map_err(ConfigError::NoHomeDir)?;
        loader::load(&home.config_path())
    }

    /// Validate and atomically write this configuration to `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if validation or the write fails.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        loader::save(self, path)
    }

    /// Directory of the named location.
    ///
    /// The `default` location resolves to `$EVM_HOME/versions` unless it is
    /// configured explicitly.
    #[must_use]
    pub fn location_path(&self, name: &str, home: &EvmHome) -> Option<PathBuf> {
        match self.locations.get(name) {
            Some(location) => Some(location.path.clone()),
            None if name == DEFAULT_LOCATION => Some(home.versions_dir()),
            None => None,
        }
    }

    /// Every location, including the implied `default`, in name order.
    #[must_use]
    pub fn all_locations(&self, home: &EvmHome) -> Vec<(String, PathBuf)> {
        let mut locations: Vec<(String, PathBuf)> = self
            .locations
            .iter()
            .map(|(name, location)| (name.clone(), location.path.clone()))
            .collect();
        if !self.locations.contains_key(DEFAULT_LOCATION) {
            locations.push((DEFAULT_LOCATION.to_owned(), home.versions_dir()));
            locations.sort_by(|a, b| a.0.cmp(&b.0));
        }
        locations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_location_is_implied() {
        let home = EvmHome::from_path("/home/u/.evm");
        let config = Config::default();
        assert_eq!(
            config.location_path("default", &home),
            Some(PathBuf::from("/home/u/.evm/versions"))
        );
        assert_eq!(config.location_path("work", &home), None);
    }

    #[test]
    fn configured_default_wins() {
        let home = EvmHome::from_path("/home/u/.evm");
        let mut config = Config::default();
        config.locations.insert(
            "default".to_owned(),
            LocationSection {
                path: PathBuf::from("/srv/evm"),
            },
        );
        assert_eq!(
            config.location_path("default", &home),
            Some(PathBuf::from("/srv/evm"))
        );
        assert_eq!(config.all_locations(&home).len(), 1);
    }

    #[test]
    fn all_locations_are_sorted() {
        let home = EvmHome::from_path("/home/u/.evm");
        let mut config = Config::default();
        for (name, path) in [("zeta", "/z"), ("alpha", "/a")] {
            config.locations.insert(
                name.to_owned(),
                LocationSection {
                    path: PathBuf::from(path),
                },
            );
        }
        let names: Vec<String> = config
            .all_locations(&home)
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, ["alpha", "default", "zeta"]);
    }
}
