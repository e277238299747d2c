//! Directory layout of the `evm` home.
//!
//! ```text
//! ~/.evm/                 (EvmHome, or $EVM_HOME)
//! ├── config.toml           (plugins, locations, logging)
//! ├── logs/                 (log files when file logging is enabled)
//! └── versions/             (the implicit `default` location)
//!     └── <IDENT>/<VERSION>/
//! ```

use std::io;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the home directory.
pub const EVM_HOME_ENV: &str = "EVM_HOME";

/// Name of the location used when none is given on the command line.
pub const DEFAULT_LOCATION: &str = "default";

/// Global `evm` home directory (`~/.evm/` or `$EVM_HOME`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmHome {
    root: PathBuf,
}

impl EvmHome {
    /// Resolve the home directory.
    ///
    /// Checks `$EVM_HOME` first, then falls back to `.evm` under the user's
    /// home directory.
    ///
    /// # Errors
    ///
    /// Returns an error if `$EVM_HOME` is relative or no user home directory
    /// can be determined.
    pub fn resolve() -> io::Result<Self> {
        if let Some(custom) = std::env::var_os(EVM_HOME_ENV) {
            let root = PathBuf::from(custom);
            if !root.is_absolute() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "EVM_HOME must be an absolute path",
                ));
            }
            return Ok(Self { root });
        }

        let base = directories::BaseDirs::new().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                "neither EVM_HOME nor a user home directory is available",
            )
        })?;
        Ok(Self {
            root: base.home_dir().join(".evm"),
        })
    }

    /// Create from an explicit path.
    #[must_use]
    pub fn from_path(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// User configuration file (`~/.evm/config.toml`).
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Log directory (`~/.evm/logs/`).
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Directory backing the implicit `default` location (`~/.evm/versions/`).
    #[must_use]
    pub fn versions_dir(&self) -> PathBuf {
        self.root.join("versions")
    }
}
