//! Config file loading and saving.
//!
//! Implements the `Config::load()` algorithm:
//! 1. Parse `defaults.toml` → base
//! 2. Merge the user file (`$EVM_HOME/config.toml` or `--config`), if present
//! 3. Deserialize merged tree → `Config`
//! 4. Validate

use std::io::{Read, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::merge::deep_merge;
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Load the defaults with the file at `path` merged over them.
///
/// A missing file yields the defaults.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file is unreadable, oversized, or
/// malformed, or if the merged configuration fails validation.
pub fn load(path: &Path) -> ConfigResult<Config> {
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;

    if let Some(overlay) = try_load_file(path)? {
        deep_merge(&mut merged, overlay);
        info!(path = %path.display(), "loaded user config");
    }

    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: path.display().to_string(),
                source: e,
            })?;

    validate::validate(&config)?;
    Ok(config)
}

/// Validate `config` and write it to `path` atomically.
///
/// The file is written to a temporary sibling and renamed over `path`, so a
/// crash never leaves a truncated config behind.
///
/// # Errors
///
/// Returns a [`ConfigError`] if validation, serialization, or the write
/// fails.
pub fn save(config: &Config, path: &Path) -> ConfigResult<()> {
    validate::validate(config)?;
    let content = toml::to_string_pretty(config)?;

    let write_err = |source: std::io::Error| ConfigError::WriteError {
        path: path.display().to_string(),
        source,
    };
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(write_err)?;

    let mut file = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    file.write_all(content.as_bytes()).map_err(write_err)?;
    file.as_file().sync_all().map_err(write_err)?;
    file.persist(path).map_err(|e| write_err(e.error))?;

    debug!(path = %path.display(), "saved config");
    Ok(())
}

fn size_error(path: &Path, len: u64) -> ConfigError {
    ConfigError::ValidationError {
        field: path.display().to_string(),
        message: format!("config file is over {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit", len.saturating_sub(1)),
    }
}

/// Try to load a file, returning `None` if the file doesn't exist.
///
/// Opens the file once and reads at most one byte past the size cap, so an
/// oversized file is never buffered whole.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let read_err = |source: std::io::Error| ConfigError::ReadError {
        path: path.display().to_string(),
        source,
    };
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => return Err(read_err(e)),
    };

    let mut content = String::new();
    file.take(MAX_CONFIG_FILE_SIZE.saturating_add(1))
        .read_to_string(&mut content)
        .map_err(read_err)?;
    let len = u64::try_from(content.len()).unwrap_or(u64::MAX);
    if len > MAX_CONFIG_FILE_SIZE {
        return Err(size_error(path, len));
    }

    let value: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::types::{LocationSection, PluginSection};

    #[test]
    fn defaults_deserialize_to_default_config() {
        let config: Config = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn user_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[host]\nos_sandbox = false\n\n[plugins.node]\nlocator = \"/opt/node\"\n",
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert!(!config.host.os_sandbox);
        assert_eq!(config.host.shutdown_timeout_secs, 5);
        assert_eq!(config.plugins["node"].locator, "/opt/node");
    }

    #[test]
    fn invalid_user_file_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[logging]\nlevel = \"loud\"\n").unwrap();
        assert!(matches!(
            load(&path),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[host\n").unwrap();
        assert!(matches!(load(&path), Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn unreadable_path_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = try_load_file(dir.path());
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn oversized_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("huge.toml");
        let data = "x = \"".to_owned() + &"a".repeat(1_100_000) + "\"";
        std::fs::write(&file_path, data).unwrap();

        let result = try_load_file(&file_path);
        assert!(
            matches!(result, Err(ConfigError::ValidationError { .. })),
            "Expected ValidationError for oversized config, got: {result:?}"
        );
    }

    #[test]
    fn config_at_the_size_cap_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("full.toml");
        let padding = usize::try_from(MAX_CONFIG_FILE_SIZE)
            .unwrap()
            .saturating_sub("x = \"\"\n".len());
        let data = format!("x = \"{}\"\n", "a".repeat(padding));
        assert_eq!(u64::try_from(data.len()).unwrap(), MAX_CONFIG_FILE_SIZE);
        std::fs::write(&file_path, data).unwrap();

        let value = try_load_file(&file_path).unwrap().unwrap();
        assert_eq!(value["x"].as_str().map(str::len), Some(padding));
    }

    #[test]
    fn save_then_load_preserves_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        let mut plugin = PluginSection::new("/opt/evm/plugins/node");
        plugin.network.push("nodejs.org:443".to_owned());
        config.plugins.insert("node".to_owned(), plugin);
        config.locations.insert(
            "work".to_owned(),
            LocationSection {
                path: PathBuf::from("/srv/evm"),
            },
        );

        save(&config, &path).unwrap();
        assert_eq!(load(&path).unwrap(), config);
    }

    #[test]
    fn save_refuses_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.host.shutdown_timeout_secs = 0;
        assert!(save(&config, &path).is_err());
        assert!(!path.exists());
    }
}
