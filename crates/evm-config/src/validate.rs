//! Post-merge configuration validation.
//!
//! Validates that deserialized [`Config`](crate::Config) values are within
//! acceptable ranges and that every key that ends up on a filesystem path is
//! path-safe.

use std::path::Path;

use evm_core::PathSafeString;

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Upper bound for `host.shutdown_timeout_secs`.
const MAX_SHUTDOWN_TIMEOUT_SECS: u64 = 300;

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_logging(config)?;
    validate_host(config)?;
    validate_plugins(config)?;
    validate_locations(config)?;
    Ok(())
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        return Err(invalid(
            "logging.level",
            format!(
                "unsupported log level '{}'; expected one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ),
        ));
    }

    let valid_formats = ["pretty", "compact", "json", "full"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported log format '{}'; expected one of: {}",
                config.logging.format,
                valid_formats.join(", ")
            ),
        ));
    }

    let valid_targets = ["stderr", "file"];
    if !valid_targets.contains(&config.logging.target.as_str()) {
        return Err(invalid(
            "logging.target",
            format!(
                "unsupported log target '{}'; expected one of: {}",
                config.logging.target,
                valid_targets.join(", ")
            ),
        ));
    }

    let valid_rotations = ["daily", "hourly", "never"];
    if !valid_rotations.contains(&config.logging.rotation.as_str()) {
        return Err(invalid(
            "logging.rotation",
            format!(
                "unsupported log rotation '{}'; expected one of: {}",
                config.logging.rotation,
                valid_rotations.join(", ")
            ),
        ));
    }

    Ok(())
}

fn validate_host(config: &Config) -> ConfigResult<()> {
    let secs = config.host.shutdown_timeout_secs;
    if secs == 0 || secs > MAX_SHUTDOWN_TIMEOUT_SECS {
        return Err(invalid(
            "host.shutdown_timeout_secs",
            format!("shutdown_timeout_secs must be between 1 and {MAX_SHUTDOWN_TIMEOUT_SECS}"),
        ));
    }

    let limits = &config.host.resource_limits;
    for (key, value) in [
        ("max_processes", limits.max_processes),
        ("max_memory_bytes", limits.max_memory_bytes),
        ("max_open_files", limits.max_open_files),
    ] {
        if value == Some(0) {
            return Err(invalid(
                format!("host.resource_limits.{key}"),
                "a resource limit of 0 would stop the worker from starting",
            ));
        }
    }
    Ok(())
}

fn require_absolute(field: &str, path: &Path) -> ConfigResult<()> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(invalid(
            field,
            format!("path '{}' must be absolute", path.display()),
        ))
    }
}

fn validate_plugins(config: &Config) -> ConfigResult<()> {
    for (name, plugin) in &config.plugins {
        let field = format!("plugins.{name}");
        if let Err(e) = PathSafeString::new(name.as_str()) {
            return Err(invalid(field, format!("plugin name is not path-safe: {e}")));
        }
        if plugin.locator.trim().is_empty() {
            return Err(invalid(format!("{field}.locator"), "locator must not be empty"));
        }
        if let Some(grant) = plugin.network.iter().find(|g| g.trim().is_empty()) {
            return Err(invalid(
                format!("{field}.network"),
                format!("network grant {grant:?} is empty"),
            ));
        }
        for (list, paths) in [
            ("read", &plugin.read),
            ("write", &plugin.write),
            ("execute", &plugin.execute),
        ] {
            for path in paths {
                require_absolute(&format!("{field}.{list}"), path)?;
            }
        }
    }
    Ok(())
}

fn validate_locations(config: &Config) -> ConfigResult<()> {
    for (name, location) in &config.locations {
        let field = format!("locations.{name}");
        if let Err(e) = PathSafeString::new(name.as_str()) {
            return Err(invalid(field, format!("location name is not path-safe: {e}")));
        }
        require_absolute(&format!("{field}.path"), &location.path)?;
    }
    Ok(())
}
