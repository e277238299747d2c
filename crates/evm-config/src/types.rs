//! Configuration types for `evm`.
//!
//! These types mirror the domain types of the other crates without depending
//! on them; conversion happens in the CLI. Every struct implements
//! [`Default`] so that a bare `[section]` header produces a working
//! configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging and tracing.
    pub logging: LoggingSection,
    /// Plugin host settings.
    pub host: HostSection,
    /// Registered plugins, keyed by identifier.
    pub plugins: BTreeMap<String, PluginSection>,
    /// Named install locations.
    pub locations: BTreeMap<String, LocationSection>,
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"`, or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["evm_rpc=trace"]`).
    pub directives: Vec<String>,
    /// Where logs go: `"stderr"`, or `"file"` for rotating files under
    /// `~/.evm/logs/`.
    pub target: String,
    /// Rotation for file logs: `"daily"`, `"hourly"`, or `"never"`.
    pub rotation: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "warn".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
            target: "stderr".to_owned(),
            rotation: "daily".to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// HostSection
// ---------------------------------------------------------------------------

/// Plugin host settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSection {
    /// Apply OS sandboxing to plugin workers.
    pub os_sandbox: bool,
    /// Refuse to run a plugin when the sandbox cannot be enforced.
    pub require_sandbox: bool,
    /// Seconds a worker may take to exit after its channel closes.
    pub shutdown_timeout_secs: u64,
    /// Per-request deadline in seconds; `0` waits indefinitely.
    pub request_timeout_secs: u64,
    /// `setrlimit` caps for workers (Linux only).
    pub resource_limits: ResourceLimitsSection,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            os_sandbox: true,
            require_sandbox: false,
            shutdown_timeout_secs: 5,
            request_timeout_secs: 0,
            resource_limits: ResourceLimitsSection::default(),
        }
    }
}

/// Per-worker resource limits. An absent key keeps the limit `evm` itself
/// runs with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceLimitsSection {
    /// `RLIMIT_NPROC`. Counts every process of the user, not just the worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_processes: Option<u64>,
    /// `RLIMIT_AS`, in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_memory_bytes: Option<u64>,
    /// `RLIMIT_NOFILE`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_open_files: Option<u64>,
}

// ---------------------------------------------------------------------------
// PluginSection
// ---------------------------------------------------------------------------

/// A registered plugin and the capabilities it is spawned with.
///
/// Every capability list defaults to empty: nothing is granted unless listed.
///
/// `Debug` output redacts `env` values.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PluginSection {
    /// Path or URL of the plugin executable.
    pub locator: String,
    /// Arguments passed to the plugin.
    pub args: Vec<String>,
    /// Extra environment for the plugin.
    pub env: BTreeMap<String, String>,
    /// Network grants, `host` or `host:port`.
    pub network: Vec<String>,
    /// Read-only filesystem grants.
    pub read: Vec<PathBuf>,
    /// Read-write filesystem grants.
    pub write: Vec<PathBuf>,
    /// Executables the plugin may run.
    pub execute: Vec<PathBuf>,
}

impl fmt::Debug for PluginSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env: BTreeMap<&str, &str> = self.env.keys().map(|k| (k.as_str(), "***")).collect();
        f.debug_struct("PluginSection")
            .field("locator", &self.locator)
            .field("args", &self.args)
            .field("env", &env)
            .field("network", &self.network)
            .field("read", &self.read)
            .field("write", &self.write)
            .field("execute", &self.execute)
            .finish()
    }
}

impl PluginSection {
    /// A plugin at `locator` with no capabilities.
    #[must_use]
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// LocationSection
// ---------------------------------------------------------------------------

/// An install location: a directory holding `<IDENT>/<VERSION>` trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationSection {
    /// Absolute directory path.
    pub path: PathBuf,
}
