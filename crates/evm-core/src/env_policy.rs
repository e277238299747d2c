//! Environment policy for spawned plugin workers.
//!
//! Workers start from an empty environment. The host forwards a small set of
//! locale and terminal variables from its own environment, and plugin
//! configuration may add entries of its own, except for the variables listed
//! here. Those redirect the worker's trust anchors or inject code into it.

use std::ffi::OsString;

/// Env vars that plugin configuration must never set on a worker.
const BLOCKED_SPAWN_ENV: &[&str] = &[
    // Core execution environment
    "HOME",
    "PATH",
    "EVM_HOME",
    // Library injection (Linux)
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    // Library injection (macOS)
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "DYLD_FRAMEWORK_PATH",
    // Interpreter code injection
    "NODE_OPTIONS",
    "NODE_PATH",
    "PYTHONPATH",
    "PYTHONSTARTUP",
    "PERL5LIB",
    "RUBYLIB",
    "BASH_ENV",
    "ENV",
    "JAVA_TOOL_OPTIONS",
    "_JAVA_OPTIONS",
    "JDK_JAVA_OPTIONS",
    // TLS trust injection
    "NODE_EXTRA_CA_CERTS",
    "SSL_CERT_FILE",
    "SSL_CERT_DIR",
    "OPENSSL_CONF",
    // Temp directory redirection
    "TMPDIR",
    "TEMP",
    "TMP",
    // Traffic interception via proxy
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "ALL_PROXY",
    "NO_PROXY",
];

/// Prefixes blocked entirely (case-insensitive).
const BLOCKED_PREFIXES: &[&str] = &["ld_", "dyld_", "npm_config_"];

/// Host variables forwarded to every worker when set.
pub const FORWARDED_HOST_ENV: &[&str] = &["LANG", "LC_ALL", "LC_CTYPE", "TERM", "TZ"];

/// Returns `true` if plugin configuration must not set `key`.
#[must_use]
pub fn is_blocked_spawn_env(key: &str) -> bool {
    if BLOCKED_SPAWN_ENV
        .iter()
        .any(|k| k.eq_ignore_ascii_case(key))
    {
        return true;
    }
    let lower = key.to_ascii_lowercase();
    BLOCKED_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// The environment a worker is started with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnEnv {
    /// Variables to set on the worker.
    pub vars: Vec<(OsString, OsString)>,
    /// Configured keys dropped by the blocklist.
    pub rejected: Vec<String>,
}

impl SpawnEnv {
    /// Build a worker environment from the forwarded host variables and the
    /// plugin's configured entries.
    ///
    /// Configured entries override forwarded ones with the same key.
    #[must_use]
    pub fn build<'a, I>(configured: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let forwarded = FORWARDED_HOST_ENV
            .iter()
            .filter_map(|key| std::env::var_os(key).map(|value| (*key, value)));
        Self::from_parts(forwarded, configured)
    }

    fn from_parts<'a, F, I>(forwarded: F, configured: I) -> Self
    where
        F: IntoIterator<Item = (&'a str, OsString)>,
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut env = Self::default();
        for (key, value) in forwarded {
            env.vars.push((OsString::from(key), value));
        }
        for (key, value) in configured {
            if is_blocked_spawn_env(key) {
                env.rejected.push(key.to_string());
                continue;
            }
            env.vars.retain(|(existing, _)| existing != key);
            env.vars.push((OsString::from(key), OsString::from(value)));
        }
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_matches_are_blocked() {
        for key in [
            "LD_PRELOAD",
            "DYLD_INSERT_LIBRARIES",
            "NODE_OPTIONS",
            "PYTHONPATH",
            "BASH_ENV",
            "HOME",
            "PATH",
            "EVM_HOME",
            "HTTPS_PROXY",
            "SSL_CERT_FILE",
            "TMPDIR",
        ] {
            assert!(is_blocked_spawn_env(key), "{key} should be blocked");
        }
    }

    #[test]
    fn matching_ignores_case() {
        assert!(is_blocked_spawn_env("ld_preload"));
        assert!(is_blocked_spawn_env("Path"));
        assert!(is_blocked_spawn_env("evm_home"));
    }

    #[test]
    fn prefixes_are_blocked() {
        assert!(is_blocked_spawn_env("LD_DEBUG"));
        assert!(is_blocked_spawn_env("DYLD_PRINT_LIBRARIES"));
        assert!(is_blocked_spawn_env("NPM_CONFIG_PREFIX"));
    }

    #[test]
    fn ordinary_vars_are_allowed() {
        for key in ["NODE_MIRROR", "LDFLAGS", "LANG", "TERM", "EVM_PLUGIN_MODE"] {
            assert!(!is_blocked_spawn_env(key), "{key} should be allowed");
        }
    }

    #[test]
    fn configured_entries_are_filtered() {
        let env = SpawnEnv::from_parts(
            [("LANG", OsString::from("C.UTF-8"))],
            [("MIRROR", "https://example.org"), ("LD_PRELOAD", "/tmp/x.so")],
        );
        assert_eq!(env.rejected, vec!["LD_PRELOAD".to_string()]);
        assert_eq!(
            env.vars,
            vec![
                (OsString::from("LANG"), OsString::from("C.UTF-8")),
                (OsString::from("MIRROR"), OsString::from("https://example.org")),
            ]
        );
    }

    #[test]
    fn configured_entries_override_forwarded() {
        let env = SpawnEnv::from_parts(
            [("TZ", OsString::from("UTC"))],
            [("TZ", "Europe/Berlin")],
        );
        assert_eq!(
            env.vars,
            vec![(OsString::from("TZ"), OsString::from("Europe/Berlin"))]
        );
    }
}
