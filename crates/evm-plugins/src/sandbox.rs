//! OS-level sandbox profiles for plugin worker processes.
//!
//! A [`SandboxProfile`] turns a plugin's [`CapabilitySet`] into what the
//! platform can enforce:
//!
//! - **Linux**: Landlock filesystem rules plus TCP port rules (network
//!   restrictions need ABI v4 / kernel 6.7+), applied in `pre_exec`
//! - **macOS**: `sandbox-exec` with an inline Scheme DSL profile
//! - **Other**: no enforcement, with a warning
//!
//! Beyond the granted capabilities a worker may only read and execute its own
//! executable and the system library directories its loader needs. Files
//! next to the executable are not readable unless granted, so plugins
//! sharing a directory cannot read each other.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
use tracing::warn;

use crate::capabilities::{CapabilitySet, FsAccess};
use crate::error::PluginResult;

/// Shared-library directories every dynamically linked worker needs.
const SYSTEM_LIBRARY_DIRS: &[&str] = &["/lib", "/lib64", "/usr/lib", "/usr/lib64", "/usr/local/lib"];

/// Files read by the dynamic loader and by most runtimes at startup.
const SYSTEM_READ_FILES: &[&str] = &["/etc/ld.so.cache", "/dev/urandom"];

/// Name resolution and TLS trust files, granted when any network access is.
const NETWORK_SUPPORT_PATHS: &[&str] = &[
    "/etc/resolv.conf",
    "/etc/hosts",
    "/etc/nsswitch.conf",
    "/etc/ssl",
    "/etc/ca-certificates",
    "/etc/pki",
];

/// Resource limits applied to worker processes.
///
/// Enforced via `setrlimit` in a `pre_exec` hook on Linux, with or without
/// Landlock. Not enforced on macOS (sandbox-exec does not support resource
/// limits). A `None` field leaves the inherited limit in place.
///
/// `RLIMIT_NPROC` is per-UID on Linux, not per-process: the limit must
/// account for every process the user runs. `RLIMIT_AS` limits virtual
/// address space, which runtimes like V8 reserve generously at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum number of processes/threads (`RLIMIT_NPROC`).
    pub max_processes: Option<u64>,
    /// Maximum virtual address space in bytes (`RLIMIT_AS`).
    pub max_memory_bytes: Option<u64>,
    /// Maximum number of open file descriptors (`RLIMIT_NOFILE`).
    pub max_open_files: Option<u64>,
}

impl ResourceLimits {
    /// Whether no limit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.max_processes.is_none() && self.max_memory_bytes.is_none() && self.max_open_files.is_none()
    }
}

/// Access granted beneath one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathAccess {
    /// Read files and list directories.
    Read,
    /// Read and execute (binaries, shared libraries).
    ReadExecute,
    /// Read, create, modify, and remove.
    ReadWrite,
}

/// A filesystem rule: `access` beneath `path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRule {
    /// Filesystem path.
    pub path: PathBuf,
    /// Granted access.
    pub access: PathAccess,
}

impl PathRule {
    fn new(path: impl Into<PathBuf>, access: PathAccess) -> Self {
        Self {
            path: path.into(),
            access,
        }
    }
}

/// How outbound TCP is restricted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkPolicy {
    /// No network grants: TCP bind and connect are denied.
    DenyAll,
    /// Connect allowed only to these ports.
    AllowPorts(Vec<u16>),
    /// A host-only grant cannot be expressed as a port rule; TCP is left
    /// unrestricted.
    Unrestricted,
}

/// Sandbox profile for one plugin worker.
#[derive(Debug, Clone)]
pub struct SandboxProfile {
    /// Directory containing the plugin executable; the worker's working
    /// directory. Not readable unless granted.
    pub plugin_dir: PathBuf,
    /// The plugin executable.
    pub executable: PathBuf,
    /// Granted capabilities.
    pub capabilities: CapabilitySet,
    /// Optional resource limits.
    pub resource_limits: Option<ResourceLimits>,
}

impl SandboxProfile {
    /// Profile for `executable` with `capabilities`. The plugin directory is
    /// the executable's parent.
    #[must_use]
    pub fn new(executable: PathBuf, capabilities: CapabilitySet) -> Self {
        let plugin_dir = executable
            .parent()
            .map_or_else(|| PathBuf::from("/"), Path::to_path_buf);
        Self {
            plugin_dir,
            executable,
            capabilities,
            resource_limits: None,
        }
    }

    /// Set resource limits for the worker.
    #[must_use]
    pub fn with_resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = Some(limits);
        self
    }

    /// Wrap the worker command with platform-specific enforcement.
    ///
    /// On macOS, this prepends `sandbox-exec -p <profile>`. On Linux the
    /// command is unchanged; Landlock is applied in `pre_exec` by the host.
    /// Elsewhere the command is unchanged and a warning is logged.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile cannot be generated.
    pub fn wrap_command(&self, args: &[String]) -> PluginResult<(PathBuf, Vec<String>)> {
        self.platform_wrap_command(args)
    }

    #[cfg(target_os = "macos")]
    #[allow(clippy::unnecessary_wraps)]
    fn platform_wrap_command(&self, args: &[String]) -> PluginResult<(PathBuf, Vec<String>)> {
        let mut sandbox_args = vec![
            "-p".to_string(),
            self.macos_profile(),
            self.executable.to_string_lossy().into_owned(),
        ];
        sandbox_args.extend(args.iter().cloned());
        Ok((PathBuf::from("/usr/bin/sandbox-exec"), sandbox_args))
    }

    #[cfg(target_os = "linux")]
    #[allow(clippy::unnecessary_wraps)]
    fn platform_wrap_command(&self, args: &[String]) -> PluginResult<(PathBuf, Vec<String>)> {
        Ok((self.executable.clone(), args.to_vec()))
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    #[allow(clippy::unnecessary_wraps)]
    fn platform_wrap_command(&self, args: &[String]) -> PluginResult<(PathBuf, Vec<String>)> {
        warn!(
            executable = %self.executable.display(),
            "OS-level sandboxing is not available on this platform; \
             plugin will run without sandbox restrictions"
        );
        Ok((self.executable.clone(), args.to_vec()))
    }

    /// Filesystem rules for Landlock.
    #[must_use]
    pub fn path_rules(&self) -> Vec<PathRule> {
        let mut rules = vec![PathRule::new(&self.executable, PathAccess::ReadExecute)];

        rules.extend(
            SYSTEM_LIBRARY_DIRS
                .iter()
                .map(Path::new)
                .filter(|p| p.exists())
                .map(|p| PathRule::new(p, PathAccess::ReadExecute)),
        );
        rules.extend(
            SYSTEM_READ_FILES
                .iter()
                .map(Path::new)
                .filter(|p| p.exists())
                .map(|p| PathRule::new(p, PathAccess::Read)),
        );
        rules.push(PathRule::new("/dev/null", PathAccess::ReadWrite));

        if !self.capabilities.network.is_empty() {
            rules.extend(
                NETWORK_SUPPORT_PATHS
                    .iter()
                    .map(Path::new)
                    .filter(|p| p.exists())
                    .map(|p| PathRule::new(p, PathAccess::Read)),
            );
        }

        for grant in &self.capabilities.filesystem {
            let access = match grant.access {
                FsAccess::Read => PathAccess::Read,
                FsAccess::ReadWrite => PathAccess::ReadWrite,
            };
            rules.push(PathRule::new(&grant.path, access));
        }
        for path in &self.capabilities.execute {
            rules.push(PathRule::new(path, PathAccess::ReadExecute));
        }

        rules
    }

    /// How outbound TCP is restricted.
    #[must_use]
    pub fn network_policy(&self) -> NetworkPolicy {
        let grants = &self.capabilities.network;
        if grants.is_empty() {
            return NetworkPolicy::DenyAll;
        }
        let ports: Option<Vec<u16>> = grants.iter().map(crate::NetworkGrant::port).collect();
        match ports {
            Some(mut ports) => {
                ports.sort_unstable();
                ports.dedup();
                NetworkPolicy::AllowPorts(ports)
            },
            None => NetworkPolicy::Unrestricted,
        }
    }

    /// Generate a macOS `sandbox-exec` Scheme DSL profile.
    ///
    /// `sandbox-exec` is deprecated but still functional. Its network filters
    /// only accept `*` or `localhost` as the host, so grants are enforced by
    /// port.
    #[must_use]
    pub fn macos_profile(&self) -> String {
        let mut profile = String::from("(version 1)\n(deny default)\n\n");

        let _ = writeln!(
            profile,
            "(allow file-read* (literal \"{}\"))",
            escape(&self.executable)
        );
        for sys_path in [
            "/usr/lib",
            "/usr/local/lib",
            "/System/Library",
            "/private/var/db/dyld",
            "/dev",
        ] {
            let _ = writeln!(profile, "(allow file-read* (subpath \"{sys_path}\"))");
        }
        profile.push_str("(allow file-write-data (literal \"/dev/null\"))\n");

        for grant in &self.capabilities.filesystem {
            let path = escape(&grant.path);
            let _ = writeln!(profile, "(allow file-read* (subpath \"{path}\"))");
            if grant.access == FsAccess::ReadWrite {
                let _ = writeln!(profile, "(allow file-write* (subpath \"{path}\"))");
            }
        }

        let _ = writeln!(
            profile,
            "(allow process-exec (literal \"{}\"))",
            escape(&self.executable)
        );
        for path in &self.capabilities.execute {
            let path = escape(path);
            let _ = writeln!(profile, "(allow file-read* (literal \"{path}\"))");
            let _ = writeln!(profile, "(allow process-exec (literal \"{path}\"))");
        }
        profile.push_str("(allow process-fork)\n");
        profile.push_str("(allow sysctl-read)\n");
        profile.push_str("(allow mach-lookup)\n");

        match self.network_policy() {
            NetworkPolicy::DenyAll => {},
            NetworkPolicy::AllowPorts(ports) => {
                profile.push_str("(allow network-outbound (literal \"/private/var/run/mDNSResponder\"))\n");
                profile.push_str("(allow file-read* (literal \"/private/etc/hosts\") (literal \"/private/etc/resolv.conf\"))\n");
                for port in ports {
                    let _ = writeln!(profile, "(allow network-outbound (remote tcp \"*:{port}\"))");
                }
            },
            NetworkPolicy::Unrestricted => {
                profile.push_str("(allow file-read* (literal \"/private/etc/hosts\") (literal \"/private/etc/resolv.conf\"))\n");
                profile.push_str("(allow network-outbound)\n");
            },
        }

        profile
    }
}

fn escape(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "\\\\").replace('"', "\\\"")
}
