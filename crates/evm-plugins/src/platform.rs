//! Linux enforcement of a [`SandboxProfile`]: Landlock and resource limits.
//!
//! Enforcement is split in two phases. [`prepare`] runs in the parent, where
//! opening files and allocating are safe. [`enforce`] runs inside `pre_exec`
//! between `fork()` and `exec()` and only issues Landlock and `setrlimit`
//! syscalls on the pre-opened descriptors.
//!
//! Resource limits apply even when Landlock is switched off.

#![allow(unsafe_code)]

use std::io;

use landlock::{
    ABI, Access, AccessFs, AccessNet, BitFlags, CompatLevel, Compatible, NetPort, PathBeneath,
    PathFd, Ruleset, RulesetAttr, RulesetCreatedAttr, RulesetStatus,
};
use tracing::debug;

use crate::sandbox::{NetworkPolicy, PathAccess, ResourceLimits, SandboxProfile};

const ABI_VERSION: ABI = ABI::V5;

/// Rules resolved in the parent, ready to apply in the child.
pub(crate) struct PreparedSandbox {
    landlock: bool,
    rules: Vec<(PathFd, BitFlags<AccessFs>)>,
    network: NetworkPolicy,
    limits: Option<ResourceLimits>,
    require_enforcement: bool,
}

fn access_flags(access: PathAccess, is_dir: bool) -> BitFlags<AccessFs> {
    let flags = match access {
        PathAccess::Read => AccessFs::ReadFile | AccessFs::ReadDir,
        PathAccess::ReadExecute => AccessFs::from_read(ABI_VERSION),
        PathAccess::ReadWrite => AccessFs::from_write(ABI_VERSION) | AccessFs::ReadFile | AccessFs::ReadDir,
    };
    if is_dir {
        flags
    } else {
        flags & AccessFs::from_file(ABI_VERSION)
    }
}

/// Phase 1 (parent process): open path descriptors and compute access flags.
///
/// Paths that don't exist are skipped. With `landlock` off only the resource
/// limits are carried over.
pub(crate) fn prepare(profile: &SandboxProfile, landlock: bool, require_enforcement: bool) -> PreparedSandbox {
    let rules = if landlock {
        profile
            .path_rules()
            .into_iter()
            .filter_map(|rule| match PathFd::new(&rule.path) {
                Ok(fd) => Some((fd, access_flags(rule.access, rule.path.is_dir()))),
                Err(e) => {
                    debug!(path = %rule.path.display(), error = %e, "Skipping sandbox rule");
                    None
                },
            })
            .collect()
    } else {
        Vec::new()
    };

    PreparedSandbox {
        landlock,
        rules,
        network: profile.network_policy(),
        limits: profile.resource_limits.clone(),
        require_enforcement,
    }
}

/// Phase 2 (child process, inside `pre_exec`): build the ruleset, restrict
/// the process, then apply resource limits.
pub(crate) fn enforce(prepared: PreparedSandbox) -> io::Result<()> {
    if prepared.landlock {
        restrict(prepared.rules, &prepared.network, prepared.require_enforcement)?;
    }
    if let Some(limits) = &prepared.limits {
        apply_resource_limits(limits)?;
    }
    Ok(())
}

fn restrict(
    rules: Vec<(PathFd, BitFlags<AccessFs>)>,
    network: &NetworkPolicy,
    require_enforcement: bool,
) -> io::Result<()> {
    let mut ruleset = Ruleset::default()
        .set_compatibility(CompatLevel::BestEffort)
        .handle_access(AccessFs::from_all(ABI_VERSION))
        .map_err(io::Error::other)?;
    if !matches!(network, NetworkPolicy::Unrestricted) {
        ruleset = ruleset
            .handle_access(AccessNet::from_all(ABI_VERSION))
            .map_err(io::Error::other)?;
    }
    let mut ruleset = ruleset.create().map_err(io::Error::other)?;

    for (fd, access) in rules {
        ruleset = ruleset
            .add_rule(PathBeneath::new(fd, access))
            .map_err(io::Error::other)?;
    }
    if let NetworkPolicy::AllowPorts(ports) = network {
        for port in ports {
            ruleset = ruleset
                .add_rule(NetPort::new(*port, AccessNet::ConnectTcp))
                .map_err(io::Error::other)?;
        }
    }

    let status = ruleset.restrict_self().map_err(io::Error::other)?;
    check_status(status.ruleset, network, require_enforcement)
}

/// Errno reported to the parent when a required sandbox is not enforced.
/// Only the raw errno survives the trip from `pre_exec` back to `spawn`.
pub(crate) const NOT_ENFORCED_ERRNO: i32 = libc::EOPNOTSUPP;

/// Decide whether the kernel enforced enough of the ruleset.
///
/// A partially enforced ruleset may be missing the network rules, so it
/// only satisfies a required sandbox when the network is unrestricted.
fn check_status(status: RulesetStatus, network: &NetworkPolicy, require_enforcement: bool) -> io::Result<()> {
    if !require_enforcement {
        return Ok(());
    }
    match status {
        RulesetStatus::FullyEnforced => Ok(()),
        RulesetStatus::PartiallyEnforced if matches!(network, NetworkPolicy::Unrestricted) => Ok(()),
        RulesetStatus::PartiallyEnforced | RulesetStatus::NotEnforced => {
            Err(io::Error::from_raw_os_error(NOT_ENFORCED_ERRNO))
        },
    }
}

/// Apply resource limits via `setrlimit`.
///
/// Uses only async-signal-safe operations: `setrlimit` is a direct syscall,
/// and `Error::last_os_error()` reads `errno` without heap allocation.
fn apply_resource_limits(limits: &ResourceLimits) -> io::Result<()> {
    for (resource, value) in [
        (libc::RLIMIT_NPROC, limits.max_processes),
        (libc::RLIMIT_AS, limits.max_memory_bytes),
        (libc::RLIMIT_NOFILE, limits.max_open_files),
    ] {
        let Some(value) = value else { continue };
        let limit = libc::rlimit {
            rlim_cur: value,
            rlim_max: value,
        };
        // SAFETY: `limit` is a valid, initialized rlimit that outlives the call.
        if unsafe { libc::setrlimit(resource, &raw const limit) } != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
