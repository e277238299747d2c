//! Bridge from `evm_config::Config` to domain types.

use std::time::Duration;

use evm_config::{Config, PluginSection, ResourceLimitsSection};
use evm_core::EvmHome;
use evm_plugins::{
    CapabilitySet, FsAccess, HostConfig, NetworkGrant, PluginDescriptor, PluginLocator, PluginResult,
    ResourceLimits,
};
use evm_telemetry::{FileRotation, LogConfig, LogFormat};

/// Convert config to [`LogConfig`]. `verbose` raises the level to `debug`.
/// File logs go to the home's `logs/` directory.
#[must_use]
pub(crate) fn to_log_config(cfg: &Config, home: &EvmHome, verbose: bool) -> LogConfig {
    let format = match cfg.logging.format.as_str() {
        "pretty" => LogFormat::Pretty,
        "json" => LogFormat::Json,
        "full" => LogFormat::Full,
        _ => LogFormat::Compact,
    };
    let level = if verbose { "debug" } else { cfg.logging.level.as_str() };

    let mut log_config = LogConfig::new(level).with_format(format);
    for directive in &cfg.logging.directives {
        log_config = log_config.with_directive(directive);
    }
    if cfg.logging.target == "file" {
        let rotation = match cfg.logging.rotation.as_str() {
            "hourly" => FileRotation::Hourly,
            "never" => FileRotation::Never,
            _ => FileRotation::Daily,
        };
        log_config = log_config.with_file_logging(home.logs_dir(), rotation);
    }
    log_config
}

/// Convert config to [`HostConfig`].
#[must_use]
pub(crate) fn to_host_config(cfg: &Config) -> HostConfig {
    let request_timeout = match cfg.host.request_timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    HostConfig {
        os_sandbox: cfg.host.os_sandbox,
        require_sandbox: cfg.host.require_sandbox,
        shutdown_timeout: Duration::from_secs(cfg.host.shutdown_timeout_secs),
        request_timeout,
        resource_limits: to_resource_limits(&cfg.host.resource_limits),
    }
}

fn to_resource_limits(section: &ResourceLimitsSection) -> Option<ResourceLimits> {
    let limits = ResourceLimits {
        max_processes: section.max_processes,
        max_memory_bytes: section.max_memory_bytes,
        max_open_files: section.max_open_files,
    };
    (!limits.is_empty()).then_some(limits)
}

/// Convert a plugin's grants to a [`CapabilitySet`].
///
/// # Errors
///
/// Returns an error if a network grant does not parse.
pub(crate) fn to_capabilities(section: &PluginSection) -> PluginResult<CapabilitySet> {
    let mut caps = CapabilitySet::none();
    for grant in &section.network {
        caps = caps.with_network(NetworkGrant::parse(grant)?);
    }
    for path in &section.read {
        caps = caps.with_read(path);
    }
    for path in &section.write {
        caps = caps.with_read_write(path);
    }
    for path in &section.execute {
        caps = caps.with_execute(path);
    }
    Ok(caps)
}

/// Convert a registered plugin to the [`PluginDescriptor`] it is spawned
/// from, with `capabilities` in place of its configured grants.
///
/// # Errors
///
/// Returns an error if the locator does not parse.
pub(crate) fn to_descriptor(
    section: &PluginSection,
    capabilities: CapabilitySet,
) -> PluginResult<PluginDescriptor> {
    let locator = PluginLocator::parse(&section.locator)?;
    Ok(PluginDescriptor::new(locator, capabilities)
        .with_args(section.args.clone())
        .with_env(section.env.clone()))
}

/// Record a plugin registration in config form.
#[must_use]
pub(crate) fn to_plugin_section(locator: &PluginLocator, caps: &CapabilitySet) -> PluginSection {
    let mut section = PluginSection::new(locator.to_string());
    section.network = caps.network.iter().map(ToString::to_string).collect();
    for grant in &caps.filesystem {
        match grant.access {
            FsAccess::Read => section.read.push(grant.path.clone()),
            FsAccess::ReadWrite => section.write.push(grant.path.clone()),
        }
    }
    section.execute.clone_from(&caps.execute);
    section
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use evm_telemetry::LogTarget;

    use super::*;

    #[test]
    fn log_config_follows_config_and_verbose() {
        let home = EvmHome::from_path("/srv/evm");
        let mut cfg = Config::default();
        cfg.logging.format = "json".to_owned();
        cfg.logging.directives.push("evm_rpc=trace".to_owned());

        let quiet = to_log_config(&cfg, &home, false);
        assert_eq!(quiet.level, "warn");
        assert_eq!(quiet.format, LogFormat::Json);
        assert_eq!(quiet.directives, vec!["evm_rpc=trace"]);
        assert_eq!(quiet.target, LogTarget::Stderr);

        assert_eq!(to_log_config(&cfg, &home, true).level, "debug");
    }

    #[test]
    fn file_target_logs_under_home() {
        let home = EvmHome::from_path("/srv/evm");
        let mut cfg = Config::default();
        cfg.logging.target = "file".to_owned();
        cfg.logging.rotation = "hourly".to_owned();

        let log_config = to_log_config(&cfg, &home, false);
        assert_eq!(log_config.target, LogTarget::File(PathBuf::from("/srv/evm/logs")));
        assert_eq!(log_config.rotation, FileRotation::Hourly);
    }

    #[test]
    fn resource_limits_are_bridged_when_set() {
        let mut cfg = Config::default();
        assert!(to_host_config(&cfg).resource_limits.is_none());

        cfg.host.resource_limits.max_open_files = Some(64);
        let limits = to_host_config(&cfg).resource_limits.unwrap();
        assert_eq!(limits.max_open_files, Some(64));
        assert_eq!(limits.max_processes, None);
        assert_eq!(limits.max_memory_bytes, None);
    }

    #[test]
    fn zero_request_timeout_means_none() {
        let mut cfg = Config::default();
        assert!(to_host_config(&cfg).request_timeout.is_none());
        cfg.host.request_timeout_secs = 30;
        assert_eq!(to_host_config(&cfg).request_timeout, Some(Duration::from_secs(30)));
        assert!(to_host_config(&cfg).os_sandbox);
    }

    #[test]
    fn descriptor_carries_grants() {
        let mut section = PluginSection::new("/opt/evm/plugins/node");
        section.network.push("nodejs.org:443".to_owned());
        section.read.push(PathBuf::from("/etc/ssl"));
        section.write.push(PathBuf::from("/var/cache/node"));
        section.args.push("--quiet".to_owned());

        let caps = to_capabilities(&section).unwrap();
        let descriptor = to_descriptor(&section, caps).unwrap();
        let caps = descriptor.capabilities();
        assert_eq!(caps.network, vec![NetworkGrant::host_port("nodejs.org", 443)]);
        assert_eq!(caps.filesystem.len(), 2);
        assert_eq!(descriptor.args(), ["--quiet".to_owned()]);
    }

    #[test]
    fn bad_network_grant_is_rejected() {
        let mut section = PluginSection::new("/opt/node");
        section.network.push("host:notaport".to_owned());
        assert!(to_capabilities(&section).is_err());
    }

    #[test]
    fn plugin_section_round_trips_grants() {
        let locator = PluginLocator::parse("/opt/evm/plugins/node").unwrap();
        let caps = CapabilitySet::none()
            .with_network(NetworkGrant::host("nodejs.org"))
            .with_read("/etc/ssl")
            .with_read_write("/var/cache/node")
            .with_execute("/usr/bin/tar");
        let section = to_plugin_section(&locator, &caps);
        assert_eq!(section.locator, "/opt/evm/plugins/node");
        assert_eq!(to_capabilities(&section).unwrap(), caps);
    }
}
