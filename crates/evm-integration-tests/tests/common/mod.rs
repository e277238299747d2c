//! Shared helpers for the plugin host integration tests.

use std::path::PathBuf;
use std::time::Duration;

use evm_core::PathSafeString;
use evm_plugins::{CapabilitySet, HostConfig, PluginDescriptor, PluginHost, PluginLocator};

/// Locator of the fixture plugin binary built alongside these tests.
pub fn fixture_locator() -> PluginLocator {
    PluginLocator::Path(PathBuf::from(env!("CARGO_BIN_EXE_evm-fixture-plugin")))
}

/// Descriptor for the fixture plugin with `caps`.
pub fn fixture_descriptor(caps: CapabilitySet) -> PluginDescriptor {
    PluginDescriptor::new(fixture_locator(), caps)
}

/// A host that runs workers without OS enforcement, so the tests run on
/// any kernel.
pub fn unsandboxed_host() -> PluginHost {
    PluginHost::new(HostConfig {
        os_sandbox: false,
        shutdown_timeout: Duration::from_secs(2),
        ..HostConfig::default()
    })
}

/// Parse a path-safe test value.
pub fn safe(s: &str) -> PathSafeString {
    PathSafeString::new(s).unwrap()
}
