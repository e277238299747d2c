//! EVM Plugins - the trust boundary between `evm` and its installers.
//!
//! Installers are untrusted plugin executables. The host spawns each one as
//! a sandboxed worker process scoped to an explicit [`CapabilitySet`] and
//! talks to it over stdio with the `evm-rpc` protocol:
//!
//! - [`PluginHost`] spawns, supervises, and tears down workers.
//! - [`PluginClient`] is the typed host-side facade (`properties`, `install`).
//! - [`guest`] is the worker-side half: implement [`guest::Plugin`] and call
//!   [`guest::serve_stdio`].

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod capabilities;
pub mod client;
pub mod descriptor;
pub mod error;
pub mod guest;
pub mod host;
pub mod protocol;
pub mod sandbox;

#[cfg(target_os = "linux")]
mod platform;

pub use capabilities::{CapabilitySet, FilesystemGrant, FsAccess, NetworkGrant};
pub use client::PluginClient;
pub use descriptor::{PluginDescriptor, PluginLocator};
pub use error::{PluginError, PluginResult};
pub use host::{HostConfig, PluginHost, PluginState};
pub use protocol::{InstallArtifacts, PluginProperties, PluginRequest};
pub use sandbox::{NetworkPolicy, ResourceLimits, SandboxProfile};
