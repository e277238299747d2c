//! EVM Core - shared types for the `evm` environment version manager.
//!
//! This crate provides:
//! - [`PathSafeString`], the refinement type every user-supplied identifier,
//!   version, and location name passes through before touching the filesystem
//! - The environment policy applied to spawned plugin workers
//! - The [`EvmHome`] directory layout

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod dirs;
pub mod env_policy;
pub mod path_safe;

pub use dirs::EvmHome;
pub use path_safe::{PathSafeError, PathSafeString};
