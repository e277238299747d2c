//! Integration test crate for evm.
//!
//! This crate exists solely for integration testing. It is `publish = false`
//! and has no library code. Tests live in `tests/` and drive the
//! `evm-fixture-plugin` binary as a real plugin worker.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
