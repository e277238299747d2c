//! Installer plugin used by the integration tests.
//!
//! Behaviour is keyed on the requested version:
//!
//! - `crash` exits the process mid-request
//! - `hang` never answers
//! - `fail` rejects with an application error
//! - `escape` writes to `$FIXTURE_ESCAPE_PATH`, outside the install directory
//! - `limits` copies `/proc/self/limits` into the install directory
//! - anything else writes `bin/node` into the install directory
//!
//! `properties` reports `$FIXTURE_TARGET`, defaulting to `linux-x64`.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]

use std::path::PathBuf;

use async_trait::async_trait;
use evm_core::PathSafeString;
use evm_plugins::guest::{self, Plugin};
use evm_plugins::{InstallArtifacts, PluginProperties};
use evm_rpc::ApplicationError;
use evm_telemetry::{LogConfig, setup_logging};
use tracing::{debug, info};

struct FixturePlugin;

fn io_error(context: &str, e: &std::io::Error) -> ApplicationError {
    ApplicationError::new(format!("{context}: {e}"))
}

#[async_trait]
impl Plugin for FixturePlugin {
    async fn properties(&self) -> Result<PluginProperties, ApplicationError> {
        let target = std::env::var("FIXTURE_TARGET").unwrap_or_else(|_| "linux-x64".to_owned());
        Ok(PluginProperties { target })
    }

    async fn install(
        &self,
        version: PathSafeString,
        directory: PathBuf,
    ) -> Result<InstallArtifacts, ApplicationError> {
        info!(version = %version, directory = %directory.display(), "install requested");
        match version.as_str() {
            "crash" => std::process::exit(3),
            "hang" => std::future::pending().await,
            "fail" => Err(ApplicationError::new(format!("no such version: {version}"))),
            "escape" => {
                let path = std::env::var("FIXTURE_ESCAPE_PATH")
                    .map_err(|_| ApplicationError::new("FIXTURE_ESCAPE_PATH is not set"))?;
                std::fs::write(&path, "escaped").map_err(|e| io_error(&path, &e))?;
                Ok(std::iter::once(("escaped", PathBuf::from(path))).collect())
            },
            "limits" => {
                let limits = std::fs::read_to_string("/proc/self/limits")
                    .map_err(|e| io_error("read /proc/self/limits", &e))?;
                std::fs::create_dir_all(&directory).map_err(|e| io_error("create directory", &e))?;
                let path = directory.join("limits");
                std::fs::write(&path, limits).map_err(|e| io_error("write limits", &e))?;
                Ok(std::iter::once(("limits", path)).collect())
            },
            _ => {
                let bin = directory.join("bin");
                std::fs::create_dir_all(&bin).map_err(|e| io_error("create bin", &e))?;
                let node = bin.join("node");
                std::fs::write(&node, format!("#!/bin/sh\necho v{version}\n"))
                    .map_err(|e| io_error("write node", &e))?;
                Ok(std::iter::once(("node", node)).collect())
            },
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Stdout carries the rpc frames; logs go to stderr.
    if let Err(e) = setup_logging(&LogConfig::new("debug").without_ansi()) {
        eprintln!("fixture: failed to initialize logging: {e}");
    }
    let failure = guest::serve_stdio(FixturePlugin).await;
    debug!(reason = %failure, "host closed the channel");
}
