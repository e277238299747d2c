//! Install command - install a version through the tool's plugin.
//!
//! The plugin writes into a hidden staging directory next to the final
//! version directory and only gets read-write access to that directory. The
//! staging directory is renamed into place once the plugin reports success,
//! so a failed or interrupted install never leaves a partial version behind.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use evm_core::PathSafeString;
use evm_plugins::{InstallArtifacts, PluginDescriptor, PluginHost, PluginResult};
use tracing::{info, warn};

use super::{Context, version_dir};
use crate::config_bridge;
use crate::theme::Theme;

/// Prefix of in-progress install directories.
const STAGING_PREFIX: &str = ".evm-install-";

/// Install `ident` `version` into `location`.
pub(crate) async fn run_install(
    ctx: &Context,
    location: &PathSafeString,
    ident: &PathSafeString,
    version: &PathSafeString,
    force: bool,
) -> Result<()> {
    let section = ctx.plugin(ident)?;
    let location_dir = ctx.location_dir(location)?;
    let target = version_dir(&location_dir, ident, version);
    if target.exists() && !force {
        bail!(
            "{ident} {version} is already installed at {}; pass --force to reinstall",
            target.display()
        );
    }

    let ident_dir = location_dir.join(ident.as_str());
    fs::create_dir_all(&ident_dir)
        .with_context(|| format!("failed to create {}", ident_dir.display()))?;
    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(&ident_dir)
        .with_context(|| format!("failed to create a staging directory in {}", ident_dir.display()))?;
    let staging_dir = std::path::absolute(staging.path())?;

    let caps = config_bridge::to_capabilities(section)?.with_read_write(&staging_dir);
    let descriptor = config_bridge::to_descriptor(section, caps)?;

    println!(
        "{}",
        Theme::info(&format!("Installing {ident} {version} into {}", target.display()))
    );
    let mut host = PluginHost::new(config_bridge::to_host_config(&ctx.config));
    let artifacts = run_plugin(&mut host, descriptor, version, &staging_dir).await;
    host.shutdown().await;
    let artifacts =
        artifacts.with_context(|| format!("plugin '{ident}' failed to install {version}"))?;

    if target.exists() {
        fs::remove_dir_all(&target)
            .with_context(|| format!("failed to remove the previous install at {}", target.display()))?;
    }
    fs::rename(&staging_dir, &target)
        .with_context(|| format!("failed to move the install into {}", target.display()))?;
    info!(ident = %ident, version = %version, target = %target.display(), "Installed version");

    let artifacts = relocate(&artifacts, &staging_dir, &target);
    println!("{}", Theme::success(&format!("Installed {ident} {version}")));
    for (name, path) in artifacts.iter() {
        println!("  {}  {}", name.bold(), Theme::dimmed(&path.display().to_string()));
    }
    Ok(())
}

async fn run_plugin(
    host: &mut PluginHost,
    descriptor: PluginDescriptor,
    version: &PathSafeString,
    directory: &Path,
) -> PluginResult<InstallArtifacts> {
    let client = host.spawn(descriptor)?;
    client.install(version, directory).await
}

/// Rewrite artifact paths reported inside the staging directory onto the
/// final version directory.
fn relocate(artifacts: &InstallArtifacts, staging: &Path, target: &Path) -> InstallArtifacts {
    artifacts
        .iter()
        .map(|(name, path)| {
            let path: PathBuf = match path.strip_prefix(staging) {
                Ok(rel) => target.join(rel),
                Err(_) => {
                    warn!(artifact = %name, path = %path.display(), "Plugin reported an artifact outside the install directory");
                    path.to_path_buf()
                },
            };
            (name.to_owned(), path)
        })
        .collect()
}
