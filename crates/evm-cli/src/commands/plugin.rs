//! Plugin command - register, remove, and list installer plugins.

use std::path::PathBuf;

use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use evm_core::PathSafeString;
use evm_plugins::{
    CapabilitySet, NetworkGrant, PluginDescriptor, PluginHost, PluginLocator, PluginProperties,
    PluginResult,
};

use super::Context;
use crate::config_bridge;
use crate::theme::Theme;

/// Capabilities granted on the command line.
#[derive(Debug, Default)]
pub(crate) struct Grants {
    pub(crate) network: Vec<NetworkGrant>,
    pub(crate) read: Vec<PathBuf>,
    pub(crate) write: Vec<PathBuf>,
    pub(crate) execute: Vec<PathBuf>,
}

impl Grants {
    /// Build the capability set, resolving relative paths against the
    /// current directory.
    fn into_capabilities(self) -> Result<CapabilitySet> {
        let mut caps = CapabilitySet::none();
        for grant in self.network {
            caps = caps.with_network(grant);
        }
        for path in self.read {
            caps = caps.with_read(absolute(path)?);
        }
        for path in self.write {
            caps = caps.with_read_write(absolute(path)?);
        }
        for path in self.execute {
            caps = caps.with_execute(absolute(path)?);
        }
        Ok(caps)
    }
}

fn absolute(path: PathBuf) -> Result<PathBuf> {
    std::path::absolute(&path).with_context(|| format!("cannot resolve {}", path.display()))
}

/// Resolve a relative locator path so the registration does not depend on
/// the directory `evm` was run from.
fn absolute_locator(locator: &str) -> Result<PluginLocator> {
    match PluginLocator::parse(locator)? {
        PluginLocator::Path(path) => Ok(PluginLocator::Path(absolute(path)?)),
        url => Ok(url),
    }
}

/// Name a plugin is registered under when `--name` is not given.
fn default_name(locator: &PluginLocator) -> Result<PathSafeString> {
    let Some(stem) = locator.file_stem() else {
        bail!("cannot derive a plugin name from '{locator}'; pass --name");
    };
    PathSafeString::new(stem.as_str())
        .with_context(|| format!("'{stem}' is not a valid plugin name; pass --name"))
}

/// Spawn the plugin, check that it answers `properties`, and register it.
pub(crate) async fn install_plugin(
    ctx: &mut Context,
    locator: &str,
    name: Option<PathSafeString>,
    grants: Grants,
) -> Result<()> {
    let locator = absolute_locator(locator)?;
    let name = match name {
        Some(name) => name,
        None => default_name(&locator)?,
    };
    if ctx.config.plugins.contains_key(name.as_str()) {
        bail!("a plugin named '{name}' is already registered; run `evm plugin uninstall {name}` first");
    }

    let caps = grants.into_capabilities()?;
    let section = config_bridge::to_plugin_section(&locator, &caps);
    let descriptor = PluginDescriptor::new(locator.clone(), caps);

    let mut host = PluginHost::new(config_bridge::to_host_config(&ctx.config));
    let properties = query_properties(&mut host, descriptor).await;
    host.shutdown().await;
    let properties = properties.with_context(|| format!("plugin at '{locator}' did not answer"))?;

    ctx.config.plugins.insert(name.to_string(), section);
    ctx.save()?;

    println!(
        "{}",
        Theme::success(&format!("Registered plugin '{name}' (target {})", properties.target))
    );
    Ok(())
}

async fn query_properties(host: &mut PluginHost, descriptor: PluginDescriptor) -> PluginResult<PluginProperties> {
    let client = host.spawn(descriptor)?;
    client.properties().await
}

/// Remove a registered plugin. Installed versions are kept.
pub(crate) fn uninstall_plugin(ctx: &mut Context, ident: &PathSafeString) -> Result<()> {
    if ctx.config.plugins.remove(ident.as_str()).is_none() {
        bail!("no plugin registered for '{ident}'");
    }
    ctx.save()?;
    println!("{}", Theme::success(&format!("Removed plugin '{ident}'")));
    Ok(())
}

/// List registered plugins and their grants.
pub(crate) fn list_plugins(ctx: &Context) {
    if ctx.config.plugins.is_empty() {
        println!("{}", Theme::info("No plugins registered"));
        return;
    }

    println!("\n{}", Theme::header("Plugins"));
    println!("{}", Theme::separator());
    for (name, section) in &ctx.config.plugins {
        println!("  {}  {}", name.bold(), Theme::dimmed(&section.locator));
        let lists = [
            ("network", section.network.clone()),
            ("read", display_paths(&section.read)),
            ("write", display_paths(&section.write)),
            ("execute", display_paths(&section.execute)),
        ];
        for (key, values) in lists {
            if !values.is_empty() {
                println!("    {}", Theme::kv(key, &values.join(", ")));
            }
        }
    }
    println!();
}

fn display_paths(paths: &[PathBuf]) -> Vec<String> {
    paths.iter().map(|p| p.display().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use evm_config::{Config, PluginSection};
    use evm_core::EvmHome;

    use super::*;

    fn ctx_in(dir: &Path) -> Context {
        Context {
            config: Config::default(),
            config_path: dir.join("config.toml"),
            home: EvmHome::from_path(dir),
        }
    }

    #[test]
    fn default_name_is_file_stem() {
        let locator = PluginLocator::parse("/opt/evm/plugins/node-installer.exe").unwrap();
        assert_eq!(default_name(&locator).unwrap().as_str(), "node-installer");
    }

    #[test]
    fn relative_locators_become_absolute() {
        let locator = absolute_locator("plugins/node").unwrap();
        match locator {
            PluginLocator::Path(path) => assert!(path.is_absolute()),
            PluginLocator::Url(url) => panic!("expected a path, got {url}"),
        }
    }

    #[test]
    fn grants_resolve_relative_paths() {
        let grants = Grants {
            network: vec![NetworkGrant::host_port("nodejs.org", 443)],
            read: vec![PathBuf::from("cache")],
            ..Grants::default()
        };
        let caps = grants.into_capabilities().unwrap();
        assert_eq!(caps.network.len(), 1);
        assert!(caps.filesystem[0].path.is_absolute());
        assert!(caps.validate().is_ok());
    }

    #[test]
    fn uninstall_removes_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ctx_in(dir.path());
        ctx.config
            .plugins
            .insert("node".to_owned(), PluginSection::new("/opt/node"));

        let ident = PathSafeString::new("node").unwrap();
        uninstall_plugin(&mut ctx, &ident).unwrap();
        assert!(ctx.config.plugins.is_empty());
        assert!(Config::load(&ctx.config_path).unwrap().plugins.is_empty());

        assert!(uninstall_plugin(&mut ctx, &ident).is_err());
    }

    #[tokio::test]
    async fn install_refuses_duplicate_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ctx_in(dir.path());
        ctx.config
            .plugins
            .insert("node".to_owned(), PluginSection::new("/opt/node"));

        let err = install_plugin(&mut ctx, "/opt/other/node", None, Grants::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[tokio::test]
    async fn install_of_missing_plugin_does_not_register() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ctx_in(dir.path());
        let missing = dir.path().join("missing-plugin");

        let result = install_plugin(
            &mut ctx,
            &missing.display().to_string(),
            None,
            Grants::default(),
        )
        .await;
        assert!(result.is_err());
        assert!(ctx.config.plugins.is_empty());
        assert!(!ctx.config_path.exists());
    }
}
