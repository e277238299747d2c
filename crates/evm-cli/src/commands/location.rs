//! Location command - manage named install locations.

use std::path::Path;

use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use evm_config::LocationSection;
use evm_core::PathSafeString;

use super::Context;
use crate::theme::Theme;

/// Register `name` at `path`. Relative paths are resolved against the
/// current directory.
pub(crate) fn add_location(ctx: &mut Context, name: &PathSafeString, path: &Path) -> Result<()> {
    if ctx.config.locations.contains_key(name.as_str()) {
        bail!("location '{name}' already exists; remove it first");
    }
    let path = std::path::absolute(path)
        .with_context(|| format!("cannot resolve {}", path.display()))?;
    ctx.config
        .locations
        .insert(name.to_string(), LocationSection { path: path.clone() });
    ctx.save()?;

    println!(
        "{}",
        Theme::success(&format!("Added location '{name}' at {}", path.display()))
    );
    Ok(())
}

/// Unregister `name`. Versions installed there are left on disk.
pub(crate) fn remove_location(ctx: &mut Context, name: &PathSafeString) -> Result<()> {
    let Some(removed) = ctx.config.locations.remove(name.as_str()) else {
        bail!("no location named '{name}'");
    };
    ctx.save()?;

    println!("{}", Theme::success(&format!("Removed location '{name}'")));
    println!(
        "{}",
        Theme::warning(&format!(
            "Installed versions under {} were not deleted",
            removed.path.display()
        ))
    );
    Ok(())
}

/// List every location, including the implied `default`.
pub(crate) fn list_locations(ctx: &Context) {
    println!("\n{}", Theme::header("Locations"));
    println!("{}", Theme::separator());
    for (name, path) in ctx.config.all_locations(&ctx.home) {
        println!("  {}  {}", name.bold(), Theme::dimmed(&path.display().to_string()));
    }
    println!();
}
