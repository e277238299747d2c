//! List command - show installed versions.

use std::io;
use std::path::Path;

use anyhow::{Context as _, Result};
use colored::Colorize;
use evm_core::PathSafeString;

use super::Context;
use crate::theme::Theme;

/// Installed versions of one tool in one location.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct InstalledTool {
    pub(crate) ident: String,
    pub(crate) versions: Vec<String>,
}

/// List installed versions, optionally restricted to one location or tool.
pub(crate) fn run_list(
    ctx: &Context,
    location: Option<&PathSafeString>,
    ident: Option<&PathSafeString>,
) -> Result<()> {
    let locations = match location {
        Some(name) => vec![(name.to_string(), ctx.location_dir(name)?)],
        None => ctx.config.all_locations(&ctx.home),
    };

    let mut found = false;
    for (name, dir) in locations {
        let tools = scan_location(&dir, ident)
            .with_context(|| format!("failed to read location '{name}' at {}", dir.display()))?;
        if tools.is_empty() {
            continue;
        }
        found = true;

        println!("\n{} {}", Theme::header(&name), Theme::dimmed(&dir.display().to_string()));
        println!("{}", Theme::separator());
        for tool in tools {
            println!("  {}  {}", tool.ident.bold(), tool.versions.join(", "));
        }
    }

    if found {
        println!();
    } else {
        println!("{}", Theme::info("No versions installed"));
    }
    Ok(())
}

/// Scan `<dir>/<IDENT>/<VERSION>` trees.
///
/// A missing directory has nothing installed. Hidden entries (including
/// in-progress install staging directories) and names that are not
/// path-safe are skipped.
pub(crate) fn scan_location(
    dir: &Path,
    ident: Option<&PathSafeString>,
) -> io::Result<Vec<InstalledTool>> {
    let mut tools = Vec::new();
    for tool in sorted_subdirs(dir)? {
        if ident.is_some_and(|wanted| wanted.as_str() != tool) {
            continue;
        }
        let versions = sorted_subdirs(&dir.join(&tool))?;
        if !versions.is_empty() {
            tools.push(InstalledTool {
                ident: tool,
                versions,
            });
        }
    }
    Ok(tools)
}

fn sorted_subdirs(dir: &Path) -> io::Result<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') || !PathSafeString::is_path_safe(&name) {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn missing_location_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan_location(&dir.path().join("nope"), None).unwrap().is_empty());
    }

    #[test]
    fn scans_tools_and_versions_in_order() {
        let dir = tempfile::tempdir().unwrap();
        for path in ["node/20.11.1", "node/18.19.0", "python/3.12.1", "ruby"] {
            fs::create_dir_all(dir.path().join(path)).unwrap();
        }

        let tools = scan_location(dir.path(), None).unwrap();
        assert_eq!(
            tools,
            vec![
                InstalledTool {
                    ident: "node".to_owned(),
                    versions: vec!["18.19.0".to_owned(), "20.11.1".to_owned()],
                },
                InstalledTool {
                    ident: "python".to_owned(),
                    versions: vec!["3.12.1".to_owned()],
                },
            ]
        );
    }

    #[test]
    fn skips_hidden_files_and_unsafe_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("node/20.11.1")).unwrap();
        fs::create_dir_all(dir.path().join("node/.evm-install-abc")).unwrap();
        fs::create_dir_all(dir.path().join("node/bad$name")).unwrap();
        fs::write(dir.path().join("node/README"), "x").unwrap();

        let tools = scan_location(dir.path(), None).unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].versions, vec!["20.11.1".to_owned()]);
    }

    #[test]
    fn filters_by_ident() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("node/20.11.1")).unwrap();
        fs::create_dir_all(dir.path().join("python/3.12.1")).unwrap();

        let wanted = PathSafeString::new("python").unwrap();
        let tools = scan_location(dir.path(), Some(&wanted)).unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].ident, "python");
    }
}
