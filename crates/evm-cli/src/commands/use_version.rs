//! Use command - resolve an installed version.

use std::path::PathBuf;

use anyhow::{Result, bail};
use evm_core::PathSafeString;

use super::{Context, version_dir};

/// Directory of an installed version.
pub(crate) fn resolve(
    ctx: &Context,
    location: &PathSafeString,
    ident: &PathSafeString,
    version: &PathSafeString,
) -> Result<PathBuf> {
    let dir = version_dir(&ctx.location_dir(location)?, ident, version);
    if !dir.is_dir() {
        bail!("{ident} {version} is not installed in location '{location}'; run `evm install {ident} {version}`");
    }
    Ok(dir)
}

/// Print the directory of an installed version on stdout, for use in shell
/// snippets such as `export PATH="$(evm use node 20.11.1)/bin:$PATH"`.
pub(crate) fn run_use(
    ctx: &Context,
    location: &PathSafeString,
    ident: &PathSafeString,
    version: &PathSafeString,
) -> Result<()> {
    let dir = resolve(ctx, location, ident, version)?;
    println!("{}", dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use evm_config::Config;
    use evm_core::EvmHome;

    use super::*;

    fn safe(s: &str) -> PathSafeString {
        PathSafeString::new(s).unwrap()
    }

    #[test]
    fn resolves_installed_version() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context {
            config: Config::default(),
            config_path: dir.path().join("config.toml"),
            home: EvmHome::from_path(dir.path()),
        };
        fs::create_dir_all(dir.path().join("versions/node/20.11.1")).unwrap();

        let resolved = resolve(&ctx, &safe("default"), &safe("node"), &safe("20.11.1")).unwrap();
        assert_eq!(resolved, dir.path().join("versions/node/20.11.1"));

        let err = resolve(&ctx, &safe("default"), &safe("node"), &safe("18.0.0")).unwrap_err();
        assert!(err.to_string().contains("not installed"));
    }
}
