//! evm - environment version manager.
//!
//! Installs and switches between versions of tools and runtimes. Installers
//! are third-party plugins that run as sandboxed worker processes; `evm`
//! only talks to them over the `evm-rpc` protocol.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use evm_core::PathSafeString;
use evm_plugins::NetworkGrant;

mod commands;
mod config_bridge;
mod theme;

use commands::{Context, install, list, location, plugin, use_version};
use theme::Theme;

/// evm - environment version manager
#[derive(Parser)]
#[command(name = "evm")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the configuration file (default: $EVM_HOME/config.toml)
    #[arg(long, global = true, env = "EVM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List installed versions
    List {
        /// Location to list (default: every location)
        #[arg(short, long)]
        location: Option<PathSafeString>,

        /// Only list versions of this tool
        ident: Option<PathSafeString>,
    },

    /// Manage installer plugins
    Plugin {
        #[command(subcommand)]
        command: PluginCommands,
    },

    /// Install a version using the tool's plugin
    Install {
        /// Location to install into
        #[arg(short, long, default_value = "default")]
        location: PathSafeString,

        /// Replace an existing install of the same version
        #[arg(short, long)]
        force: bool,

        /// Tool identifier (the plugin name)
        ident: PathSafeString,

        /// Version to install
        version: PathSafeString,
    },

    /// Print the directory of an installed version
    Use {
        /// Location the version is installed in
        #[arg(short, long, default_value = "default")]
        location: PathSafeString,

        /// Tool identifier
        ident: PathSafeString,

        /// Installed version
        version: PathSafeString,
    },

    /// Manage install locations
    Location {
        #[command(subcommand)]
        command: LocationCommands,
    },
}

#[derive(Subcommand)]
enum PluginCommands {
    /// Register a plugin after checking that it answers
    Install {
        /// Name to register the plugin under (default: the locator's file stem)
        #[arg(short, long)]
        name: Option<PathSafeString>,

        /// Allow network access to HOST or HOST:PORT
        #[arg(long = "allow-net", value_name = "HOST[:PORT]")]
        allow_net: Vec<NetworkGrant>,

        /// Allow reading PATH
        #[arg(long = "allow-read", value_name = "PATH")]
        allow_read: Vec<PathBuf>,

        /// Allow reading and writing PATH
        #[arg(long = "allow-write", value_name = "PATH")]
        allow_write: Vec<PathBuf>,

        /// Allow executing PATH
        #[arg(long = "allow-run", value_name = "PATH")]
        allow_run: Vec<PathBuf>,

        /// Path or URL of the plugin executable
        locator: String,
    },
    /// Remove a registered plugin
    Uninstall {
        /// Plugin name
        ident: PathSafeString,
    },
    /// List registered plugins
    List,
}

#[derive(Subcommand)]
enum LocationCommands {
    /// Register a named install location
    Add {
        /// Location name
        name: PathSafeString,
        /// Directory to install into
        path: PathBuf,
    },
    /// Remove a named install location (installed files are kept)
    Remove {
        /// Location name
        name: PathSafeString,
    },
    /// List install locations
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let ctx = match Context::load(cli.config.clone()) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("{}", Theme::error(&format!("{e:#}")));
            return ExitCode::FAILURE;
        },
    };

    let log_config = config_bridge::to_log_config(&ctx.config, &ctx.home, cli.verbose);
    if let Err(e) = evm_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }

    match run(cli.command, ctx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", Theme::error(&format!("{e:#}")));
            ExitCode::FAILURE
        },
    }
}

async fn run(command: Commands, mut ctx: Context) -> Result<()> {
    match command {
        Commands::List { location, ident } => {
            list::run_list(&ctx, location.as_ref(), ident.as_ref())?;
        },
        Commands::Plugin { command } => handle_plugin(command, &mut ctx).await?,
        Commands::Install {
            location,
            force,
            ident,
            version,
        } => {
            install::run_install(&ctx, &location, &ident, &version, force).await?;
        },
        Commands::Use {
            location,
            ident,
            version,
        } => {
            use_version::run_use(&ctx, &location, &ident, &version)?;
        },
        Commands::Location { command } => match command {
            LocationCommands::Add { name, path } => location::add_location(&mut ctx, &name, &path)?,
            LocationCommands::Remove { name } => location::remove_location(&mut ctx, &name)?,
            LocationCommands::List => location::list_locations(&ctx),
        },
    }
    Ok(())
}

async fn handle_plugin(command: PluginCommands, ctx: &mut Context) -> Result<()> {
    match command {
        PluginCommands::Install {
            name,
            allow_net,
            allow_read,
            allow_write,
            allow_run,
            locator,
        } => {
            let grants = plugin::Grants {
                network: allow_net,
                read: allow_read,
                write: allow_write,
                execute: allow_run,
            };
            plugin::install_plugin(ctx, &locator, name, grants).await?;
        },
        PluginCommands::Uninstall { ident } => plugin::uninstall_plugin(ctx, &ident)?,
        PluginCommands::List => plugin::list_plugins(ctx),
    }
    Ok(())
}
