//! circlink: mirror local files onto a CircuitPython board as they change.
//!
//! # Usage
//!
//! ```text
//! circlink start <read_path> <write_path> [--path] [--name N] [--wipe-dest] [--skip-presave] [--recursive]
//! circlink stop <id|last|all> [--clear]
//! circlink list [id|last|all] [--abs-paths] [--json]      (alias: view)
//! circlink restart <id|last|all>
//! circlink clear <id|last|all> [--force]
//! circlink detect [--json]
//! circlink logs <id|last> [--lines N]
//! circlink config view|edit|reset|path
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use circlink_core::{settings, LinkToken, Registry};
use circlink_daemon::{Controller, SystemProcesses};
use commands::{
    config::ConfigCommand,
    detect::DetectArgs,
    link::{ClearArgs, ListArgs, RestartArgs, StartArgs, StopArgs},
    logs::LogsArgs,
    watch::WatchArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "circlink",
    version,
    about = "Autosave local files to your CircuitPython board",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a link and begin mirroring.
    Start(StartArgs),

    /// Stop one or more links.
    Stop(StopArgs),

    /// List links and their status.
    #[command(visible_alias = "view")]
    List(ListArgs),

    /// Replace stopped links with fresh ones using the same configuration.
    Restart(RestartArgs),

    /// Remove stopped links from the registry.
    Clear(ClearArgs),

    /// Look for a connected CircuitPython board.
    Detect(DetectArgs),

    /// Print the tail of a link's log.
    Logs(LogsArgs),

    /// View or edit settings.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Run the watcher for a link in the foreground (used internally by `start`).
    #[command(hide = true)]
    Watch(WatchArgs),
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

pub(crate) fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Controller over the real process table, configured from `settings.yaml`.
pub(crate) fn controller() -> Result<Controller<SystemProcesses>> {
    let home = home_dir()?;
    let settings = settings::load_at(&home).context("failed to load settings")?;
    let processes = SystemProcesses::current_exe().context("cannot locate circlink executable")?;
    Ok(Controller::new(Registry::at(&home), settings, processes))
}

pub(crate) fn parse_token(raw: &str) -> std::result::Result<LinkToken, String> {
    raw.parse::<LinkToken>().map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Start(args) => args.run(),
        Commands::Stop(args) => args.run(),
        Commands::List(args) => args.run(),
        Commands::Restart(args) => args.run(),
        Commands::Clear(args) => args.run(),
        Commands::Detect(args) => args.run(),
        Commands::Logs(args) => args.run(),
        Commands::Config { command } => commands::config::run(command),
        Commands::Watch(args) => args.run(),
    }
}
