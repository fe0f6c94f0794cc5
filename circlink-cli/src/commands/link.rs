//! `circlink start | stop | list | restart | clear`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{builder::Builder, settings::Style, Table};

use circlink_core::{settings::TableStyle, Destination, EffectiveStatus, LinkToken};
use circlink_daemon::{LinkView, StartRequest, StopOutcome};

use crate::{controller, parse_token};

// ---------------------------------------------------------------------------
// start
// ---------------------------------------------------------------------------

#[derive(Args, Debug)]
pub struct StartArgs {
    /// File or glob to mirror, relative to the current directory.
    pub read_path: PathBuf,

    /// Destination directory, relative to the board root (or to the current
    /// directory with --path).
    pub write_path: PathBuf,

    /// Treat the write path as a local path instead of a board path.
    #[arg(long = "path")]
    pub use_cwd_path: bool,

    /// Optional label shown by `list`.
    #[arg(long)]
    pub name: Option<String>,

    /// Delete everything in the destination before the first sync.
    #[arg(long)]
    pub wipe_dest: bool,

    /// Do not copy existing files at start; only mirror later changes.
    #[arg(long)]
    pub skip_presave: bool,

    /// Also match files in subdirectories (glob patterns only).
    #[arg(long, short = 'r')]
    pub recursive: bool,
}

impl StartArgs {
    pub fn run(self) -> Result<()> {
        let cwd = std::env::current_dir().context("cannot read current directory")?;
        let request = StartRequest {
            name: self.name,
            pattern: self.read_path,
            write_path: self.write_path,
            use_cwd_path: self.use_cwd_path,
            recursive: self.recursive,
            wipe_dest: self.wipe_dest,
            skip_presave: self.skip_presave,
            cwd,
        };
        let link = controller()?.start(&request)?;
        println!("{} link #{}", "Started".green().bold(), link.id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// stop
// ---------------------------------------------------------------------------

#[derive(Args, Debug)]
pub struct StopArgs {
    /// Link id, `last`, or `all`.
    #[arg(value_parser = parse_token)]
    pub link: LinkToken,

    /// Clear each link from the registry once stopped.
    #[arg(long)]
    pub clear: bool,
}

impl StopArgs {
    pub fn run(self) -> Result<()> {
        let controller = controller()?;
        let outcomes = controller.stop(self.link)?;
        for outcome in &outcomes {
            match outcome {
                StopOutcome::Stopped(id) => println!("{} link #{id}", "Stopped".green().bold()),
                StopOutcome::Corrected(id) => {
                    println!("Link #{id} had no running watcher; marked stopped")
                }
                StopOutcome::AlreadyStopped(id) => println!("Link #{id} is already stopped"),
            }
        }
        if self.clear {
            let ids: Vec<_> = outcomes.iter().map(StopOutcome::id).collect();
            controller.clear_ids(&ids, false)?;
            for id in ids {
                println!("Cleared link #{id}");
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Link id, `last`, or `all`.
    #[arg(value_parser = parse_token, default_value = "all")]
    pub link: LinkToken,

    /// Show absolute paths instead of paths relative to the current directory.
    #[arg(long)]
    pub abs_paths: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl ListArgs {
    pub fn run(self) -> Result<()> {
        let controller = controller()?;
        let views = controller.list(self.link)?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&views).context("failed to render links as JSON")?
            );
            return Ok(());
        }
        if views.is_empty() {
            println!("No links found.");
            return Ok(());
        }

        let cwd = std::env::current_dir().context("cannot read current directory")?;
        let display = &controller.settings().display;
        let relative_to = if self.abs_paths { None } else { Some(cwd.as_path()) };
        let table = build_table(&views, display.process_id, relative_to);
        println!("{}", styled(table, display.table_style));

        for view in views.iter().filter(|v| v.link.last_error.is_some()) {
            if let Some(err) = &view.link.last_error {
                println!("{} link #{}: {err}", "last error".red(), view.link.id);
            }
        }
        Ok(())
    }
}

fn build_table(views: &[LinkView], show_pid: bool, relative_to: Option<&Path>) -> Table {
    let mut header = vec!["ID", "Name", "Status"];
    if show_pid {
        header.push("PID");
    }
    header.extend(["Read Path", "Write Path", "Recursive", "Created"]);

    let mut builder = Builder::default();
    builder.push_record(header.into_iter().map(str::to_string));
    for view in views {
        let link = &view.link;
        let mut row = vec![
            link.id.to_string(),
            link.name.clone().unwrap_or_default(),
            status_label(view.status),
        ];
        if show_pid {
            row.push(
                link.process_handle
                    .filter(|_| view.status.is_live())
                    .map(|pid| pid.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            );
        }
        row.push(shown_path(&link.source.pattern, relative_to));
        row.push(match &link.dest {
            Destination::Explicit { path } => shown_path(path, relative_to),
            device => device.to_string(),
        });
        row.push(if link.source.recursive { "yes" } else { "no" }.to_string());
        row.push(
            link.created_at
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        );
        builder.push_record(row);
    }
    builder.build()
}

fn styled(mut table: Table, style: TableStyle) -> Table {
    match style {
        TableStyle::Rounded => table.with(Style::rounded()),
        TableStyle::Ascii => table.with(Style::ascii()),
        TableStyle::Markdown => table.with(Style::markdown()),
        TableStyle::Blank => table.with(Style::blank()),
    };
    table
}

fn status_label(status: EffectiveStatus) -> String {
    let label = status.to_string();
    match status {
        EffectiveStatus::Running => label.green().to_string(),
        EffectiveStatus::Starting => label.cyan().to_string(),
        EffectiveStatus::Stopped => label.bright_black().to_string(),
        EffectiveStatus::Stale => label.yellow().to_string(),
    }
}

fn shown_path(path: &Path, relative_to: Option<&Path>) -> String {
    relative_to
        .and_then(|base| path.strip_prefix(base).ok())
        .filter(|rel| !rel.as_os_str().is_empty())
        .unwrap_or(path)
        .display()
        .to_string()
}

// ---------------------------------------------------------------------------
// restart / clear
// ---------------------------------------------------------------------------

#[derive(Args, Debug)]
pub struct RestartArgs {
    /// Link id, `last`, or `all`.
    #[arg(value_parser = parse_token)]
    pub link: LinkToken,
}

impl RestartArgs {
    pub fn run(self) -> Result<()> {
        for outcome in controller()?.restart(self.link)? {
            println!(
                "{} link #{} as #{}",
                "Restarted".green().bold(),
                outcome.old,
                outcome.new.id
            );
        }
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct ClearArgs {
    /// Link id, `last`, or `all`.
    #[arg(value_parser = parse_token)]
    pub link: LinkToken,

    /// Remove entries even if a watcher may still be running (unsafe).
    #[arg(long)]
    pub force: bool,
}

impl ClearArgs {
    pub fn run(self) -> Result<()> {
        for id in controller()?.clear(self.link, self.force)? {
            println!("Cleared link #{id}");
        }
        Ok(())
    }
}
