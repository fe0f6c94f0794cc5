//! `circlink watch`: hidden entry point of the per-link watcher process.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use circlink_core::LinkId;
use circlink_daemon::start_blocking;

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Link to watch.
    pub id: u64,

    /// Home directory holding `.circlink/`.
    #[arg(long)]
    pub home: PathBuf,
}

impl WatchArgs {
    pub fn run(self) -> Result<()> {
        start_blocking(&self.home, LinkId(self.id))
            .with_context(|| format!("watcher for link #{} exited with error", self.id))
    }
}
