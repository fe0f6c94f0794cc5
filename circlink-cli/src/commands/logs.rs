//! `circlink logs`

use anyhow::{Context, Result};
use clap::Args;

use circlink_core::{paths::link_log_path, LinkToken, Registry};
use circlink_daemon::log_rotation::tail;

use crate::{home_dir, parse_token};

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Link id, `last`, or `all`.
    #[arg(value_parser = parse_token)]
    pub link: LinkToken,

    /// Number of trailing lines to show.
    #[arg(long, default_value_t = 50)]
    pub lines: usize,
}

impl LogsArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let ids = Registry::at(&home).resolve_alias(self.link)?;
        for id in ids {
            let path = link_log_path(&home, id);
            if !path.exists() {
                println!("no log for link #{id}");
                continue;
            }
            let lines =
                tail(&path, self.lines).with_context(|| format!("read {}", path.display()))?;
            println!("==> {} <==", path.display());
            for line in lines {
                println!("{line}");
            }
        }
        Ok(())
    }
}
