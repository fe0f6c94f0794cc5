//! `circlink detect`

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use circlink_core::settings;
use circlink_detector::{default_mount_roots, detect_device_at, inspect, DetectError, DetectedDevice};

use crate::home_dir;

#[derive(Args, Debug)]
pub struct DetectArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl DetectArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let device = settings::load_at(&home)
            .context("failed to load settings")?
            .device;

        let found = match device.root_override {
            Some(root) if root.is_dir() => Some(inspect(&root)?.unwrap_or(DetectedDevice {
                root,
                version: None,
                board_id: None,
            })),
            Some(_) => None,
            None => {
                let mut roots = device.mount_roots;
                roots.extend(default_mount_roots());
                match detect_device_at(&roots) {
                    Ok(found) => Some(found),
                    Err(DetectError::DeviceNotFound { .. }) => None,
                    Err(err) => return Err(err).context("device detection failed"),
                }
            }
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&found).context("failed to render device as JSON")?
            );
            return Ok(());
        }

        match found {
            Some(found) => {
                println!(
                    "{} {}",
                    "CircuitPython device detected:".green().bold(),
                    found.root.display()
                );
                if let Some(version) = found.version {
                    println!("  version:  {version}");
                }
                if let Some(board) = found.board_id {
                    println!("  board id: {board}");
                }
            }
            None => println!("No CircuitPython device detected"),
        }
        Ok(())
    }
}
