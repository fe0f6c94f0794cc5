//! `circlink config view | edit | reset | path`

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_yaml::Value;

use circlink_core::{paths::settings_path, settings};

use crate::home_dir;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print a setting, or every setting.
    View(ViewArgs),
    /// Change a setting; the value must keep the setting's type.
    Edit(EditArgs),
    /// Restore every setting to its default.
    Reset,
    /// Print the location of the settings file.
    Path,
}

#[derive(Args, Debug)]
pub struct ViewArgs {
    /// Dotted key, e.g. `display.process_id`.
    #[arg(default_value = "all")]
    pub key: String,
}

#[derive(Args, Debug)]
pub struct EditArgs {
    /// Dotted key, e.g. `watcher.poll_interval_ms`.
    pub key: String,
    /// New value.
    pub value: String,
}

pub fn run(command: ConfigCommand) -> Result<()> {
    let home = home_dir()?;
    match command {
        ConfigCommand::View(args) => {
            let current = settings::load_at(&home).context("failed to load settings")?;
            let value = settings::get_value(&current, &args.key)?;
            print_value(&value)?;
        }
        ConfigCommand::Edit(args) => {
            let current = settings::load_at(&home).context("failed to load settings")?;
            let updated = settings::set_value(&current, &args.key, &args.value)?;
            settings::save_at(&home, &updated).context("failed to save settings")?;
            print_value(&settings::get_value(&updated, &args.key)?)?;
        }
        ConfigCommand::Reset => {
            settings::reset_at(&home).context("failed to reset settings")?;
            println!("settings reset to defaults");
        }
        ConfigCommand::Path => println!("{}", settings_path(&home).display()),
    }
    Ok(())
}

fn print_value(value: &Value) -> Result<()> {
    match value {
        Value::Null => println!("null"),
        Value::Bool(b) => println!("{b}"),
        Value::Number(n) => println!("{n}"),
        Value::String(s) => println!("{s}"),
        other => print!(
            "{}",
            serde_yaml::to_string(other).context("failed to render settings")?
        ),
    }
    Ok(())
}
