//! User settings persisted at `<home>/.circlink/settings.yaml`.
//!
//! Every field has a default, so a missing file (or a partial one) is valid.
//! `config view` / `config edit` address fields with dotted keys such as
//! `watcher.poll_interval_ms`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::{io_err, RegistryError};
use crate::paths::settings_path;

/// Table look used by `circlink list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TableStyle {
    #[default]
    Rounded,
    Ascii,
    Markdown,
    Blank,
}

/// What `start` does when the pattern matches nothing yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmptyPatternPolicy {
    /// Start anyway and mirror files as they appear.
    #[default]
    Watch,
    /// Abort the start with a startup error.
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    pub process_id: bool,
    pub table_style: TableStyle,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            process_id: true,
            table_style: TableStyle::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherSettings {
    pub poll_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub startup_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub empty_pattern: EmptyPatternPolicy,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            heartbeat_interval_ms: 1000,
            startup_timeout_ms: 5000,
            shutdown_timeout_ms: 5000,
            empty_pattern: EmptyPatternPolicy::default(),
        }
    }
}

impl WatcherSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(10))
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DeviceSettings {
    /// Skip auto-detection and use this directory as the device root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_override: Option<PathBuf>,
    /// Extra directories searched for a mounted device.
    pub mount_roots: Vec<PathBuf>,
}

/// Root of `settings.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub display: DisplaySettings,
    pub watcher: WatcherSettings,
    pub device: DeviceSettings,
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load settings, returning defaults when the file does not exist.
pub fn load_at(home: &Path) -> Result<Settings, RegistryError> {
    let path = settings_path(home);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Settings::default()),
        Err(err) => return Err(io_err(path, err)),
    };
    if contents.trim().is_empty() {
        return Ok(Settings::default());
    }
    serde_yaml::from_str(&contents).map_err(|source| RegistryError::Parse { path, source })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Settings, RegistryError> {
    load_at(&crate::paths::home()?)
}

/// Atomically save settings (`.tmp` sibling + rename).
pub fn save_at(home: &Path, settings: &Settings) -> Result<(), RegistryError> {
    let path = settings_path(home);
    crate::paths::ensure_circlink_root(home)?;
    let tmp = path.with_extension("yaml.tmp");
    let yaml = serde_yaml::to_string(settings)?;
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// Overwrite the settings file with defaults.
pub fn reset_at(home: &Path) -> Result<Settings, RegistryError> {
    let defaults = Settings::default();
    save_at(home, &defaults)?;
    Ok(defaults)
}

// ---------------------------------------------------------------------------
// Dotted-key access
// ---------------------------------------------------------------------------

/// Look up a dotted key (`display.process_id`). `"all"` returns the whole tree.
pub fn get_value(settings: &Settings, key: &str) -> Result<Value, RegistryError> {
    let root = serde_yaml::to_value(settings)?;
    if key == "all" {
        return Ok(root);
    }
    let mut node = &root;
    for part in key.split('.') {
        node = node.get(part).ok_or_else(|| RegistryError::Setting {
            key: key.to_string(),
            reason: "no such setting".to_string(),
        })?;
    }
    Ok(node.clone())
}

/// Set a dotted key from its string form, keeping the existing value's type.
///
/// Tables cannot be assigned directly; `null` leaves (optional paths) accept
/// any string, and `"null"` clears them.
pub fn set_value(settings: &Settings, key: &str, raw: &str) -> Result<Settings, RegistryError> {
    let setting_err = |reason: &str| RegistryError::Setting {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    let mut root = serde_yaml::to_value(settings)?;
    // Optional fields skipped during serialization still count as settings.
    if let Some(device) = root.get_mut("device").and_then(Value::as_mapping_mut) {
        device
            .entry(Value::from("root_override"))
            .or_insert(Value::Null);
    }

    let mut node = &mut root;
    for part in key.split('.') {
        node = node
            .get_mut(part)
            .ok_or_else(|| setting_err("no such setting"))?;
    }

    let new_value = match node {
        Value::Mapping(_) => return Err(setting_err("cannot assign a table; edit one of its keys")),
        Value::Bool(_) => match raw.to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => return Err(setting_err("expected true or false")),
        },
        Value::Number(_) => raw
            .parse::<u64>()
            .map(Value::from)
            .map_err(|_| setting_err("expected a non-negative integer"))?,
        Value::Sequence(_) => Value::Sequence(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(Value::from)
                .collect(),
        ),
        Value::Null if raw == "null" => Value::Null,
        _ => Value::String(raw.to_string()),
    };
    *node = new_value;

    serde_yaml::from_value(root).map_err(|e| setting_err(&e.to_string()))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let home = TempDir::new().unwrap();
        let settings = load_at(home.path()).expect("load");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.watcher.poll_interval_ms, 100);
        assert!(settings.display.process_id);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let home = TempDir::new().unwrap();
        let path = settings_path(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "watcher:\n  empty_pattern: fail\n").unwrap();

        let settings = load_at(home.path()).expect("load");
        assert_eq!(settings.watcher.empty_pattern, EmptyPatternPolicy::Fail);
        assert_eq!(settings.watcher.startup_timeout_ms, 5000);
        assert_eq!(settings.display, DisplaySettings::default());
    }

    #[test]
    fn save_then_load_roundtrip() {
        let home = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.display.table_style = TableStyle::Markdown;
        settings.device.root_override = Some(PathBuf::from("/mnt/CIRCUITPY"));
        save_at(home.path(), &settings).expect("save");
        assert_eq!(load_at(home.path()).expect("load"), settings);
    }

    #[test]
    fn get_value_walks_dotted_keys() {
        let settings = Settings::default();
        let value = get_value(&settings, "watcher.poll_interval_ms").expect("get");
        assert_eq!(value, Value::from(100u64));
        assert!(get_value(&settings, "watcher.nope").is_err());
    }

    #[test]
    fn set_value_keeps_types() {
        let settings = Settings::default();
        let updated = set_value(&settings, "display.process_id", "False").expect("bool");
        assert!(!updated.display.process_id);

        let updated = set_value(&updated, "watcher.poll_interval_ms", "250").expect("number");
        assert_eq!(updated.watcher.poll_interval_ms, 250);

        let updated = set_value(&updated, "display.table_style", "ascii").expect("enum");
        assert_eq!(updated.display.table_style, TableStyle::Ascii);

        let updated = set_value(&updated, "device.root_override", "/Volumes/CIRCUITPY")
            .expect("optional path");
        assert_eq!(
            updated.device.root_override,
            Some(PathBuf::from("/Volumes/CIRCUITPY"))
        );
    }

    #[test]
    fn set_value_rejects_bad_input() {
        let settings = Settings::default();
        assert!(set_value(&settings, "display", "x").is_err());
        assert!(set_value(&settings, "display.process_id", "maybe").is_err());
        assert!(set_value(&settings, "watcher.poll_interval_ms", "-1").is_err());
        assert!(set_value(&settings, "display.table_style", "fancy").is_err());
        assert!(set_value(&settings, "does.not.exist", "1").is_err());
    }
}
