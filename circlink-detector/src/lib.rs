//! Device detection for `circlink-detector`.
//!
//! A CircuitPython board shows up as a mass-storage volume whose root holds a
//! `boot_out.txt` file. `detect_device_at(roots)` scans the given mount roots
//! (and their direct children) for such a volume; `resolve_device_root` adds
//! the explicit-override short circuit used by links and the CLI.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Marker file written by CircuitPython on every boot.
pub const BOOT_OUT_FILE: &str = "boot_out.txt";

/// Volume label CircuitPython uses by default; such volumes are checked first.
pub const DEFAULT_VOLUME_LABEL: &str = "CIRCUITPY";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A detected board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectedDevice {
    /// Root of the board's filesystem.
    pub root: PathBuf,
    /// CircuitPython version (e.g. `"8.2.0"`), when `boot_out.txt` names one.
    pub version: Option<String>,
    /// Board id (e.g. `"feather_m4_express"`).
    pub board_id: Option<String>,
}

/// Errors from device detection.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no CircuitPython device found (searched: {})", display_paths(searched))]
    DeviceNotFound { searched: Vec<PathBuf> },
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "nothing".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Resolve the destination root for device-relative links.
///
/// An explicit `root_override` wins and only has to be an existing directory.
/// Otherwise the default mount roots plus `extra_roots` are scanned.
pub fn resolve_device_root(
    root_override: Option<&Path>,
    extra_roots: &[PathBuf],
) -> Result<PathBuf, DetectError> {
    if let Some(root) = root_override {
        if root.is_dir() {
            return Ok(root.to_path_buf());
        }
        return Err(DetectError::DeviceNotFound {
            searched: vec![root.to_path_buf()],
        });
    }
    let mut roots = extra_roots.to_vec();
    roots.extend(default_mount_roots());
    detect_device_at(&roots).map(|device| device.root)
}

/// Scan `roots` in order and return the first board found.
///
/// Each root is a candidate itself, and so is each of its direct
/// subdirectories (`/media/<user>/CIRCUITPY`). Missing roots are skipped.
pub fn detect_device_at(roots: &[PathBuf]) -> Result<DetectedDevice, DetectError> {
    for root in roots {
        if let Some(device) = inspect(root)? {
            return Ok(device);
        }
        for candidate in subdirectories(root)? {
            if let Some(device) = inspect(&candidate)? {
                return Ok(device);
            }
        }
    }
    Err(DetectError::DeviceNotFound {
        searched: roots.to_vec(),
    })
}

/// Read `root/boot_out.txt`, if present.
pub fn inspect(root: &Path) -> Result<Option<DetectedDevice>, DetectError> {
    let marker = root.join(BOOT_OUT_FILE);
    let content = match fs::read(&marker) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) if is_absent(&err) => return Ok(None),
        Err(err) => {
            return Err(DetectError::Io {
                path: marker,
                source: err,
            })
        }
    };
    let (version, board_id) = parse_boot_out(&content);
    Ok(Some(DetectedDevice {
        root: root.to_path_buf(),
        version,
        board_id,
    }))
}

/// Extract `(version, board_id)` from `boot_out.txt` content:
///
/// ```text
/// Adafruit CircuitPython 8.2.0 on 2023-07-05; Adafruit Feather M4 Express with samd51j19
/// Board ID:feather_m4_express
/// ```
pub fn parse_boot_out(content: &str) -> (Option<String>, Option<String>) {
    let mut version = None;
    let mut board_id = None;
    for line in content.lines() {
        if version.is_none() {
            if let Some(rest) = line.split("CircuitPython ").nth(1) {
                version = rest.split_whitespace().next().map(str::to_string);
            }
        }
        if let Some(rest) = line.trim().strip_prefix("Board ID:") {
            let id = rest.trim();
            if !id.is_empty() {
                board_id = Some(id.to_string());
            }
        }
    }
    (version, board_id)
}

/// Platform mount roots searched by default.
pub fn default_mount_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if cfg!(target_os = "macos") {
        roots.push(PathBuf::from("/Volumes"));
    }
    if let Ok(user) = std::env::var("USER") {
        if !user.is_empty() {
            roots.push(Path::new("/media").join(&user));
            roots.push(Path::new("/run/media").join(&user));
        }
    }
    roots.push(PathBuf::from("/media"));
    roots.push(PathBuf::from("/mnt"));
    roots
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Missing or unreadable-because-not-a-directory both mean "not a board".
fn is_absent(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::NotADirectory
    )
}

/// Direct subdirectories of `root`, default-labelled volumes first, then by name.
fn subdirectories(root: &Path) -> Result<Vec<PathBuf>, DetectError> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if is_absent(&err) => return Ok(Vec::new()),
        Err(err) => {
            return Err(DetectError::Io {
                path: root.to_path_buf(),
                source: err,
            })
        }
    };
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort_by_key(|p| {
        let labelled = p
            .file_name()
            .map(|n| n.to_string_lossy().starts_with(DEFAULT_VOLUME_LABEL))
            .unwrap_or(false);
        (!labelled, p.clone())
    });
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_version_and_board() {
        let content = "Adafruit CircuitPython 8.2.0 on 2023-07-05; Adafruit Feather M4 Express with samd51j19\r\nBoard ID:feather_m4_express\r\nUID:1234\r\n";
        let (version, board) = parse_boot_out(content);
        assert_eq!(version.as_deref(), Some("8.2.0"));
        assert_eq!(board.as_deref(), Some("feather_m4_express"));
    }

    #[test]
    fn garbage_parses_to_nothing() {
        assert_eq!(parse_boot_out("hello"), (None, None));
        assert_eq!(parse_boot_out(""), (None, None));
    }

    #[test]
    fn mount_roots_end_with_generic_locations() {
        let roots = default_mount_roots();
        assert_eq!(roots.last(), Some(&PathBuf::from("/mnt")));
        assert!(roots.contains(&PathBuf::from("/media")));
    }
}
