//! On-disk layout under `<home>/.circlink/`.

use std::path::{Path, PathBuf};

use crate::error::{io_err, RegistryError};
use crate::types::LinkId;

pub const REGISTRY_FILE: &str = "registry.yaml";
pub const REGISTRY_LOCK: &str = "registry.lock";
pub const SETTINGS_FILE: &str = "settings.yaml";

pub fn circlink_root(home: &Path) -> PathBuf {
    home.join(".circlink")
}

pub fn registry_path(home: &Path) -> PathBuf {
    circlink_root(home).join(REGISTRY_FILE)
}

pub fn lock_path(home: &Path) -> PathBuf {
    circlink_root(home).join(REGISTRY_LOCK)
}

pub fn settings_path(home: &Path) -> PathBuf {
    circlink_root(home).join(SETTINGS_FILE)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    circlink_root(home).join("logs")
}

/// `<home>/.circlink/logs/link<id>.log`, stdout/stderr of the watcher process.
pub fn link_log_path(home: &Path, id: LinkId) -> PathBuf {
    logs_dir(home).join(format!("link{}.log", id.0))
}

/// Create `<home>/.circlink/` if missing, owner-only (0700) on Unix.
///
/// Every writer goes through here so the directory never exists with the
/// default umask permissions.
pub fn ensure_circlink_root(home: &Path) -> Result<PathBuf, RegistryError> {
    let dir = circlink_root(home);
    if dir.is_dir() {
        return Ok(dir);
    }
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(&dir).map_err(|e| io_err(&dir, e))?;
    Ok(dir)
}

/// Current user's home directory.
pub fn home() -> Result<PathBuf, RegistryError> {
    dirs::home_dir().ok_or(RegistryError::HomeNotFound)
}
