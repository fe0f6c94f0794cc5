//! Mirror writer.
//!
//! ## `mirror` protocol
//!
//! 1. Map the source to `dest_root/<source relative to base_dir>`.
//! 2. Create missing parent directories.
//! 3. Copy bytes to `<dest>.circlink.tmp`.
//! 4. Rename over the final path (atomic on POSIX), removing the tmp file on
//!    failure so a half-copied file never shadows the previous good copy.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{io_err, SyncError};

const TMP_SUFFIX: &str = "circlink.tmp";

/// Outcome of a single mirrored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorResult {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub bytes: u64,
}

/// Destination path for `source` under `dest_root`.
///
/// Sources outside `base_dir` keep only their file name.
pub fn dest_path_for(source: &Path, base_dir: &Path, dest_root: &Path) -> PathBuf {
    match source.strip_prefix(base_dir) {
        Ok(relative) if !relative.as_os_str().is_empty() => dest_root.join(relative),
        _ => match source.file_name() {
            Some(name) => dest_root.join(name),
            None => dest_root.to_path_buf(),
        },
    }
}

/// Copy `source` into its mirrored location under `dest_root`, overwriting
/// whatever is there.
pub fn mirror(source: &Path, base_dir: &Path, dest_root: &Path) -> Result<MirrorResult, SyncError> {
    let dest = dest_path_for(source, base_dir, dest_root);
    let tmp = tmp_path_for(&dest);
    let bytes = copy_with_tmp(source, &dest, &tmp)?;
    tracing::info!("mirrored: {} -> {}", source.display(), dest.display());
    Ok(MirrorResult {
        source: source.to_path_buf(),
        dest,
        bytes,
    })
}

fn tmp_path_for(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(TMP_SUFFIX);
    dest.with_file_name(name)
}

fn copy_with_tmp(source: &Path, dest: &Path, tmp: &Path) -> Result<u64, SyncError> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    let bytes = match std::fs::copy(source, tmp) {
        Ok(bytes) => bytes,
        Err(e) => {
            let _ = std::fs::remove_file(tmp);
            return Err(io_err(source, e));
        }
    };

    if let Err(e) = std::fs::rename(tmp, dest) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(dest, e));
    }
    Ok(bytes)
}

/// Delete the mirrored counterpart of `source`. Returns `false` when there
/// was nothing to delete.
pub fn remove_mirrored(source: &Path, base_dir: &Path, dest_root: &Path) -> Result<bool, SyncError> {
    let dest = dest_path_for(source, base_dir, dest_root);
    match std::fs::remove_file(&dest) {
        Ok(()) => {
            tracing::info!("removed: {}", dest.display());
            Ok(true)
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_err(&dest, err)),
    }
}

/// Delete everything inside `dest_root`, keeping the directory itself.
///
/// A missing `dest_root` is created empty. Returns the number of top-level
/// entries removed. Stops at the first entry that cannot be removed.
pub fn wipe(dest_root: &Path) -> Result<usize, SyncError> {
    match std::fs::symlink_metadata(dest_root) {
        Err(err) if err.kind() == ErrorKind::NotFound => {
            std::fs::create_dir_all(dest_root).map_err(|e| io_err(dest_root, e))?;
            return Ok(0);
        }
        Err(err) => return Err(io_err(dest_root, err)),
        Ok(_) => {}
    }

    let entries = std::fs::read_dir(dest_root).map_err(|e| io_err(dest_root, e))?;
    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dest_root, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| io_err(&path, e))?;
        // Symlinked directories are unlinked, never followed.
        let result = if file_type.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        result.map_err(|e| io_err(&path, e))?;
        removed += 1;
    }
    tracing::info!("wiped {removed} entries from {}", dest_root.display());
    Ok(removed)
}
