//! Per-link log files: size-based rotation, tailing, and cleanup.
//!
//! A watcher's stdout/stderr go to `logs/link<id>.log`. The controller rotates
//! that file before each spawn once it passes 10 MiB, keeping
//! `link<id>.log.1` … `link<id>.log.3`.

use std::collections::VecDeque;
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use circlink_core::{paths::link_log_path, LinkId};

/// Rotation threshold (10 MiB).
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Rotated copies kept per link.
pub const MAX_ROTATED_FILES: usize = 3;

/// Rotate `log_path` once it reaches `max_bytes`.
///
/// `<name>.<max_files>` is dropped, every `<name>.<n>` moves up one slot, and
/// the live file becomes `<name>.1`. Returns `true` if a rotation happened.
/// A missing file is not an error.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes {
        return Ok(false);
    }

    let oldest = numbered_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..max_files).rev() {
        let src = numbered_path(log_path, n);
        if src.exists() {
            fs::rename(&src, numbered_path(log_path, n + 1))?;
        }
    }
    fs::rename(log_path, numbered_path(log_path, 1))?;
    Ok(true)
}

/// Rotate the log of link `id`. Failures are logged, never fatal.
pub fn rotate_link_log(home: &Path, id: LinkId) {
    let path = link_log_path(home, id);
    match rotate_if_needed(&path, MAX_LOG_BYTES, MAX_ROTATED_FILES) {
        Ok(true) => tracing::info!(link_id = %id, path = %path.display(), "link log rotated"),
        Ok(false) => {}
        Err(err) => {
            tracing::warn!(link_id = %id, path = %path.display(), error = %err, "log rotation failed")
        }
    }
}

/// Delete the live log and every rotated copy of link `id`. Returns how many
/// files were removed.
pub fn remove_link_logs(home: &Path, id: LinkId) -> io::Result<usize> {
    let base = link_log_path(home, id);
    let mut removed = 0;
    let candidates =
        std::iter::once(base.clone()).chain((1..=MAX_ROTATED_FILES).map(|n| numbered_path(&base, n)));
    for path in candidates {
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
    }
    Ok(removed)
}

/// The last `lines` lines of `path`.
pub fn tail(path: &Path, lines: usize) -> io::Result<Vec<String>> {
    let file = fs::File::open(path)?;
    let mut window = VecDeque::with_capacity(lines.min(4096));
    for line in BufReader::new(file).lines() {
        let line = line?;
        if lines == 0 {
            continue;
        }
        if window.len() == lines {
            window.pop_front();
        }
        window.push_back(line);
    }
    Ok(window.into_iter().collect())
}

/// `link3.log` → `link3.log.2`.
fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("link.log");
    base.with_file_name(format!("{name}.{n}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn make_log(path: &Path, size_bytes: usize) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = fs::File::create(path).unwrap();
        let chunk = vec![b'x'; 64 * 1024];
        let mut written = 0usize;
        while written < size_bytes {
            let n = (size_bytes - written).min(chunk.len());
            f.write_all(&chunk[..n]).unwrap();
            written += n;
        }
    }

    #[test]
    fn small_log_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("link1.log");
        make_log(&log, 1024);
        assert!(!rotate_if_needed(&log, MAX_LOG_BYTES, MAX_ROTATED_FILES).unwrap());
        assert!(!numbered_path(&log, 1).exists());
    }

    #[test]
    fn oversized_log_moves_to_first_slot() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("link1.log");
        make_log(&log, 2048);
        assert!(rotate_if_needed(&log, 1024, MAX_ROTATED_FILES).unwrap());
        assert!(!log.exists(), "next spawn recreates the live log");
        assert_eq!(fs::metadata(numbered_path(&log, 1)).unwrap().len(), 2048);
    }

    #[test]
    fn rotated_copies_are_capped() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("link1.log");
        for n in 1..=MAX_ROTATED_FILES {
            fs::write(numbered_path(&log, n), format!("rotated-{n}")).unwrap();
        }
        make_log(&log, 2048);
        rotate_if_needed(&log, 1024, MAX_ROTATED_FILES).unwrap();

        assert_eq!(
            fs::read_to_string(numbered_path(&log, MAX_ROTATED_FILES)).unwrap(),
            format!("rotated-{}", MAX_ROTATED_FILES - 1)
        );
        assert!(!numbered_path(&log, MAX_ROTATED_FILES + 1).exists());
    }

    #[test]
    fn missing_log_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(!rotate_if_needed(&dir.path().join("nope.log"), 1, 3).unwrap());
    }

    #[test]
    fn remove_link_logs_deletes_live_and_rotated() {
        let home = TempDir::new().unwrap();
        let log = link_log_path(home.path(), LinkId(4));
        make_log(&log, 10);
        fs::write(numbered_path(&log, 1), "old").unwrap();
        let other = link_log_path(home.path(), LinkId(5));
        make_log(&other, 10);

        assert_eq!(remove_link_logs(home.path(), LinkId(4)).unwrap(), 2);
        assert!(!log.exists());
        assert!(other.exists(), "other links' logs are untouched");
        assert_eq!(remove_link_logs(home.path(), LinkId(4)).unwrap(), 0);
    }

    #[test]
    fn tail_returns_last_lines() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("link1.log");
        fs::write(&log, "one\ntwo\nthree\nfour\n").unwrap();
        assert_eq!(tail(&log, 2).unwrap(), vec!["three", "four"]);
        assert_eq!(tail(&log, 10).unwrap().len(), 4);
        assert!(tail(&log, 0).unwrap().is_empty());
    }
}
