//! Snapshot diffing for the polling watcher.
//!
//! A [`Snapshot`] maps each matched file to its last-modified time and size.
//! Diffing two snapshots partitions the union of their keys into added,
//! removed, changed, and (implicitly) unchanged.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Modification stamp of a single source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub modified: SystemTime,
    pub len: u64,
}

impl FileStamp {
    /// Stamp for `path`, or `None` when it vanished between resolve and stat.
    pub fn of(path: &Path) -> std::io::Result<Option<Self>> {
        match std::fs::metadata(path) {
            Ok(meta) => Ok(Some(FileStamp {
                modified: meta.modified()?,
                len: meta.len(),
            })),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

pub type Snapshot = BTreeMap<PathBuf, FileStamp>;

/// Stat every file in `files`.
///
/// A file that vanished mid-scan is left out and shows up as removed on the
/// next diff. A file that still matched but could not be stat'ed keeps its
/// stamp from `previous`: it is unchanged as far as the watcher can tell, and
/// must never look removed.
pub fn snapshot(files: &[PathBuf], previous: &Snapshot) -> Snapshot {
    snapshot_with(files, previous, FileStamp::of)
}

fn snapshot_with(
    files: &[PathBuf],
    previous: &Snapshot,
    stat: impl Fn(&Path) -> std::io::Result<Option<FileStamp>>,
) -> Snapshot {
    let mut snap = Snapshot::new();
    for path in files {
        match stat(path) {
            Ok(Some(stamp)) => {
                snap.insert(path.clone(), stamp);
            }
            Ok(None) => tracing::debug!("vanished during scan: {}", path.display()),
            Err(err) => {
                tracing::warn!("cannot stat {}: {err}", path.display());
                if let Some(stamp) = previous.get(path) {
                    snap.insert(path.clone(), *stamp);
                }
            }
        }
    }
    snap
}

/// What changed between two polls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub changed: Vec<PathBuf>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Files whose current content must be copied to the destination.
    pub fn to_copy(&self) -> impl Iterator<Item = &PathBuf> {
        self.added.iter().chain(self.changed.iter())
    }
}

/// Compare `previous` against `current`. Output lists are sorted.
pub fn diff(previous: &Snapshot, current: &Snapshot) -> ChangeSet {
    let mut changes = ChangeSet::default();
    for (path, stamp) in current {
        match previous.get(path) {
            None => changes.added.push(path.clone()),
            Some(old) if old != stamp => changes.changed.push(path.clone()),
            Some(_) => {}
        }
    }
    changes.removed = previous
        .keys()
        .filter(|path| !current.contains_key(*path))
        .cloned()
        .collect();
    changes
}
