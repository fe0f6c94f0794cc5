//! Pattern resolver: turn a link's source pattern into the concrete, sorted
//! set of regular files it matches right now.
//!
//! - plain file path → itself if it exists, else nothing
//! - plain directory → the files inside it (descending when recursive)
//! - `dir/<glob>` → files in `dir` whose name matches, or in any subdirectory
//!   of `dir` when recursive
//! - globs in parent components → expanded with the `glob` crate
//!
//! Missing files are never an error: a link may be watching for a file that
//! does not exist yet.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use circlink_core::types::{has_glob_chars, SourcePattern};
use glob::{MatchOptions, Pattern};
use walkdir::WalkDir;

use crate::error::{io_err, SyncError};

/// Maximum directory depth followed in recursive mode. Together with walkdir's
/// symlink loop detection this bounds traversal through cyclic links.
pub const MAX_DEPTH: usize = 32;

/// Resolve `source` against the current filesystem state.
///
/// The result is sorted and deduplicated so two resolutions of the same state
/// compare equal regardless of directory enumeration order.
pub fn resolve(source: &SourcePattern) -> Result<Vec<PathBuf>, SyncError> {
    let pattern = absolute_pattern(source);
    let mut found = BTreeSet::new();

    if !has_glob_chars(&pattern) {
        if pattern.is_file() {
            found.insert(pattern);
        } else if pattern.is_dir() {
            collect_matching(&pattern, None, source.recursive, &mut found)?;
        }
        return Ok(found.into_iter().collect());
    }

    let parent = pattern.parent().map(Path::to_path_buf).unwrap_or_default();
    let name = pattern
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if has_glob_chars(&parent) {
        expand_glob(&parent, &name, source.recursive, &mut found)?;
    } else {
        let matcher = compile(&name)?;
        collect_matching(&parent, Some(&matcher), source.recursive, &mut found)?;
    }
    Ok(found.into_iter().collect())
}

/// The pattern as an absolute path, anchored at the link's base directory.
pub fn absolute_pattern(source: &SourcePattern) -> PathBuf {
    if source.pattern.is_absolute() {
        source.pattern.clone()
    } else {
        source.base_dir.join(&source.pattern)
    }
}

fn compile(name: &str) -> Result<Pattern, SyncError> {
    Pattern::new(name).map_err(|source| SyncError::Pattern {
        pattern: name.to_string(),
        source,
    })
}

fn match_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    }
}

/// Regular files under `dir` whose file name matches `matcher` (all files
/// when `None`).
fn collect_matching(
    dir: &Path,
    matcher: Option<&Pattern>,
    recursive: bool,
    found: &mut BTreeSet<PathBuf>,
) -> Result<(), SyncError> {
    if !dir.is_dir() {
        return Ok(());
    }
    let name_matches = |path: &Path| match (matcher, path.file_name()) {
        (None, _) => true,
        (Some(m), Some(name)) => m.matches_with(&name.to_string_lossy(), match_options()),
        (Some(_), None) => false,
    };

    if !recursive {
        let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
        for entry in entries.flatten() {
            let path = entry.path();
            // `is_file` follows symlinks, so linked files are mirrored too.
            if path.is_file() && name_matches(&path) {
                found.insert(path);
            }
        }
        return Ok(());
    }

    let walker = WalkDir::new(dir)
        .follow_links(true)
        .max_depth(MAX_DEPTH)
        .min_depth(1);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!("skipping unreadable entry under {}: {err}", dir.display());
                continue;
            }
        };
        if entry.file_type().is_file() && name_matches(entry.path()) {
            found.insert(entry.into_path());
        }
    }
    Ok(())
}

/// Patterns such as `src/*/code.py`: let the glob crate walk the parents.
fn expand_glob(
    parent: &Path,
    name: &str,
    recursive: bool,
    found: &mut BTreeSet<PathBuf>,
) -> Result<(), SyncError> {
    let full = if recursive {
        parent.join("**").join(name)
    } else {
        parent.join(name)
    };
    let full = full.to_string_lossy().into_owned();
    let paths = glob::glob_with(&full, match_options()).map_err(|source| SyncError::Pattern {
        pattern: full.clone(),
        source,
    })?;
    for path in paths.flatten() {
        if path.is_file() {
            found.insert(path);
        }
    }
    Ok(())
}
