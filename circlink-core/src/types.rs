//! Domain types for the circlink link registry.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! All types are serializable/deserializable via serde + serde_yaml.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Registry-wide link identifier. Allocated monotonically, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for LinkId {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

/// A command target: a literal link id or one of the `all` / `last` aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkToken {
    All,
    Last,
    Id(LinkId),
}

impl LinkToken {
    /// `true` for `all` / `last`.
    pub fn is_alias(&self) -> bool {
        !matches!(self, LinkToken::Id(_))
    }
}

impl FromStr for LinkToken {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "last" => Ok(Self::Last),
            other => match other.parse::<u64>() {
                Ok(n) if n > 0 => Ok(Self::Id(LinkId(n))),
                _ => Err(RegistryError::InvalidToken {
                    token: s.to_string(),
                }),
            },
        }
    }
}

impl fmt::Display for LinkToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkToken::All => write!(f, "all"),
            LinkToken::Last => write!(f, "last"),
            LinkToken::Id(id) => id.fmt(f),
        }
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Persisted lifecycle status of a link.
///
/// `Starting` is written by the front end before the watcher is spawned; the
/// watcher flips it to `Running` once its initial sync is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    #[default]
    Starting,
    Running,
    Stopped,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Starting => write!(f, "starting"),
            LinkStatus::Running => write!(f, "running"),
            LinkStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Status recomputed from the persisted flag plus a liveness check.
///
/// Never persisted: `Stale` is what a `Starting`/`Running` entry becomes when
/// its recorded process is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectiveStatus {
    Starting,
    Running,
    Stopped,
    Stale,
}

impl EffectiveStatus {
    /// A watcher process is (believed to be) attached to the entry.
    pub fn is_live(&self) -> bool {
        matches!(self, EffectiveStatus::Starting | EffectiveStatus::Running)
    }
}

impl fmt::Display for EffectiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectiveStatus::Starting => write!(f, "starting"),
            EffectiveStatus::Running => write!(f, "running"),
            EffectiveStatus::Stopped => write!(f, "stopped"),
            EffectiveStatus::Stale => write!(f, "stale"),
        }
    }
}

/// Where mirrored files land.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Destination {
    /// A concrete directory chosen by the user.
    Explicit { path: PathBuf },
    /// A path relative to the device root, resolved when the watcher starts.
    Device { relative: PathBuf },
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Explicit { path } => write!(f, "{}", path.display()),
            Destination::Device { relative } => write!(f, "<device>/{}", relative.display()),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// The literal pattern the user supplied, plus how to expand it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePattern {
    /// Absolute file path or glob, e.g. `/work/proj/lib/*.py`.
    pub pattern: PathBuf,
    #[serde(default)]
    pub recursive: bool,
    /// Directory mirrored paths are made relative to.
    pub base_dir: PathBuf,
}

impl SourcePattern {
    /// `true` when the final component carries glob metacharacters.
    pub fn is_glob(&self) -> bool {
        has_glob_chars(&self.pattern)
    }
}

/// `true` when `path` contains `*`, `?` or `[`.
pub fn has_glob_chars(path: &Path) -> bool {
    path.to_string_lossy()
        .chars()
        .any(|c| matches!(c, '*' | '?' | '['))
}

/// One-shot start options. Consumed when the watcher starts; `restart`
/// always uses the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LinkOptions {
    #[serde(default)]
    pub wipe_dest: bool,
    #[serde(default)]
    pub skip_presave: bool,
}

/// Configuration for a link that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkDraft {
    pub name: Option<String>,
    pub source: SourcePattern,
    pub dest: Destination,
    pub options: LinkOptions,
}

/// A single registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub id: LinkId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub source: SourcePattern,
    pub dest: Destination,
    #[serde(default)]
    pub options: LinkOptions,
    #[serde(default)]
    pub status: LinkStatus,
    /// PID of the watcher process; meaningful only while starting/running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_handle: Option<u32>,
    /// Cause of the last failed start, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_at: Option<DateTime<Utc>>,
}

impl Link {
    /// Build a fresh `Starting` entry for `id` from a draft.
    pub fn from_draft(id: LinkId, draft: LinkDraft, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: draft.name,
            source: draft.source,
            dest: draft.dest,
            options: draft.options,
            status: LinkStatus::Starting,
            process_handle: None,
            last_error: None,
            created_at,
            heartbeat_at: None,
        }
    }

    /// The configuration needed to start an equivalent link, with one-shot
    /// options reset.
    pub fn to_restart_draft(&self) -> LinkDraft {
        LinkDraft {
            name: self.name.clone(),
            source: self.source.clone(),
            dest: self.dest.clone(),
            options: LinkOptions::default(),
        }
    }

    /// Re-validate the persisted status against the live process table.
    ///
    /// `is_watcher` must confirm the pid is this link's watcher, not merely a
    /// live process. A `Starting` entry that never got a pid is stale once it
    /// is older than `startup_timeout`.
    pub fn effective_status(
        &self,
        startup_timeout: std::time::Duration,
        is_watcher: impl Fn(u32) -> bool,
    ) -> EffectiveStatus {
        match (self.status, self.process_handle) {
            (LinkStatus::Stopped, _) => EffectiveStatus::Stopped,
            (LinkStatus::Starting, None) => {
                let timeout = chrono::Duration::from_std(startup_timeout)
                    .unwrap_or_else(|_| chrono::Duration::days(1));
                if Utc::now() - self.created_at > timeout {
                    EffectiveStatus::Stale
                } else {
                    // Written by the front end, spawn not recorded yet.
                    EffectiveStatus::Starting
                }
            }
            (LinkStatus::Running, None) => EffectiveStatus::Stale,
            (status, Some(pid)) => {
                if !is_watcher(pid) {
                    EffectiveStatus::Stale
                } else if status == LinkStatus::Starting {
                    EffectiveStatus::Starting
                } else {
                    EffectiveStatus::Running
                }
            }
        }
    }

    /// Flip to `Stopped` and forget the process handle.
    pub fn mark_stopped(&mut self) {
        self.status = LinkStatus::Stopped;
        self.process_handle = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn link(status: LinkStatus, pid: Option<u32>) -> Link {
        Link {
            id: LinkId(1),
            name: None,
            source: SourcePattern {
                pattern: PathBuf::from("/work/*.py"),
                recursive: false,
                base_dir: PathBuf::from("/work"),
            },
            dest: Destination::Explicit {
                path: PathBuf::from("/mnt/board"),
            },
            options: LinkOptions::default(),
            status,
            process_handle: pid,
            last_error: None,
            created_at: Utc::now(),
            heartbeat_at: None,
        }
    }

    #[rstest]
    #[case("all", LinkToken::All)]
    #[case("ALL", LinkToken::All)]
    #[case("last", LinkToken::Last)]
    #[case("12", LinkToken::Id(LinkId(12)))]
    fn token_parses(#[case] raw: &str, #[case] expected: LinkToken) {
        assert_eq!(raw.parse::<LinkToken>().unwrap(), expected);
    }

    #[rstest]
    #[case("0")]
    #[case("-3")]
    #[case("first")]
    #[case("")]
    fn token_rejects_garbage(#[case] raw: &str) {
        let err = raw.parse::<LinkToken>().unwrap_err();
        assert!(matches!(err, RegistryError::InvalidToken { .. }));
    }

    #[rstest]
    #[case(LinkStatus::Stopped, Some(10), true, EffectiveStatus::Stopped)]
    #[case(LinkStatus::Running, Some(10), true, EffectiveStatus::Running)]
    #[case(LinkStatus::Running, Some(10), false, EffectiveStatus::Stale)]
    #[case(LinkStatus::Running, None, true, EffectiveStatus::Stale)]
    #[case(LinkStatus::Starting, None, false, EffectiveStatus::Starting)]
    #[case(LinkStatus::Starting, Some(10), true, EffectiveStatus::Starting)]
    #[case(LinkStatus::Starting, Some(10), false, EffectiveStatus::Stale)]
    fn effective_status_rechecks_liveness(
        #[case] status: LinkStatus,
        #[case] pid: Option<u32>,
        #[case] alive: bool,
        #[case] expected: EffectiveStatus,
    ) {
        let timeout = std::time::Duration::from_secs(5);
        assert_eq!(link(status, pid).effective_status(timeout, |_| alive), expected);
    }

    #[test]
    fn starting_entry_without_pid_goes_stale_after_startup_timeout() {
        let timeout = std::time::Duration::from_secs(5);
        let mut orphan = link(LinkStatus::Starting, None);
        orphan.created_at = Utc::now() - chrono::Duration::seconds(60);
        assert_eq!(orphan.effective_status(timeout, |_| true), EffectiveStatus::Stale);
    }

    #[test]
    fn restart_draft_resets_one_shot_options() {
        let mut original = link(LinkStatus::Stopped, None);
        original.options = LinkOptions {
            wipe_dest: true,
            skip_presave: true,
        };
        let draft = original.to_restart_draft();
        assert_eq!(draft.options, LinkOptions::default());
        assert_eq!(draft.source, original.source);
    }

    #[test]
    fn glob_detection() {
        assert!(has_glob_chars(Path::new("/a/*.py")));
        assert!(has_glob_chars(Path::new("/a/file?.txt")));
        assert!(!has_glob_chars(Path::new("/a/code.py")));
    }

    #[test]
    fn link_serde_roundtrip_keeps_destination_kind() {
        let mut l = link(LinkStatus::Running, Some(42));
        l.dest = Destination::Device {
            relative: PathBuf::from("lib"),
        };
        let yaml = serde_yaml::to_string(&l).expect("serialize");
        assert!(yaml.contains("kind: device"));
        let back: Link = serde_yaml::from_str(&yaml).expect("deserialize");
        assert_eq!(back, l);
    }
}
