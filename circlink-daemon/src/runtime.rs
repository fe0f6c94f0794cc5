//! Watcher runtime: the body of one link's background process.
//!
//! `initializing → watching → shutting_down → stopped`
//!
//! Initialisation (destination resolution, optional wipe, presave) happens
//! before the entry flips to `running`, so any failure there is a startup
//! failure the front end can report. Once watching, the pattern is re-resolved
//! every poll interval and the diff against the last known snapshot drives
//! the mirror writer.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::MissedTickBehavior;

use circlink_core::{
    settings::{self, DeviceSettings, EmptyPatternPolicy},
    Destination, Link, LinkId, LinkStatus, Registry, Settings, SourcePattern,
};
use circlink_detector::{resolve_device_root, DetectError};
use circlink_sync::{diff, mirror, remove_mirrored, resolve, snapshot, wipe, Snapshot};

use crate::error::WatcherError;

/// Where a watcher is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherPhase {
    Initializing,
    Watching,
    ShuttingDown,
    Stopped,
}

/// Per-cycle counts, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub copied: usize,
    pub removed: usize,
    pub failed: usize,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.copied == 0 && self.removed == 0 && self.failed == 0
    }
}

/// In-process state of a single link's watcher.
#[derive(Debug)]
pub struct LinkWatcher {
    id: LinkId,
    source: SourcePattern,
    dest_root: PathBuf,
    known: Snapshot,
    phase: WatcherPhase,
}

impl LinkWatcher {
    /// Run the `initializing` phase for `link`: resolve the destination, wipe
    /// it when asked, and mirror every matched file once unless presave is
    /// skipped.
    pub fn initialize(link: &Link, settings: &Settings) -> Result<Self, WatcherError> {
        let dest_root = resolve_destination(&link.dest, &settings.device)?;
        tracing::info!(link_id = %link.id, dest = %dest_root.display(), "initializing");

        if link.options.wipe_dest {
            let removed = wipe(&dest_root).map_err(|source| WatcherError::Wipe {
                dest: dest_root.clone(),
                source,
            })?;
            tracing::info!(link_id = %link.id, removed, "destination wiped");
        }
        ensure_writable_dir(&dest_root)?;

        let files = resolve(&link.source).map_err(WatcherError::Pattern)?;
        if files.is_empty() {
            if settings.watcher.empty_pattern == EmptyPatternPolicy::Fail {
                return Err(WatcherError::EmptyPattern {
                    pattern: link.source.pattern.clone(),
                });
            }
            tracing::info!(link_id = %link.id, "no files match yet; waiting for them to appear");
        }

        if link.options.skip_presave {
            tracing::info!(link_id = %link.id, "presave skipped");
        } else {
            for file in &files {
                mirror(file, &link.source.base_dir, &dest_root).map_err(WatcherError::Presave)?;
            }
            tracing::info!(link_id = %link.id, files = files.len(), "presave complete");
        }

        Ok(Self {
            id: link.id,
            source: link.source.clone(),
            dest_root,
            known: snapshot(&files, &Snapshot::new()),
            phase: WatcherPhase::Initializing,
        })
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn dest_root(&self) -> &Path {
        &self.dest_root
    }

    pub fn phase(&self) -> WatcherPhase {
        self.phase
    }

    /// Files the watcher currently considers mirrored.
    pub fn known_files(&self) -> impl Iterator<Item = &PathBuf> {
        self.known.keys()
    }

    pub(crate) fn enter_watching(&mut self) {
        self.phase = WatcherPhase::Watching;
    }

    pub(crate) fn begin_shutdown(&mut self) {
        self.phase = WatcherPhase::ShuttingDown;
    }

    pub(crate) fn finish(&mut self) {
        self.phase = WatcherPhase::Stopped;
    }

    /// One `watching` cycle.
    ///
    /// Files whose copy or deletion fails keep their previous snapshot entry,
    /// so the next cycle sees them as pending again.
    pub fn poll_once(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        let files = match resolve(&self.source) {
            Ok(files) => files,
            Err(err) => {
                tracing::warn!(link_id = %self.id, error = %err, "pattern resolution failed; retrying next cycle");
                return report;
            }
        };
        let mut current = snapshot(&files, &self.known);
        let changes = diff(&self.known, &current);
        if changes.is_empty() {
            return report;
        }

        let base_dir = &self.source.base_dir;
        for file in changes.to_copy() {
            match mirror(file, base_dir, &self.dest_root) {
                Ok(_) => report.copied += 1,
                Err(err) => {
                    tracing::warn!(link_id = %self.id, path = %file.display(), error = %err, "mirror failed");
                    report.failed += 1;
                    match self.known.get(file) {
                        Some(previous) => {
                            current.insert(file.clone(), *previous);
                        }
                        None => {
                            current.remove(file);
                        }
                    }
                }
            }
        }
        for file in &changes.removed {
            match remove_mirrored(file, base_dir, &self.dest_root) {
                Ok(_) => report.removed += 1,
                Err(err) => {
                    tracing::warn!(link_id = %self.id, path = %file.display(), error = %err, "delete failed");
                    report.failed += 1;
                    if let Some(previous) = self.known.get(file) {
                        current.insert(file.clone(), *previous);
                    }
                }
            }
        }

        self.known = current;
        report
    }
}

/// Marker written and removed again to prove the destination accepts writes.
const WRITE_CHECK_FILE: &str = ".circlink-write-check";

/// Create `dest` if needed and confirm it is a directory we can write into.
fn ensure_writable_dir(dest: &Path) -> Result<(), WatcherError> {
    let unusable = |reason: String| WatcherError::Destination {
        dest: dest.to_path_buf(),
        reason,
    };
    std::fs::create_dir_all(dest).map_err(|e| unusable(e.to_string()))?;
    if !dest.is_dir() {
        return Err(unusable("not a directory".to_string()));
    }
    let marker = dest.join(WRITE_CHECK_FILE);
    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&marker)
        .map_err(|e| unusable(format!("not writable: {e}")))?;
    std::fs::remove_file(&marker).map_err(|e| unusable(format!("not writable: {e}")))?;
    Ok(())
}

/// Destination root for a link: an explicit path as-is, or the device root
/// joined with the link's device-relative path.
pub fn resolve_destination(dest: &Destination, device: &DeviceSettings) -> Result<PathBuf, DetectError> {
    match dest {
        Destination::Explicit { path } => Ok(path.clone()),
        Destination::Device { relative } => {
            let root = resolve_device_root(device.root_override.as_deref(), &device.mount_roots)?;
            Ok(root.join(relative))
        }
    }
}

/// Initialise link `id` and flip its entry to `running` under `pid`.
///
/// On failure the entry is marked `stopped` with the cause in `last_error`.
pub fn boot(
    registry: &Registry,
    settings: &Settings,
    id: LinkId,
    pid: u32,
) -> Result<LinkWatcher, WatcherError> {
    let result = registry
        .get(id)?
        .ok_or(WatcherError::LinkMissing { id })
        .and_then(|link| LinkWatcher::initialize(&link, settings))
        .and_then(|mut watcher| {
            confirm_running(registry, id, pid)?;
            watcher.enter_watching();
            Ok(watcher)
        });

    if let Err(err) = &result {
        tracing::error!(link_id = %id, error = %err, "startup failed");
        if let Err(record_err) = record_startup_failure(registry, id, err) {
            tracing::warn!(link_id = %id, error = %record_err, "could not record startup failure");
        }
    }
    result
}

fn confirm_running(registry: &Registry, id: LinkId, pid: u32) -> Result<Link, WatcherError> {
    registry
        .transaction(|file| {
            Ok(file.get_mut(id).map(|link| {
                // Stopped while we were initialising: never resurrect it.
                if link.status == LinkStatus::Stopped {
                    return Err(WatcherError::Cancelled { id });
                }
                link.status = LinkStatus::Running;
                link.process_handle = Some(pid);
                link.last_error = None;
                link.heartbeat_at = Some(Utc::now());
                Ok(link.clone())
            }))
        })?
        .ok_or(WatcherError::LinkMissing { id })?
}

fn record_startup_failure(
    registry: &Registry,
    id: LinkId,
    err: &WatcherError,
) -> Result<(), WatcherError> {
    registry.update(id, |link| {
        link.mark_stopped();
        link.last_error = Some(err.to_string());
    })?;
    Ok(())
}

/// Refresh the heartbeat. Returns `false` once the entry no longer belongs to
/// this process (cleared, stopped, or taken over), which ends the watcher.
pub fn heartbeat(registry: &Registry, id: LinkId, pid: u32) -> Result<bool, WatcherError> {
    let owned = registry.transaction(|file| {
        Ok(match file.get_mut(id) {
            Some(link) if link.status == LinkStatus::Running && link.process_handle == Some(pid) => {
                link.heartbeat_at = Some(Utc::now());
                true
            }
            _ => false,
        })
    })?;
    Ok(owned)
}

/// Flip the entry to `stopped` if this process still owns it.
pub fn release(registry: &Registry, id: LinkId, pid: u32) -> Result<(), WatcherError> {
    registry.update(id, |link| {
        if link.process_handle == Some(pid) {
            link.mark_stopped();
        }
    })?;
    Ok(())
}

/// Start the watcher for link `id` and block until it exits.
pub fn start_blocking(home: &Path, id: LinkId) -> Result<(), WatcherError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|source| WatcherError::Io {
            path: PathBuf::from("tokio-runtime"),
            source,
        })?;
    runtime.block_on(run(home.to_path_buf(), id))
}

/// Watcher main loop.
pub async fn run(home: PathBuf, id: LinkId) -> Result<(), WatcherError> {
    let registry = Registry::at(&home);
    let settings = settings::load_at(&home)?;
    let pid = std::process::id();

    // Installed before the entry turns `running` so an early stop request is
    // never lost to the default SIGTERM action.
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| WatcherError::Runtime(format!("SIGTERM handler failed: {e}")))?;

    let mut watcher = boot(&registry, &settings, id, pid)?;
    tracing::info!(link_id = %id, pid, dest = %watcher.dest_root().display(), "watching");

    let mut poll = tokio::time::interval(settings.watcher.poll_interval());
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut beat = tokio::time::interval(settings.watcher.heartbeat_interval());
    beat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    beat.tick().await;

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!(link_id = %id, "received SIGTERM");
                break;
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    tracing::warn!(link_id = %id, error = %err, "ctrl-c handler failed");
                }
                tracing::info!(link_id = %id, "received ctrl-c");
                break;
            }
            _ = poll.tick() => {
                let report = watcher.poll_once();
                if !report.is_idle() {
                    tracing::info!(
                        link_id = %id,
                        copied = report.copied,
                        removed = report.removed,
                        failed = report.failed,
                        "cycle complete",
                    );
                }
            }
            _ = beat.tick() => {
                match heartbeat(&registry, id, pid) {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(link_id = %id, "registry entry gone or taken over; shutting down");
                        break;
                    }
                    Err(err) => tracing::warn!(link_id = %id, error = %err, "heartbeat failed"),
                }
            }
        }
    }

    watcher.begin_shutdown();
    release(&registry, id, pid)?;
    watcher.finish();
    tracing::info!(link_id = %id, "stopped");
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .try_init();
}
