//! Lifecycle controller: the front-end side of start / stop / list / restart /
//! clear.
//!
//! Every command re-derives each entry's status from the process table
//! ([`Link::effective_status`]) before acting, because the registry can lag
//! behind a crashed or killed watcher.

use std::path::{Component, Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use circlink_core::{
    types::has_glob_chars, Destination, EffectiveStatus, Link, LinkDraft, LinkId, LinkOptions,
    LinkStatus, LinkToken, Registry, Settings, SourcePattern,
};
use circlink_detector::resolve_device_root;
use circlink_sync::{resolve, SyncError};
use serde::Serialize;

use crate::error::LifecycleError;
use crate::log_rotation::remove_link_logs;
use crate::process::ProcessControl;

/// How often the controller re-reads the registry while waiting on a watcher.
const WAIT_STEP: Duration = Duration::from_millis(20);

/// Arguments of `start`, as typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub name: Option<String>,
    /// File or glob, absolute or relative to `cwd`.
    pub pattern: PathBuf,
    /// Device-relative unless `use_cwd_path`.
    pub write_path: PathBuf,
    pub use_cwd_path: bool,
    pub recursive: bool,
    pub wipe_dest: bool,
    pub skip_presave: bool,
    /// Becomes the link's base directory.
    pub cwd: PathBuf,
}

/// A registry entry with its re-validated status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkView {
    #[serde(flatten)]
    pub link: Link,
    #[serde(rename = "effective_status")]
    pub status: EffectiveStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// A live watcher was signalled and confirmed stopped.
    Stopped(LinkId),
    /// The entry was stale or never got a watcher; only the registry changed.
    Corrected(LinkId),
    AlreadyStopped(LinkId),
}

impl StopOutcome {
    pub fn id(&self) -> LinkId {
        match self {
            StopOutcome::Stopped(id) | StopOutcome::Corrected(id) | StopOutcome::AlreadyStopped(id) => *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartOutcome {
    pub old: LinkId,
    pub new: Link,
}

/// Orchestrates links through the shared registry and a [`ProcessControl`].
pub struct Controller<P: ProcessControl> {
    registry: Registry,
    settings: Settings,
    processes: P,
}

impl<P: ProcessControl> Controller<P> {
    pub fn new(registry: Registry, settings: Settings, processes: P) -> Self {
        Self {
            registry,
            settings,
            processes,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn processes(&self) -> &P {
        &self.processes
    }

    fn status_of(&self, link: &Link) -> EffectiveStatus {
        let home = self.registry.home();
        link.effective_status(self.settings.watcher.startup_timeout(), |pid| {
            self.processes.is_watcher(home, link.id, pid)
        })
    }

    // -- start --------------------------------------------------------------

    /// Validate `request` into a draft without touching the registry.
    pub fn build_draft(&self, request: &StartRequest) -> Result<LinkDraft, LifecycleError> {
        let base_dir = normalize(&request.cwd);
        let pattern = normalize(&base_dir.join(&request.pattern));
        let shown = request.pattern.display().to_string();

        if !pattern.starts_with(&base_dir) || pattern == base_dir {
            return Err(LifecycleError::InvalidPattern {
                pattern: shown,
                reason: format!("must be inside the current directory ({})", base_dir.display()),
            });
        }
        if request.recursive && !has_glob_chars(&pattern) {
            return Err(LifecycleError::InvalidPattern {
                pattern: shown,
                reason: "--recursive requires a glob pattern".to_string(),
            });
        }

        let source = SourcePattern {
            pattern,
            recursive: request.recursive,
            base_dir: base_dir.clone(),
        };
        match resolve(&source) {
            Err(SyncError::Pattern { source, .. }) => {
                return Err(LifecycleError::InvalidPattern {
                    pattern: shown,
                    reason: source.to_string(),
                })
            }
            // Unreadable directories are the watcher's problem, not a bad pattern.
            Err(SyncError::Io { .. }) | Ok(_) => {}
        }

        let dest = if request.use_cwd_path {
            Destination::Explicit {
                path: normalize(&base_dir.join(&request.write_path)),
            }
        } else {
            Destination::Device {
                relative: device_relative(&request.write_path),
            }
        };

        Ok(LinkDraft {
            name: request.name.clone(),
            source,
            dest,
            options: LinkOptions {
                wipe_dest: request.wipe_dest,
                skip_presave: request.skip_presave,
            },
        })
    }

    /// Create a link and return once its watcher is `running`.
    pub fn start(&self, request: &StartRequest) -> Result<Link, LifecycleError> {
        let draft = self.build_draft(request)?;
        self.start_draft(draft)
    }

    /// Allocate an id for `draft`, spawn its watcher, and wait for the
    /// startup handshake.
    pub fn start_draft(&self, draft: LinkDraft) -> Result<Link, LifecycleError> {
        if let Destination::Device { .. } = draft.dest {
            let device = &self.settings.device;
            resolve_device_root(device.root_override.as_deref(), &device.mount_roots)?;
        }

        let link = self.registry.create(draft)?;
        tracing::info!(link_id = %link.id, "link created");

        let pid = match self.processes.spawn_watcher(self.registry.home(), link.id) {
            Ok(pid) => pid,
            Err(err) => {
                let reason = format!("could not spawn watcher: {err}");
                self.fail_start(link.id, &reason)?;
                return Err(LifecycleError::Startup {
                    id: link.id,
                    reason,
                });
            }
        };
        self.registry.update(link.id, |entry| {
            if entry.status != LinkStatus::Stopped && entry.process_handle.is_none() {
                entry.process_handle = Some(pid);
            }
        })?;

        self.await_startup(link.id, pid)
    }

    fn await_startup(&self, id: LinkId, pid: u32) -> Result<Link, LifecycleError> {
        let timeout = self.settings.watcher.startup_timeout();
        let deadline = Instant::now() + timeout;
        loop {
            let Some(entry) = self.registry.get(id)? else {
                return Err(LifecycleError::Startup {
                    id,
                    reason: "entry was removed during startup".to_string(),
                });
            };
            match entry.status {
                LinkStatus::Running => return Ok(entry),
                LinkStatus::Stopped => {
                    return Err(LifecycleError::Startup {
                        id,
                        reason: entry
                            .last_error
                            .unwrap_or_else(|| "watcher stopped during startup".to_string()),
                    })
                }
                LinkStatus::Starting => {}
            }

            if !self.processes.is_alive(pid) {
                let reason =
                    format!("watcher exited before confirming startup (see `circlink logs {id}`)");
                self.fail_start(id, &reason)?;
                return Err(LifecycleError::Startup { id, reason });
            }
            if Instant::now() >= deadline {
                if let Err(err) = self.processes.request_stop(pid) {
                    tracing::warn!(link_id = %id, pid, error = %err, "could not signal watcher");
                }
                let reason = format!("watcher did not start within {}ms", timeout.as_millis());
                self.fail_start(id, &reason)?;
                return Err(LifecycleError::Startup { id, reason });
            }
            thread::sleep(WAIT_STEP);
        }
    }

    fn fail_start(&self, id: LinkId, reason: &str) -> Result<(), LifecycleError> {
        self.registry.update(id, |entry| {
            entry.mark_stopped();
            entry.last_error = Some(reason.to_string());
        })?;
        Ok(())
    }

    // -- stop ---------------------------------------------------------------

    pub fn stop(&self, token: LinkToken) -> Result<Vec<StopOutcome>, LifecycleError> {
        let ids = self.registry.resolve_alias(token)?;
        ids.into_iter().map(|id| self.stop_one(id)).collect()
    }

    fn stop_one(&self, id: LinkId) -> Result<StopOutcome, LifecycleError> {
        let link = self.registry.require(id)?;
        let status = self.status_of(&link);
        let pid = match (status, link.process_handle) {
            (EffectiveStatus::Stopped, _) => return Ok(StopOutcome::AlreadyStopped(id)),
            (EffectiveStatus::Stale, _) | (_, None) => {
                self.correct_to_stopped(id, link.process_handle)?;
                tracing::info!(link_id = %id, %status, "corrected to stopped without signalling");
                return Ok(StopOutcome::Corrected(id));
            }
            (_, Some(pid)) => pid,
        };

        if let Err(err) = self.processes.request_stop(pid) {
            tracing::debug!(link_id = %id, pid, error = %err, "signal failed");
        }

        let timeout = self.settings.watcher.shutdown_timeout();
        let deadline = Instant::now() + timeout;
        loop {
            let entry = self.registry.get(id)?;
            let released = entry.map_or(true, |e| e.status == LinkStatus::Stopped);
            if released {
                return Ok(StopOutcome::Stopped(id));
            }
            if !self.processes.is_alive(pid) {
                // Exited without releasing its entry (killed, crashed).
                self.correct_to_stopped(id, Some(pid))?;
                return Ok(StopOutcome::Stopped(id));
            }
            if Instant::now() >= deadline {
                return Err(LifecycleError::ShutdownTimeout { id, waited: timeout });
            }
            thread::sleep(WAIT_STEP);
        }
    }

    /// Mark `id` stopped unless a different watcher has taken it over.
    fn correct_to_stopped(&self, id: LinkId, expected_pid: Option<u32>) -> Result<(), LifecycleError> {
        self.registry.update(id, |entry| {
            if entry.process_handle == expected_pid {
                entry.mark_stopped();
            }
        })?;
        Ok(())
    }

    // -- list ---------------------------------------------------------------

    /// Entries matching `token` with re-validated status. An alias over an
    /// empty registry lists nothing; an unknown id is `NotFound`.
    pub fn list(&self, token: LinkToken) -> Result<Vec<LinkView>, LifecycleError> {
        let links = self.registry.list_all()?;
        let ids = match circlink_core::registry::resolve_in(&links, token) {
            Ok(ids) => ids,
            Err(_) if token.is_alias() => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        Ok(links
            .into_iter()
            .filter(|l| ids.contains(&l.id))
            .map(|link| {
                let status = self.status_of(&link);
                LinkView { link, status }
            })
            .collect())
    }

    // -- restart ------------------------------------------------------------

    /// Replace each stopped (or stale) link with a fresh one under a new id,
    /// one-shot options reset.
    pub fn restart(&self, token: LinkToken) -> Result<Vec<RestartOutcome>, LifecycleError> {
        let ids = self.registry.resolve_alias(token)?;

        let mut plan = Vec::with_capacity(ids.len());
        for id in ids {
            let link = self.registry.require(id)?;
            match self.status_of(&link) {
                EffectiveStatus::Stopped => plan.push((link, false)),
                EffectiveStatus::Stale => plan.push((link, true)),
                status => {
                    return Err(LifecycleError::InvalidState {
                        id,
                        status,
                        operation: "restart",
                    })
                }
            }
        }

        // Nothing is written until every entry has passed validation.
        for (link, stale) in &plan {
            if *stale {
                self.correct_to_stopped(link.id, link.process_handle)?;
            }
        }

        let mut outcomes = Vec::with_capacity(plan.len());
        for (old, _) in plan {
            self.clear_ids(&[old.id], false)?;
            let new = self.start_draft(old.to_restart_draft())?;
            tracing::info!(old = %old.id, new = %new.id, "link restarted");
            outcomes.push(RestartOutcome { old: old.id, new });
        }
        Ok(outcomes)
    }

    // -- clear --------------------------------------------------------------

    /// Remove entries. Without `force` every entry must be stopped; with it,
    /// entries are removed regardless of any watcher still running.
    pub fn clear(&self, token: LinkToken, force: bool) -> Result<Vec<LinkId>, LifecycleError> {
        let ids = self.registry.resolve_alias(token)?;
        self.clear_ids(&ids, force)?;
        Ok(ids)
    }

    /// [`Controller::clear`] for already-resolved ids.
    pub fn clear_ids(&self, ids: &[LinkId], force: bool) -> Result<(), LifecycleError> {
        if !force {
            for id in ids {
                let link = self.registry.require(*id)?;
                let status = self.status_of(&link);
                if status != EffectiveStatus::Stopped {
                    return Err(LifecycleError::ActiveLink { id: *id, status });
                }
            }
        }
        for id in ids {
            self.registry.remove(*id)?;
            if let Err(err) = remove_link_logs(self.registry.home(), *id) {
                tracing::warn!(link_id = %id, error = %err, "could not remove link logs");
            }
            tracing::info!(link_id = %id, force, "link cleared");
        }
        Ok(())
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Device paths are always relative to the device root.
fn device_relative(path: &Path) -> PathBuf {
    normalize(path)
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_resolves_dots() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize(Path::new("/a/../../b")), PathBuf::from("/b"));
    }

    #[test]
    fn device_relative_strips_root() {
        assert_eq!(device_relative(Path::new("/lib/x")), PathBuf::from("lib/x"));
        assert_eq!(device_relative(Path::new("")), PathBuf::new());
    }
}
