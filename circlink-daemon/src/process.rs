//! Spawning and signalling watcher processes.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

use circlink_core::{
    paths::{link_log_path, logs_dir},
    process, LinkId,
};

use crate::error::{io_err, LifecycleError};
use crate::log_rotation::rotate_link_log;

/// The operating-system side of the lifecycle controller.
pub trait ProcessControl {
    /// Launch the watcher for link `id` and return its pid. Must not wait for
    /// the watcher to finish initialising.
    fn spawn_watcher(&self, home: &Path, id: LinkId) -> Result<u32, LifecycleError>;

    fn is_alive(&self, pid: u32) -> bool;

    /// `is_alive`, plus the process really is the watcher of link `id` under
    /// `home`. Recorded pids are only trusted through this.
    fn is_watcher(&self, home: &Path, id: LinkId, pid: u32) -> bool;

    /// Graceful stop request (SIGTERM).
    fn request_stop(&self, pid: u32) -> std::io::Result<()>;
}

/// Real processes: re-executes the `circlink` binary as
/// `circlink watch <id> --home <home>`, detached into its own process group
/// with stdout/stderr appended to `logs/link<id>.log`.
#[derive(Debug)]
pub struct SystemProcesses {
    executable: PathBuf,
    children: Mutex<HashMap<u32, Child>>,
}

impl SystemProcesses {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn watchers from the currently running binary.
    pub fn current_exe() -> Result<Self, LifecycleError> {
        let exe = std::env::current_exe().map_err(|e| io_err("current_exe", e))?;
        Ok(Self::new(exe))
    }
}

impl ProcessControl for SystemProcesses {
    fn spawn_watcher(&self, home: &Path, id: LinkId) -> Result<u32, LifecycleError> {
        let logs = logs_dir(home);
        fs::create_dir_all(&logs).map_err(|e| io_err(&logs, e))?;
        rotate_link_log(home, id);

        let log_path = link_log_path(home, id);
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| io_err(&log_path, e))?;
        let stderr = stdout.try_clone().map_err(|e| io_err(&log_path, e))?;

        let child = Command::new(&self.executable)
            .arg("watch")
            .arg(id.to_string())
            .arg("--home")
            .arg(home)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .process_group(0)
            .spawn()
            .map_err(|e| io_err(&self.executable, e))?;

        let pid = child.id();
        tracing::debug!(link_id = %id, pid, "watcher spawned");
        self.children
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(pid, child);
        Ok(pid)
    }

    fn is_alive(&self, pid: u32) -> bool {
        let mut children = self
            .children
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Our own children must be reaped, or they linger as zombies.
        if let Some(child) = children.get_mut(&pid) {
            match child.try_wait() {
                Ok(Some(_)) => {
                    children.remove(&pid);
                    return false;
                }
                Ok(None) => return true,
                Err(_) => {}
            }
        }
        process::is_alive(pid)
    }

    fn is_watcher(&self, home: &Path, id: LinkId, pid: u32) -> bool {
        let spawned_here = self
            .children
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(&pid);
        if spawned_here {
            // Between fork and exec the child still shows our own argv.
            return self.is_alive(pid);
        }
        process::is_watcher(pid, home, id)
    }

    fn request_stop(&self, pid: u32) -> std::io::Result<()> {
        process::send_terminate(pid)
    }
}
