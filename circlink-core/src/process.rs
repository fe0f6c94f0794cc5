//! PID liveness checks and graceful-stop signalling for watcher processes.
//!
//! A pid stored in the registry can outlive its watcher (crash, reboot) and be
//! handed to an unrelated process, so "alive" alone never identifies a
//! watcher: [`is_watcher`] also checks the process's command line.

use std::io;
use std::path::Path;

use crate::types::LinkId;

/// `true` if `pid` names a live (non-zombie) process.
pub fn is_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    // SAFETY: signal 0 performs permission and existence checks only
    let result = unsafe { libc::kill(raw, 0) };
    if result != 0 {
        // EPERM: the process exists but belongs to someone else.
        return io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);
    }
    !is_zombie(pid)
}

/// `true` if `pid` is alive and is the watcher for link `id` under `home`,
/// i.e. its command line ends in `watch <id> --home <home>`.
pub fn is_watcher(pid: u32, home: &Path, id: LinkId) -> bool {
    is_alive(pid)
        && command_line(pid).is_some_and(|cmdline| is_watcher_command(&cmdline, home, id))
}

/// Matches the argument tail that `circlink start` spawns watchers with.
pub fn is_watcher_command(cmdline: &str, home: &Path, id: LinkId) -> bool {
    let tail = format!(" watch {id} --home {}", home.display());
    cmdline.trim_end().ends_with(&tail)
}

/// Space-joined argv of `pid`.
#[cfg(target_os = "linux")]
fn command_line(pid: u32) -> Option<String> {
    let raw = std::fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    let args: Vec<String> = raw
        .split(|b| *b == 0)
        .filter(|arg| !arg.is_empty())
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect();
    (!args.is_empty()).then(|| args.join(" "))
}

#[cfg(not(target_os = "linux"))]
fn command_line(pid: u32) -> Option<String> {
    let output = std::process::Command::new("ps")
        .args(["-ww", "-o", "command=", "-p", &pid.to_string()])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let line = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!line.is_empty()).then_some(line)
}

/// Ask the watcher with `pid` to shut down (SIGTERM).
pub fn send_terminate(pid: u32) -> io::Result<()> {
    let raw = i32::try_from(pid).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    if raw <= 0 {
        return Err(io::Error::from(io::ErrorKind::InvalidInput));
    }
    // SAFETY: kill has no memory-safety preconditions
    let result = unsafe { libc::kill(raw, libc::SIGTERM) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// An exited child nobody has reaped still answers `kill(pid, 0)`.
#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // Format: `pid (comm) state ...`; comm may contain spaces or parentheses.
    stat.rfind(')')
        .and_then(|end| stat[end + 1..].split_whitespace().next())
        .map(|state| state == "Z" || state == "X")
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}
