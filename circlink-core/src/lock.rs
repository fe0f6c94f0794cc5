//! Inter-process registry lock.
//!
//! Uses flock(2) on a dedicated `registry.lock` file. The registry itself is
//! replaced by rename on every save, so the lock cannot live on it.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::thread::sleep;
use std::time::{Duration, Instant};

use crate::error::{io_err, RegistryError};

/// Upper bound on waiting for another process's critical section.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between lock attempts.
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// RAII guard that releases the flock when dropped.
#[derive(Debug)]
pub struct RegistryLock {
    file: File,
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        // SAFETY: flock with LOCK_UN is safe on a valid file descriptor
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

/// Acquire an exclusive lock on `path`, creating the file if needed.
pub fn acquire(path: &Path) -> Result<RegistryLock, RegistryError> {
    acquire_with_timeout(path, LOCK_TIMEOUT)
}

pub fn acquire_with_timeout(path: &Path, timeout: Duration) -> Result<RegistryLock, RegistryError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|e| io_err(path, e))?;
    let fd = file.as_raw_fd();
    let start = Instant::now();

    loop {
        // SAFETY: flock is safe on a valid file descriptor
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(RegistryLock { file });
        }

        let errno = io::Error::last_os_error();
        let raw_errno = errno.raw_os_error().unwrap_or(0);
        if raw_errno == libc::EINTR {
            continue;
        }
        if raw_errno != libc::EWOULDBLOCK && raw_errno != libc::EAGAIN {
            return Err(io_err(path, errno));
        }

        if start.elapsed() >= timeout {
            return Err(RegistryError::LockTimeout {
                path: path.to_path_buf(),
            });
        }
        sleep(LOCK_RETRY_INTERVAL);
    }
}
