use std::path::PathBuf;
use std::time::Duration;

use circlink_core::{EffectiveStatus, LinkId, RegistryError};
use circlink_detector::DetectError;
use circlink_sync::SyncError;
use thiserror::Error;

/// Failures inside a watcher process.
///
/// Everything raised before the watcher confirms `running` is recorded on the
/// link entry as `last_error` and reported to the front end as a startup
/// failure. Per-file mirror errors never surface here.
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Device(#[from] DetectError),

    #[error("could not wipe {dest}: {source}")]
    Wipe {
        dest: PathBuf,
        #[source]
        source: SyncError,
    },

    #[error("destination {dest} is not usable: {reason}")]
    Destination { dest: PathBuf, reason: String },

    #[error("presave failed: {0}")]
    Presave(#[source] SyncError),

    #[error("pattern error: {0}")]
    Pattern(#[source] SyncError),

    #[error("pattern '{pattern}' matched no files")]
    EmptyPattern { pattern: PathBuf },

    #[error("link {id} is no longer in the registry")]
    LinkMissing { id: LinkId },

    #[error("link {id} was stopped before it finished starting")]
    Cancelled { id: LinkId },

    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Error surface of the lifecycle controller. Every variant aborts the
/// requested command.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("no link matches '{token}'")]
    NotFound { token: String },

    #[error("cannot {operation} link {id}: it is {status}")]
    InvalidState {
        id: LinkId,
        status: EffectiveStatus,
        operation: &'static str,
    },

    #[error("link {id} is {status}; stop it first or pass --force")]
    ActiveLink { id: LinkId, status: EffectiveStatus },

    #[error(transparent)]
    DeviceNotFound(DetectError),

    #[error("link {id} failed to start: {reason}")]
    Startup { id: LinkId, reason: String },

    #[error("link {id} did not stop within {}ms", waited.as_millis())]
    ShutdownTimeout { id: LinkId, waited: Duration },

    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("registry error: {0}")]
    Registry(RegistryError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<RegistryError> for LifecycleError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound { token } => LifecycleError::NotFound { token },
            other => LifecycleError::Registry(other),
        }
    }
}

impl From<DetectError> for LifecycleError {
    fn from(err: DetectError) -> Self {
        match err {
            DetectError::Io { path, source } => LifecycleError::Io { path, source },
            not_found => LifecycleError::DeviceNotFound(not_found),
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> LifecycleError {
    LifecycleError::Io {
        path: path.into(),
        source,
    }
}
