//! Link runtime: the per-link watcher process and the lifecycle controller
//! that starts, stops, restarts, and clears them.

mod error;
pub mod lifecycle;
pub mod log_rotation;
pub mod process;
mod runtime;

pub use error::{LifecycleError, WatcherError};
pub use lifecycle::{Controller, LinkView, RestartOutcome, StartRequest, StopOutcome};
pub use process::{ProcessControl, SystemProcesses};
pub use runtime::{
    boot, heartbeat, release, resolve_destination, run, start_blocking, CycleReport, LinkWatcher,
    WatcherPhase,
};
