//! circlink core library: link types, the shared link registry, settings.
//!
//! - [`types`]: link records, ids, alias tokens, derived status
//! - [`error`]: [`RegistryError`]
//! - [`registry`]: file-backed, flock-serialised link registry
//! - [`settings`]: `settings.yaml` load / save / dotted-key edits
//! - [`paths`]: on-disk layout under `~/.circlink/`
//! - [`process`]: PID liveness checks and graceful-stop signal

pub mod error;
pub mod lock;
pub mod paths;
pub mod process;
pub mod registry;
pub mod settings;
pub mod types;

pub use error::RegistryError;
pub use registry::Registry;
pub use settings::Settings;
pub use types::{
    Destination, EffectiveStatus, Link, LinkDraft, LinkId, LinkOptions, LinkStatus, LinkToken,
    SourcePattern,
};
