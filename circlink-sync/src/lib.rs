//! # circlink-sync
//!
//! Pattern expansion, snapshot diffing, and the mirror writer.
//!
//! A watcher calls [`resolver::resolve`] each cycle, turns the result into a
//! [`diff::Snapshot`], diffs it against the previous one, and hands the
//! [`diff::ChangeSet`] to [`writer`].

pub mod diff;
pub mod error;
pub mod resolver;
pub mod writer;

pub use diff::{diff, snapshot, ChangeSet, FileStamp, Snapshot};
pub use error::SyncError;
pub use resolver::resolve;
pub use writer::{mirror, remove_mirrored, wipe, MirrorResult};
