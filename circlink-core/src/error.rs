//! Error types for circlink-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from registry and settings operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, still failing after every read retry was exhausted.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`; cannot locate `~/.circlink/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// An id or alias resolved to an empty set of links.
    #[error("no link matches '{token}'")]
    NotFound { token: String },

    /// A token that is neither `all`, `last`, nor a positive integer.
    #[error("invalid link token '{token}'; expected a link id, \"last\", or \"all\"")]
    InvalidToken { token: String },

    /// Another process held the registry lock for longer than the bounded wait.
    #[error("timed out waiting for registry lock at {path}")]
    LockTimeout { path: PathBuf },

    /// `config edit` targeted a key that does not exist or cannot hold the value.
    #[error("setting '{key}': {reason}")]
    Setting { key: String, reason: String },
}

/// Convenience constructor for [`RegistryError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RegistryError {
    RegistryError::Io {
        path: path.into(),
        source,
    }
}
