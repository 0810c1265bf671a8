/// Error taxonomy for the tailing engine.
///
/// Steady-state failures (`FetchError`, `CheckpointError`) are contained
/// inside a single poll tick. Only `ConfigError` is fatal, and only before
/// any session has started.

use std::path::PathBuf;

/// Failure of a size probe, range fetch or directory listing.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Connection-level failure: refused, reset, DNS, timeout.
    #[error("resource unreachable: {0}")]
    Unreachable(String),

    /// The server answered with a status outside the 2xx family.
    #[error("unexpected response status {status}")]
    Unexpected { status: u16 },

    /// A 2xx answer without a usable `Content-Length`.
    #[error("response carries no usable Content-Length header")]
    MissingLength,
}

impl FetchError {
    /// Connection-level failures go through the fixed-delay backoff path,
    /// everything else skips the tick.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, FetchError::Unreachable(_))
    }
}

/// Failure of the durable offset store.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("cannot write checkpoint {path}: {source}")]
    Unwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read checkpoint {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint {path} does not hold a decimal offset: {contents:?}")]
    Corrupt { path: PathBuf, contents: String },

    #[error("checkpoint path {0} is a directory")]
    IsDirectory(PathBuf),
}

/// Fatal startup error, surfaced before any session runs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("checkpoint {0} would be shared by more than one resource")]
    DuplicateCheckpoint(PathBuf),

    #[error("cannot start tailing {locator}: {reason}")]
    Startup { locator: String, reason: String },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}
