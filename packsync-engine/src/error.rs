//! Error types for packsync-engine.

use std::path::PathBuf;

use thiserror::Error;

use packsync_core::error::ConfigError;
use packsync_source::SourceError;

/// All errors that can arise from the integrity & cache store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (scope state file).
    #[error("scope state JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Stored blob bytes do not hash to the locally computed digest.
    #[error("content hash mismatch: expected {expected}, stored blob hashed to {actual}")]
    HashMismatch { expected: String, actual: String },

    /// Artifact byte count differs from the upstream-declared asset size.
    #[error("artifact size mismatch: upstream declared {declared} bytes, received {actual}")]
    SizeMismatch { declared: u64, actual: u64 },

    /// No record is active for the scope.
    #[error("no active pack record for scope '{scope}'")]
    NoActiveRecord { scope: String },

    /// No superseded record is available to roll back to.
    #[error("no previous pack record for scope '{scope}'")]
    NoPreviousRecord { scope: String },

    /// A record referenced by name/hash is not in the scope state.
    #[error("unknown pack record {hash} for scope '{scope}'")]
    UnknownRecord { scope: String, hash: String },
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

/// Errors surfaced by a reconciliation cycle.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An error from the upstream source client.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// An error from the integrity & cache store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An error from the configuration layer.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The cycle was cancelled by an administrative trigger.
    #[error("reconciliation cancelled")]
    Cancelled,

    /// A spawned blocking task failed to join.
    #[error("task join failure: {0}")]
    Join(String),
}
