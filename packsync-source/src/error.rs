//! Error types for packsync-source.

use thiserror::Error;

/// All errors that can arise from upstream release operations.
///
/// `RateLimited` is kept distinct from `Network` so the reconciler can apply
/// a longer backoff for quota exhaustion than for transient failures.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The repository or its latest release does not exist (HTTP 404).
    #[error("no published release found for {repo}")]
    NotFound { repo: String },

    /// Upstream API quota exhausted (403/429 with zero remaining requests).
    #[error("upstream rate limit exhausted{}", reset_hint(.reset_unix))]
    RateLimited { reset_unix: Option<u64> },

    /// Transport-level failure: unreachable host, TLS, timeout, 5xx.
    #[error("upstream network error: {0}")]
    Network(String),

    /// Download exceeded the caller-supplied byte bound.
    #[error("artifact exceeds download limit of {limit} bytes")]
    SizeExceeded { limit: u64 },

    /// The latest release carries no downloadable assets (or none matching
    /// the configured asset filter).
    #[error("release {tag} has no matching asset")]
    NoAsset { tag: String },

    /// The API response did not match the expected release schema.
    #[error("malformed release payload: {0}")]
    Malformed(String),

    /// The download's cancel flag flipped while streaming.
    #[error("download cancelled")]
    Cancelled,
}

fn reset_hint(reset_unix: &Option<u64>) -> String {
    match reset_unix {
        Some(at) => format!(" (resets at unix {at})"),
        None => String::new(),
    }
}
