//! # packsync-source
//!
//! Artifact source client: upstream release discovery and size-bounded
//! artifact download.
//!
//! [`ReleaseSource`] is the provider seam — one implementation per release
//! host, selected at configuration time. [`GithubClient`] is the GitHub
//! releases implementation.

pub mod error;
pub mod github;

use std::sync::atomic::AtomicBool;

use packsync_core::config::RepoRef;
use packsync_core::types::ReleaseDescriptor;

pub use error::SourceError;
pub use github::GithubClient;

/// Capability interface over a release-hosting provider.
///
/// Implementations are blocking; callers on an async runtime wrap them in
/// `spawn_blocking`.
pub trait ReleaseSource: Send + Sync {
    /// Resolve the latest published release for `repo`.
    ///
    /// `asset_filter` selects the artifact by exact file name; the first
    /// listed asset is used when `None`.
    fn fetch_latest(
        &self,
        repo: &RepoRef,
        asset_filter: Option<&str>,
    ) -> Result<ReleaseDescriptor, SourceError>;

    /// Download the descriptor's artifact into memory.
    ///
    /// Aborts with [`SourceError::SizeExceeded`] past `max_bytes` and with
    /// [`SourceError::Cancelled`] when `cancel` flips while streaming.
    fn download(
        &self,
        descriptor: &ReleaseDescriptor,
        max_bytes: u64,
        cancel: &AtomicBool,
    ) -> Result<Vec<u8>, SourceError>;
}
