//! GitHub releases client.
//!
//! Queries `GET /repos/{owner}/{repo}/releases/latest` and downloads the
//! selected asset through a size-bounded, cancellable chunk loop. The
//! upstream-declared asset size is only a pre-download sanity bound; the
//! integrity store recomputes the content hash from the bytes itself.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use packsync_core::config::RepoRef;
use packsync_core::types::ReleaseDescriptor;

use crate::error::SourceError;
use crate::ReleaseSource;

const DEFAULT_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("packsync/", env!("CARGO_PKG_VERSION"));
const DOWNLOAD_CHUNK: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Wire schema
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ReleaseJson {
    tag_name: String,
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    assets: Vec<AssetJson>,
}

#[derive(Debug, Deserialize)]
struct AssetJson {
    name: String,
    browser_download_url: String,
    size: u64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Blocking GitHub releases API client.
pub struct GithubClient {
    agent: ureq::Agent,
    api_base: String,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(token: Option<String>) -> Self {
        Self::with_api_base(DEFAULT_API_BASE, token)
    }

    /// Point the client at a different API base URL (tests).
    pub fn with_api_base(api_base: impl Into<String>, token: Option<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(Duration::from_secs(60))
            .user_agent(USER_AGENT)
            .build();
        Self {
            agent,
            api_base: api_base.into(),
            token,
        }
    }

    fn latest_release_url(&self, repo: &RepoRef) -> String {
        format!(
            "{}/repos/{}/{}/releases/latest",
            self.api_base, repo.owner, repo.name
        )
    }

    fn apply_auth(&self, request: ureq::Request) -> ureq::Request {
        match &self.token {
            Some(token) => request.set("Authorization", &format!("Bearer {token}")),
            None => request,
        }
    }
}

impl ReleaseSource for GithubClient {
    fn fetch_latest(
        &self,
        repo: &RepoRef,
        asset_filter: Option<&str>,
    ) -> Result<ReleaseDescriptor, SourceError> {
        let url = self.latest_release_url(repo);
        tracing::debug!(repo = %repo, url = %url, "querying latest release");

        let request = self
            .apply_auth(self.agent.get(&url))
            .set("Accept", "application/vnd.github+json");

        let response = match request.call() {
            Ok(response) => response,
            Err(err) => return Err(classify_error(repo, err)),
        };

        let release: ReleaseJson = response
            .into_json()
            .map_err(|e| SourceError::Malformed(e.to_string()))?;
        descriptor_from_release(release, asset_filter)
    }

    fn download(
        &self,
        descriptor: &ReleaseDescriptor,
        max_bytes: u64,
        cancel: &AtomicBool,
    ) -> Result<Vec<u8>, SourceError> {
        // Upstream-declared size is a cheap early bound; the byte-counting
        // loop below is the real guard.
        if let Some(declared) = descriptor.size_bytes {
            if declared > max_bytes {
                return Err(SourceError::SizeExceeded { limit: max_bytes });
            }
        }

        tracing::debug!(
            tag = %descriptor.tag,
            url = %descriptor.download_url,
            "downloading release asset",
        );

        let response = match self.apply_auth(self.agent.get(&descriptor.download_url)).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => {
                return Err(SourceError::Network(format!(
                    "asset download returned HTTP {code}"
                )))
            }
            Err(err) => return Err(SourceError::Network(err.to_string())),
        };

        read_bounded(response.into_reader(), max_bytes, cancel)
    }
}

// ---------------------------------------------------------------------------
// Pure helpers (unit-tested without the network)
// ---------------------------------------------------------------------------

fn descriptor_from_release(
    release: ReleaseJson,
    asset_filter: Option<&str>,
) -> Result<ReleaseDescriptor, SourceError> {
    let tag = release.tag_name;
    let asset = match asset_filter {
        Some(name) => release.assets.into_iter().find(|a| a.name == name),
        None => release.assets.into_iter().next(),
    };
    let Some(asset) = asset else {
        return Err(SourceError::NoAsset { tag });
    };

    Ok(ReleaseDescriptor {
        tag,
        download_url: asset.browser_download_url,
        asset_name: asset.name,
        size_bytes: Some(asset.size),
        published_at: release.published_at.unwrap_or_else(Utc::now),
    })
}

fn classify_error(repo: &RepoRef, err: ureq::Error) -> SourceError {
    match err {
        ureq::Error::Status(404, _) => SourceError::NotFound {
            repo: repo.to_string(),
        },
        ureq::Error::Status(code @ (403 | 429), response) => {
            let remaining = response
                .header("x-ratelimit-remaining")
                .and_then(|v| v.parse::<u64>().ok());
            let reset_unix = response
                .header("x-ratelimit-reset")
                .and_then(|v| v.parse::<u64>().ok());
            // 429 is always quota exhaustion; 403 only when the quota header
            // confirms it (GitHub also uses 403 for permission failures).
            if code == 429 || remaining == Some(0) {
                SourceError::RateLimited { reset_unix }
            } else {
                SourceError::Network(format!("release query returned HTTP {code}"))
            }
        }
        ureq::Error::Status(code, _) => {
            SourceError::Network(format!("release query returned HTTP {code}"))
        }
        ureq::Error::Transport(transport) => SourceError::Network(transport.to_string()),
    }
}

/// Read `reader` to a Vec, failing past `max_bytes` or on cancellation.
fn read_bounded(
    mut reader: impl Read,
    max_bytes: u64,
    cancel: &AtomicBool,
) -> Result<Vec<u8>, SourceError> {
    let mut bytes = Vec::new();
    let mut chunk = [0u8; DOWNLOAD_CHUNK];
    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(SourceError::Cancelled);
        }
        let read = reader
            .read(&mut chunk)
            .map_err(|e| SourceError::Network(e.to_string()))?;
        if read == 0 {
            return Ok(bytes);
        }
        if bytes.len() as u64 + read as u64 > max_bytes {
            return Err(SourceError::SizeExceeded { limit: max_bytes });
        }
        bytes.extend_from_slice(&chunk[..read]);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
