//! Domain types for the PackSync engine.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! All types are serializable/deserializable via serde.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed identifier for a distribution scope.
///
/// `global` for the proxy-wide pack, or a backend-server name for a
/// per-server pack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId(pub String);

impl ScopeId {
    /// The proxy-wide default scope.
    pub fn global() -> Self {
        Self("global".to_owned())
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ScopeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ScopeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed identifier for a connected client session.
///
/// Opaque to the engine; the proxy layer owns the session's actual lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A lowercase-hex SHA-256 digest of pack bytes.
///
/// Only constructed by hashing bytes locally ([`ContentHash::of`]) or by
/// parsing persisted state — never taken from an upstream descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
    /// Compute the SHA-256 digest of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// Short prefix for log lines and table cells.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// How a session speaks to the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolClass {
    /// Java-edition client speaking the native protocol.
    #[default]
    Native,
    /// Client joined through a Bedrock translation layer (Geyser/Floodgate).
    Translated,
}

impl fmt::Display for ProtocolClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolClass::Native => write!(f, "native"),
            ProtocolClass::Translated => write!(f, "translated"),
        }
    }
}

/// Terminal result of one delivery attempt cycle for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushResult {
    /// Session acknowledged the pack (or already had it applied).
    Accepted,
    /// Session explicitly declined; never retried.
    Rejected,
    /// No acknowledgement within the attempt budget.
    TimedOut,
    /// Capability resolver excluded the session from delivery.
    SkippedIncompatible,
}

impl fmt::Display for PushResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushResult::Accepted => write!(f, "accepted"),
            PushResult::Rejected => write!(f, "rejected"),
            PushResult::TimedOut => write!(f, "timed_out"),
            PushResult::SkippedIncompatible => write!(f, "skipped_incompatible"),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// The latest published artifact as reported by the upstream release API.
///
/// Immutable once fetched. `size_bytes` is upstream-declared and only used
/// as a pre-download sanity bound, never as an integrity claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
    /// Release tag, e.g. `v2.4.0`.
    pub tag: String,
    pub download_url: String,
    pub asset_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    pub published_at: DateTime<Utc>,
}

/// A committed pack artifact: bytes on disk plus locally computed digest.
///
/// Exactly one record per scope is active at any time. Superseded records
/// are retained for rollback until the prune policy removes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackRecord {
    pub version: String,
    pub content_hash: ContentHash,
    pub size_bytes: u64,
    /// Public URL clients fetch the pack from (the release asset URL).
    pub source_url: String,
    /// Absolute path of the stored blob.
    pub storage_path: PathBuf,
    /// Whether Translated sessions may receive this pack.
    #[serde(default)]
    pub cross_platform: bool,
    pub committed_at: DateTime<Utc>,
    /// Set when the record becomes the active one for its scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
}

/// Delivery-side view of a connected session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSession {
    pub session_id: SessionId,
    pub protocol_class: ProtocolClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_applied_hash: Option<ContentHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_push_attempt_at: Option<DateTime<Utc>>,
}

impl ClientSession {
    pub fn new(session_id: SessionId, protocol_class: ProtocolClass) -> Self {
        Self {
            session_id,
            protocol_class,
            last_applied_hash: None,
            last_push_attempt_at: None,
        }
    }
}

/// Outcome of one push cycle; consumed by the notification emitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOutcome {
    pub session_id: SessionId,
    pub result: PushResult,
    pub observed_at: DateTime<Utc>,
}

impl PushOutcome {
    pub fn now(session_id: SessionId, result: PushResult) -> Self {
        Self {
            session_id,
            result,
            observed_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
