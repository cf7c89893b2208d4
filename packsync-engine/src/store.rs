//! Integrity & cache store — content-addressed pack blobs plus a JSON
//! state document per scope.
//!
//! # Storage layout
//!
//! ```text
//! ~/.packsync/
//!   packs/
//!     <scope>/
//!       state.json     (records + active hash — atomic .tmp + rename)
//!       <hash>.pack    (artifact blob, named by its SHA-256 digest)
//! ```
//!
//! `commit_at` always computes the digest from the bytes it was handed and
//! verifies the blob it wrote back off disk; an upstream-declared hash is
//! never trusted. Activation rewrites the whole state document atomically,
//! so readers never observe a half-written record.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use packsync_core::types::{ContentHash, PackRecord, ReleaseDescriptor, ScopeId};

use crate::error::{io_err, StoreError};

// ---------------------------------------------------------------------------
// State document
// ---------------------------------------------------------------------------

/// On-disk scope state payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScopeStateFile {
    pub updated_at: DateTime<Utc>,
    /// Hash of the active record, if any. At most one record is active.
    pub active: Option<ContentHash>,
    /// Commit-ordered records, oldest first.
    pub records: Vec<PackRecord>,
}

impl ScopeStateFile {
    fn empty() -> Self {
        Self {
            updated_at: Utc::now(),
            active: None,
            records: Vec::new(),
        }
    }

    fn record(&self, hash: &ContentHash) -> Option<&PackRecord> {
        self.records.iter().find(|r| &r.content_hash == hash)
    }

    fn record_mut(&mut self, hash: &ContentHash) -> Option<&mut PackRecord> {
        self.records.iter_mut().find(|r| &r.content_hash == hash)
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.packsync/packs/<scope>/` — pure, no I/O.
pub fn scope_dir_at(home: &Path, scope: &ScopeId) -> PathBuf {
    home.join(".packsync").join("packs").join(&scope.0)
}

/// `<home>/.packsync/packs/<scope>/state.json` — pure, no I/O.
pub fn state_path_at(home: &Path, scope: &ScopeId) -> PathBuf {
    scope_dir_at(home, scope).join("state.json")
}

/// `<home>/.packsync/packs/<scope>/<hash>.pack` — pure, no I/O.
pub fn blob_path_at(home: &Path, scope: &ScopeId, hash: &ContentHash) -> PathBuf {
    scope_dir_at(home, scope).join(format!("{hash}.pack"))
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load the state document for `scope`.
///
/// Returns an empty document if the file does not yet exist.
pub fn load_state_at(home: &Path, scope: &ScopeId) -> Result<ScopeStateFile, StoreError> {
    let path = state_path_at(home, scope);
    if !path.exists() {
        return Ok(ScopeStateFile::empty());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Save the state document for `scope` atomically.
///
/// Writes to `<path>.tmp` then renames to `<path>`.
pub fn save_state_at(
    home: &Path,
    scope: &ScopeId,
    state: &ScopeStateFile,
) -> Result<(), StoreError> {
    let path = state_path_at(home, scope);
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid state path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// Commit downloaded artifact bytes as an (inactive) pack record.
///
/// Flow: hash bytes → check declared size → write blob `.tmp` + rename →
/// re-read and re-hash the stored blob → append record → save state.
/// On verification failure the blob is removed and the state stays untouched.
///
/// Committing bytes whose hash is already recorded returns the existing
/// record unchanged (the blob is content-addressed).
pub fn commit_at(
    home: &Path,
    scope: &ScopeId,
    bytes: &[u8],
    descriptor: &ReleaseDescriptor,
    cross_platform: bool,
) -> Result<PackRecord, StoreError> {
    if let Some(declared) = descriptor.size_bytes {
        if declared != bytes.len() as u64 {
            return Err(StoreError::SizeMismatch {
                declared,
                actual: bytes.len() as u64,
            });
        }
    }

    let hash = ContentHash::of(bytes);
    let mut state = load_state_at(home, scope)?;
    if let Some(existing) = state.record(&hash) {
        tracing::debug!(scope = %scope, hash = %hash.short(), "bytes already committed");
        return Ok(existing.clone());
    }

    let blob = blob_path_at(home, scope, &hash);
    let Some(dir) = blob.parent() else {
        return Err(io_err(blob, std::io::Error::other("invalid blob path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let tmp = blob.with_extension("pack.tmp");
    std::fs::write(&tmp, bytes).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &blob).map_err(|e| io_err(&blob, e))?;

    // Verify what actually landed on disk, not what we meant to write.
    let stored = std::fs::read(&blob).map_err(|e| io_err(&blob, e))?;
    let stored_hash = ContentHash::of(&stored);
    if stored_hash != hash {
        let _ = std::fs::remove_file(&blob);
        return Err(StoreError::HashMismatch {
            expected: hash.0,
            actual: stored_hash.0,
        });
    }

    let record = PackRecord {
        version: descriptor.tag.clone(),
        content_hash: hash,
        size_bytes: bytes.len() as u64,
        source_url: descriptor.download_url.clone(),
        storage_path: blob,
        cross_platform,
        committed_at: Utc::now(),
        activated_at: None,
    };
    state.records.push(record.clone());
    state.updated_at = Utc::now();
    save_state_at(home, scope, &state)?;

    tracing::info!(
        scope = %scope,
        version = %record.version,
        hash = %record.content_hash.short(),
        size = record.size_bytes,
        "committed pack record",
    );
    Ok(record)
}

// ---------------------------------------------------------------------------
// Activation / lookup
// ---------------------------------------------------------------------------

/// Mark the record with `hash` as the active one for `scope`.
///
/// Stamps `activated_at` and rewrites the state document atomically.
pub fn activate_at(
    home: &Path,
    scope: &ScopeId,
    hash: &ContentHash,
) -> Result<PackRecord, StoreError> {
    let mut state = load_state_at(home, scope)?;
    let Some(record) = state.record_mut(hash) else {
        return Err(StoreError::UnknownRecord {
            scope: scope.0.clone(),
            hash: hash.0.clone(),
        });
    };
    record.activated_at = Some(Utc::now());
    let activated = record.clone();

    state.active = Some(hash.clone());
    state.updated_at = Utc::now();
    save_state_at(home, scope, &state)?;

    tracing::info!(
        scope = %scope,
        version = %activated.version,
        hash = %activated.content_hash.short(),
        "activated pack record",
    );
    Ok(activated)
}

/// The currently active record for `scope`.
pub fn active_record_at(home: &Path, scope: &ScopeId) -> Result<PackRecord, StoreError> {
    let state = load_state_at(home, scope)?;
    let Some(hash) = &state.active else {
        return Err(StoreError::NoActiveRecord {
            scope: scope.0.clone(),
        });
    };
    state
        .record(hash)
        .cloned()
        .ok_or_else(|| StoreError::UnknownRecord {
            scope: scope.0.clone(),
            hash: hash.0.clone(),
        })
}

/// The most recently superseded record (rollback target).
pub fn previous_record_at(home: &Path, scope: &ScopeId) -> Result<PackRecord, StoreError> {
    let state = load_state_at(home, scope)?;
    state
        .records
        .iter()
        .filter(|r| Some(&r.content_hash) != state.active.as_ref())
        .filter(|r| r.activated_at.is_some())
        .max_by_key(|r| r.activated_at)
        .cloned()
        .ok_or_else(|| StoreError::NoPreviousRecord {
            scope: scope.0.clone(),
        })
}

/// Re-activate the previous record, superseding the current one.
pub fn rollback_at(home: &Path, scope: &ScopeId) -> Result<PackRecord, StoreError> {
    let previous = previous_record_at(home, scope)?;
    activate_at(home, scope, &previous.content_hash)
}

// ---------------------------------------------------------------------------
// Prune
// ---------------------------------------------------------------------------

/// Drop superseded records past the retention bound.
///
/// The active record and the rollback target always survive; beyond those,
/// the `keep` most recently committed records are retained. Blobs of dropped
/// records are deleted best-effort.
///
/// Returns the hashes that were pruned.
pub fn prune_at(home: &Path, scope: &ScopeId, keep: usize) -> Result<Vec<ContentHash>, StoreError> {
    let mut state = load_state_at(home, scope)?;
    let previous = previous_record_at(home, scope).ok();

    let mut candidates: Vec<PackRecord> = state
        .records
        .iter()
        .filter(|r| Some(&r.content_hash) != state.active.as_ref())
        .filter(|r| previous.as_ref().map(|p| &p.content_hash) != Some(&r.content_hash))
        .cloned()
        .collect();
    candidates.sort_by_key(|r| r.committed_at);
    candidates.reverse(); // newest first

    let doomed: Vec<PackRecord> = candidates.into_iter().skip(keep).collect();
    if doomed.is_empty() {
        return Ok(Vec::new());
    }

    let doomed_hashes: Vec<ContentHash> =
        doomed.iter().map(|r| r.content_hash.clone()).collect();
    state
        .records
        .retain(|r| !doomed_hashes.contains(&r.content_hash));
    state.updated_at = Utc::now();
    save_state_at(home, scope, &state)?;

    for record in &doomed {
        if let Err(err) = std::fs::remove_file(&record.storage_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %record.storage_path.display(),
                    error = %err,
                    "failed to delete pruned pack blob",
                );
            }
        }
    }

    tracing::debug!(scope = %scope, pruned = doomed_hashes.len(), "pruned pack records");
    Ok(doomed_hashes)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn descriptor(tag: &str, size: Option<u64>) -> ReleaseDescriptor {
        ReleaseDescriptor {
            tag: tag.to_owned(),
            download_url: format!("https://example.invalid/{tag}/pack.zip"),
            asset_name: "pack.zip".to_owned(),
            size_bytes: size,
            published_at: Utc::now(),
        }
    }

    fn scope() -> ScopeId {
        ScopeId::global()
    }

    #[test]
    fn empty_state_when_file_missing() {
        let home = TempDir::new().unwrap();
        let state = load_state_at(home.path(), &scope()).unwrap();
        assert!(state.records.is_empty());
        assert!(state.active.is_none());
    }

    #[test]
    fn commit_computes_hash_locally_and_writes_blob() {
        let home = TempDir::new().unwrap();
        let bytes = b"pack-bytes-v1";
        let record = commit_at(home.path(), &scope(), bytes, &descriptor("v1.0.0", None), false)
            .expect("commit");

        assert_eq!(record.content_hash, ContentHash::of(bytes));
        assert_eq!(record.size_bytes, bytes.len() as u64);
        assert!(record.activated_at.is_none());
        assert_eq!(std::fs::read(&record.storage_path).unwrap(), bytes);
    }

    #[test]
    fn commit_rejects_declared_size_mismatch() {
        let home = TempDir::new().unwrap();
        let err = commit_at(
            home.path(),
            &scope(),
            b"short",
            &descriptor("v1.0.0", Some(999)),
            false,
        )
        .expect_err("should fail");
        assert!(matches!(
            err,
            StoreError::SizeMismatch {
                declared: 999,
                actual: 5
            }
        ));
        // Failed commit must leave no record behind.
        let state = load_state_at(home.path(), &scope()).unwrap();
        assert!(state.records.is_empty());
    }

    #[test]
    fn commit_same_bytes_twice_is_idempotent() {
        let home = TempDir::new().unwrap();
        let first = commit_at(home.path(), &scope(), b"bytes", &descriptor("v1", None), false)
            .expect("first");
        let second = commit_at(home.path(), &scope(), b"bytes", &descriptor("v2", None), false)
            .expect("second");
        assert_eq!(first, second, "same content must map to one record");
        assert_eq!(load_state_at(home.path(), &scope()).unwrap().records.len(), 1);
    }

    #[test]
    fn activate_sets_active_and_timestamp() {
        let home = TempDir::new().unwrap();
        let record =
            commit_at(home.path(), &scope(), b"v1", &descriptor("v1.0.0", None), false).unwrap();
        let activated = activate_at(home.path(), &scope(), &record.content_hash).unwrap();

        assert!(activated.activated_at.is_some());
        let active = active_record_at(home.path(), &scope()).unwrap();
        assert_eq!(active.content_hash, record.content_hash);
        assert_eq!(active.version, "v1.0.0");
    }

    #[test]
    fn active_record_missing_is_error() {
        let home = TempDir::new().unwrap();
        let err = active_record_at(home.path(), &scope()).expect_err("should fail");
        assert!(matches!(err, StoreError::NoActiveRecord { .. }));
    }

    #[test]
    fn activate_unknown_hash_is_error() {
        let home = TempDir::new().unwrap();
        let err = activate_at(home.path(), &scope(), &ContentHash::of(b"ghost"))
            .expect_err("should fail");
        assert!(matches!(err, StoreError::UnknownRecord { .. }));
    }

    #[test]
    fn previous_record_is_most_recently_superseded() {
        let home = TempDir::new().unwrap();
        let s = scope();
        for (tag, bytes) in [("v1", b"one".as_slice()), ("v2", b"two"), ("v3", b"tri")] {
            let record = commit_at(home.path(), &s, bytes, &descriptor(tag, None), false).unwrap();
            activate_at(home.path(), &s, &record.content_hash).unwrap();
        }

        assert_eq!(active_record_at(home.path(), &s).unwrap().version, "v3");
        assert_eq!(previous_record_at(home.path(), &s).unwrap().version, "v2");
    }

    #[test]
    fn rollback_swaps_active_to_previous() {
        let home = TempDir::new().unwrap();
        let s = scope();
        for (tag, bytes) in [("v1", b"one".as_slice()), ("v2", b"two")] {
            let record = commit_at(home.path(), &s, bytes, &descriptor(tag, None), false).unwrap();
            activate_at(home.path(), &s, &record.content_hash).unwrap();
        }

        let rolled = rollback_at(home.path(), &s).unwrap();
        assert_eq!(rolled.version, "v1");
        assert_eq!(active_record_at(home.path(), &s).unwrap().version, "v1");
        // v2 is now the rollback target.
        assert_eq!(previous_record_at(home.path(), &s).unwrap().version, "v2");
    }

    #[test]
    fn rollback_without_history_is_error() {
        let home = TempDir::new().unwrap();
        let record =
            commit_at(home.path(), &scope(), b"only", &descriptor("v1", None), false).unwrap();
        activate_at(home.path(), &scope(), &record.content_hash).unwrap();

        let err = rollback_at(home.path(), &scope()).expect_err("should fail");
        assert!(matches!(err, StoreError::NoPreviousRecord { .. }));
    }

    #[test]
    fn prune_keeps_active_and_previous() {
        let home = TempDir::new().unwrap();
        let s = scope();
        let mut paths = Vec::new();
        for (tag, bytes) in [
            ("v1", b"aa".as_slice()),
            ("v2", b"bb"),
            ("v3", b"cc"),
            ("v4", b"dd"),
        ] {
            let record = commit_at(home.path(), &s, bytes, &descriptor(tag, None), false).unwrap();
            activate_at(home.path(), &s, &record.content_hash).unwrap();
            paths.push(record.storage_path.clone());
        }

        let pruned = prune_at(home.path(), &s, 0).unwrap();
        assert_eq!(pruned.len(), 2, "v1 and v2 should be pruned");

        let state = load_state_at(home.path(), &s).unwrap();
        let versions: Vec<&str> = state.records.iter().map(|r| r.version.as_str()).collect();
        assert_eq!(versions, vec!["v3", "v4"]);
        assert!(!paths[0].exists(), "pruned blob should be deleted");
        assert!(paths[3].exists(), "active blob must survive");
    }

    #[test]
    fn state_survives_reload() {
        let home = TempDir::new().unwrap();
        let record =
            commit_at(home.path(), &scope(), b"persist", &descriptor("v9", None), true).unwrap();
        activate_at(home.path(), &scope(), &record.content_hash).unwrap();

        let reloaded = active_record_at(home.path(), &scope()).unwrap();
        assert_eq!(reloaded.version, "v9");
        assert!(reloaded.cross_platform);
    }
}
