//! Version reconciler — drives one scope through
//! Checking → Downloading → Validating → Activating.
//!
//! At most one reconciliation is in flight per scope: concurrent triggers
//! coalesce into [`ReconcileOutcome::AlreadyRunning`]. Phases are strictly
//! sequential within a scope; different scopes reconcile independently.
//!
//! Integrity and storage failures are conservative — the previously active
//! record keeps serving. Network and rate-limit failures are transient;
//! rate-limit exhaustion additionally suppresses the next
//! `rate_limit_backoff_ticks` poll ticks for the scope.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use packsync_core::config::ScopeConfig;
use packsync_core::types::{PackRecord, ScopeId};
use packsync_source::{ReleaseSource, SourceError};

use crate::active::ActivePacks;
use crate::error::EngineError;
use crate::store;

// ---------------------------------------------------------------------------
// Phases & outcomes
// ---------------------------------------------------------------------------

/// Observable in-flight phase of a scope's reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePhase {
    #[default]
    Idle,
    Checking,
    Downloading,
    Validating,
    Activating,
}

/// Terminal outcome of one reconciliation cycle.
#[derive(Debug)]
pub enum ReconcileOutcome {
    /// A cycle for this scope was already in flight; this trigger coalesced
    /// into a no-op.
    AlreadyRunning,
    /// Latest upstream tag equals the active version; nothing downloaded.
    UpToDate { version: String },
    /// A new record was committed, activated, and swapped in — ready for
    /// dispatch fan-out.
    Activated { record: Arc<PackRecord> },
    /// The cycle failed; the previously active record is untouched.
    Failed { error: EngineError },
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Per-process reconciler shared by the poll loop and the admin surface.
#[derive(Clone)]
pub struct Reconciler {
    home: PathBuf,
    source: Arc<dyn ReleaseSource>,
    active: ActivePacks,
    phases: Arc<Mutex<HashMap<ScopeId, ReconcilePhase>>>,
    in_flight: Arc<Mutex<HashSet<ScopeId>>>,
    cancels: Arc<Mutex<HashMap<ScopeId, Arc<AtomicBool>>>>,
    skip_ticks: Arc<Mutex<HashMap<ScopeId, u32>>>,
}

/// Removes the scope from the in-flight set, retires its cancel flag, and
/// resets its phase when the cycle ends, however it ends.
struct InFlightGuard {
    scope: ScopeId,
    in_flight: Arc<Mutex<HashSet<ScopeId>>>,
    cancels: Arc<Mutex<HashMap<ScopeId, Arc<AtomicBool>>>>,
    phases: Arc<Mutex<HashMap<ScopeId, ReconcilePhase>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .expect("in-flight set poisoned")
            .remove(&self.scope);
        self.cancels
            .lock()
            .expect("cancel map poisoned")
            .remove(&self.scope);
        self.phases
            .lock()
            .expect("phase map poisoned")
            .insert(self.scope.clone(), ReconcilePhase::Idle);
    }
}

impl Reconciler {
    pub fn new(home: PathBuf, source: Arc<dyn ReleaseSource>, active: ActivePacks) -> Self {
        Self {
            home,
            source,
            active,
            phases: Arc::new(Mutex::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            cancels: Arc::new(Mutex::new(HashMap::new())),
            skip_ticks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn active_packs(&self) -> &ActivePacks {
        &self.active
    }

    /// Load persisted active records into the in-memory pointer map.
    ///
    /// Called once at startup so the daemon serves the last known pack
    /// without waiting for the first poll tick.
    pub async fn warm_start(&self, scopes: &[ScopeConfig]) {
        for scope in scopes {
            match store::active_record_at(&self.home, &scope.name) {
                Ok(record) => {
                    tracing::info!(
                        scope = %scope.name,
                        version = %record.version,
                        "restored active pack from cache",
                    );
                    self.active.swap(scope.name.clone(), record).await;
                }
                Err(crate::error::StoreError::NoActiveRecord { .. }) => {}
                Err(err) => {
                    tracing::warn!(scope = %scope.name, error = %err, "cache restore failed");
                }
            }
        }
    }

    /// Current phase of `scope` (Idle when never reconciled).
    pub fn phase(&self, scope: &ScopeId) -> ReconcilePhase {
        self.phases
            .lock()
            .expect("phase map poisoned")
            .get(scope)
            .copied()
            .unwrap_or_default()
    }

    /// Request cancellation of an in-flight cycle for `scope`; returns
    /// `false` when no cycle is in flight.
    ///
    /// The flag is checked between phases and per download chunk; pushes
    /// already issued by a previous rollout are not affected.
    pub fn cancel(&self, scope: &ScopeId) -> bool {
        let cancels = self.cancels.lock().expect("cancel map poisoned");
        match cancels.get(scope) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Poll-tick gate: false while the scope is still backing off a
    /// rate-limit response. Administrative triggers bypass this.
    pub fn should_poll(&self, scope: &ScopeId) -> bool {
        let mut skips = self.skip_ticks.lock().expect("skip map poisoned");
        match skips.get_mut(scope) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                tracing::debug!(scope = %scope, remaining, "skipping poll tick after rate limit");
                false
            }
            _ => true,
        }
    }

    fn set_phase(&self, scope: &ScopeId, phase: ReconcilePhase) {
        self.phases
            .lock()
            .expect("phase map poisoned")
            .insert(scope.clone(), phase);
    }

    fn note_rate_limited(&self, scope: &ScopeId, backoff_ticks: u32) {
        self.skip_ticks
            .lock()
            .expect("skip map poisoned")
            .insert(scope.clone(), backoff_ticks);
    }

    /// Run one reconciliation cycle for `scope`.
    pub async fn run_scope(
        &self,
        scope: &ScopeConfig,
        max_download_bytes: u64,
        rate_limit_backoff_ticks: u32,
    ) -> ReconcileOutcome {
        // Coalesce: at most one cycle in flight per scope.
        {
            let mut in_flight = self.in_flight.lock().expect("in-flight set poisoned");
            if !in_flight.insert(scope.name.clone()) {
                tracing::debug!(scope = %scope.name, "reconciliation already in flight");
                return ReconcileOutcome::AlreadyRunning;
            }
        }
        let _guard = InFlightGuard {
            scope: scope.name.clone(),
            in_flight: self.in_flight.clone(),
            cancels: self.cancels.clone(),
            phases: self.phases.clone(),
        };

        let cancel = Arc::new(AtomicBool::new(false));
        self.cancels
            .lock()
            .expect("cancel map poisoned")
            .insert(scope.name.clone(), cancel.clone());

        match self
            .run_phases(scope, max_download_bytes, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => {
                if let EngineError::Source(SourceError::RateLimited { .. }) = &error {
                    self.note_rate_limited(&scope.name, rate_limit_backoff_ticks);
                }
                tracing::warn!(scope = %scope.name, error = %error, "reconciliation failed");
                ReconcileOutcome::Failed { error }
            }
        }
    }

    async fn run_phases(
        &self,
        scope: &ScopeConfig,
        max_download_bytes: u64,
        cancel: Arc<AtomicBool>,
    ) -> Result<ReconcileOutcome, EngineError> {
        let scope_id = scope.name.clone();

        // Checking — resolve the latest upstream descriptor.
        self.set_phase(&scope_id, ReconcilePhase::Checking);
        let descriptor = {
            let source = self.source.clone();
            let repo = scope.repo.clone();
            let asset = scope.asset.clone();
            tokio::task::spawn_blocking(move || source.fetch_latest(&repo, asset.as_deref()))
                .await
                .map_err(|e| EngineError::Join(e.to_string()))??
        };

        let current = store::active_record_at(&self.home, &scope_id).ok();
        if let Some(current) = &current {
            if current.version == descriptor.tag {
                tracing::debug!(scope = %scope_id, version = %descriptor.tag, "pack up to date");
                return Ok(ReconcileOutcome::UpToDate {
                    version: descriptor.tag,
                });
            }
        }
        ensure_not_cancelled(&cancel)?;

        // Downloading — size-bounded, cancellable transfer.
        self.set_phase(&scope_id, ReconcilePhase::Downloading);
        tracing::info!(
            scope = %scope_id,
            from = current.as_ref().map(|r| r.version.as_str()).unwrap_or("none"),
            to = %descriptor.tag,
            "new release found, downloading",
        );
        let bytes = {
            let source = self.source.clone();
            let descriptor = descriptor.clone();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                source.download(&descriptor, max_download_bytes, &cancel)
            })
            .await
            .map_err(|e| EngineError::Join(e.to_string()))??
        };
        ensure_not_cancelled(&cancel)?;

        // Validating — hash locally, persist blob, verify what landed.
        self.set_phase(&scope_id, ReconcilePhase::Validating);
        let record = {
            let home = self.home.clone();
            let scope_id = scope_id.clone();
            let descriptor = descriptor.clone();
            let cross_platform = scope.cross_platform;
            tokio::task::spawn_blocking(move || {
                store::commit_at(&home, &scope_id, &bytes, &descriptor, cross_platform)
            })
            .await
            .map_err(|e| EngineError::Join(e.to_string()))??
        };
        ensure_not_cancelled(&cancel)?;

        // Activating — atomic state swap on disk, then pointer swap in memory.
        self.set_phase(&scope_id, ReconcilePhase::Activating);
        let activated = {
            let home = self.home.clone();
            let scope_id = scope_id.clone();
            let hash = record.content_hash.clone();
            tokio::task::spawn_blocking(move || store::activate_at(&home, &scope_id, &hash))
                .await
                .map_err(|e| EngineError::Join(e.to_string()))??
        };
        let record = self.active.swap(scope_id.clone(), activated).await;

        tracing::info!(
            scope = %scope_id,
            version = %record.version,
            hash = %record.content_hash.short(),
            "rollout activated",
        );
        Ok(ReconcileOutcome::Activated { record })
    }
}

fn ensure_not_cancelled(cancel: &AtomicBool) -> Result<(), EngineError> {
    if cancel.load(Ordering::Relaxed) {
        Err(EngineError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_defaults_to_idle() {
        assert_eq!(ReconcilePhase::default(), ReconcilePhase::Idle);
    }

    #[test]
    fn phase_serializes_snake_case() {
        let json = serde_json::to_string(&ReconcilePhase::Downloading).expect("serialize");
        assert_eq!(json, r#""downloading""#);
    }
}
