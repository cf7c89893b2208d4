//! In-memory active-record pointers, one per scope.
//!
//! Dispatch tasks read the pointer concurrently; exactly one reconciliation
//! writes it at a time. Writers replace the whole `Arc` under a short write
//! lock (swap-pointer semantics) — record fields are never mutated in place,
//! so readers never observe partial state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use packsync_core::types::{PackRecord, ScopeId};

/// Shared map of `scope -> Arc<PackRecord>`.
#[derive(Debug, Default, Clone)]
pub struct ActivePacks {
    inner: Arc<RwLock<HashMap<ScopeId, Arc<PackRecord>>>>,
}

impl ActivePacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone the active record pointer for `scope`, if any.
    pub async fn get(&self, scope: &ScopeId) -> Option<Arc<PackRecord>> {
        self.inner.read().await.get(scope).cloned()
    }

    /// Swap in a new active record for `scope`.
    pub async fn swap(&self, scope: ScopeId, record: PackRecord) -> Arc<PackRecord> {
        let record = Arc::new(record);
        self.inner.write().await.insert(scope, record.clone());
        record
    }

    /// Drop the pointer for `scope` (scope removed from config).
    pub async fn remove(&self, scope: &ScopeId) {
        self.inner.write().await.remove(scope);
    }

    /// Snapshot of all scopes and their active versions, sorted by scope.
    pub async fn snapshot(&self) -> Vec<(ScopeId, Arc<PackRecord>)> {
        let guard = self.inner.read().await;
        let mut entries: Vec<_> = guard
            .iter()
            .map(|(scope, record)| (scope.clone(), record.clone()))
            .collect();
        entries.sort_by(|a, b| a.0 .0.cmp(&b.0 .0));
        entries
    }
}
