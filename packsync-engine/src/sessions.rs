//! In-memory registry of connected sessions and their delivery links.
//!
//! The proxy network owns the real session lifetime; the registry tracks
//! the delivery-side view (protocol class, last applied hash) plus one
//! `mpsc` link per session over which apply instructions travel. Acks come
//! back on a `oneshot` carried inside each command.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, RwLock};

use packsync_core::types::{ClientSession, ContentHash, ProtocolClass, ScopeId, SessionId};

use crate::dispatch::ApplyInstruction;

/// Acknowledgement from the session layer for one apply instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckSignal {
    Accepted,
    Rejected,
}

/// Command sent over a session link.
#[derive(Debug)]
pub enum SessionCommand {
    Apply {
        instruction: ApplyInstruction,
        respond_to: oneshot::Sender<AckSignal>,
    },
}

/// A registered session: delivery state, the scope it attached for, and its
/// instruction link.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub session: ClientSession,
    pub scope: ScopeId,
    pub link: mpsc::Sender<SessionCommand>,
}

/// Shared session registry.
#[derive(Debug, Default, Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<SessionId, SessionEntry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session on connection. Replaces any stale entry with the
    /// same id (reconnect).
    pub async fn register(
        &self,
        session_id: SessionId,
        scope: ScopeId,
        protocol_class: ProtocolClass,
        link: mpsc::Sender<SessionCommand>,
    ) {
        let entry = SessionEntry {
            session: ClientSession::new(session_id.clone(), protocol_class),
            scope,
            link,
        };
        self.inner.write().await.insert(session_id, entry);
    }

    /// Remove a session on disconnect.
    pub async fn unregister(&self, session_id: &SessionId) {
        self.inner.write().await.remove(session_id);
    }

    /// Snapshot of all session ids; dispatch order is unspecified.
    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.inner.read().await.keys().cloned().collect()
    }

    /// Snapshot of the session ids attached for `scope`. A rollout for one
    /// scope must never touch sessions attached for another.
    pub async fn session_ids_in(&self, scope: &ScopeId) -> Vec<SessionId> {
        self.inner
            .read()
            .await
            .iter()
            .filter(|(_, entry)| &entry.scope == scope)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Clone one entry.
    pub async fn entry(&self, session_id: &SessionId) -> Option<SessionEntry> {
        self.inner.read().await.get(session_id).cloned()
    }

    /// Stamp a push attempt time.
    pub async fn record_attempt(&self, session_id: &SessionId) {
        if let Some(entry) = self.inner.write().await.get_mut(session_id) {
            entry.session.last_push_attempt_at = Some(Utc::now());
        }
    }

    /// Record a successful apply; future pushes of `hash` are suppressed.
    pub async fn record_applied(&self, session_id: &SessionId, hash: ContentHash) {
        if let Some(entry) = self.inner.write().await.get_mut(session_id) {
            entry.session.last_applied_hash = Some(hash);
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// `(native, translated)` session counts for status reporting.
    pub async fn counts(&self) -> (usize, usize) {
        let guard = self.inner.read().await;
        let translated = guard
            .values()
            .filter(|e| e.session.protocol_class == ProtocolClass::Translated)
            .count();
        (guard.len() - translated, translated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_snapshot_unregister() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        registry
            .register(
                SessionId::from("s-01"),
                ScopeId::global(),
                ProtocolClass::Native,
                tx.clone(),
            )
            .await;
        registry
            .register(
                SessionId::from("s-02"),
                ScopeId::global(),
                ProtocolClass::Translated,
                tx,
            )
            .await;

        assert_eq!(registry.len().await, 2);
        assert_eq!(registry.counts().await, (1, 1));

        registry.unregister(&SessionId::from("s-01")).await;
        assert_eq!(registry.session_ids().await, vec![SessionId::from("s-02")]);
    }

    #[tokio::test]
    async fn scoped_snapshot_excludes_other_scopes() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        registry
            .register(
                SessionId::from("s-01"),
                ScopeId::global(),
                ProtocolClass::Native,
                tx.clone(),
            )
            .await;
        registry
            .register(
                SessionId::from("s-02"),
                ScopeId::from("lobby"),
                ProtocolClass::Native,
                tx,
            )
            .await;

        assert_eq!(
            registry.session_ids_in(&ScopeId::from("lobby")).await,
            vec![SessionId::from("s-02")]
        );
        assert!(registry
            .session_ids_in(&ScopeId::from("minigames"))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn record_applied_updates_session_view() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let id = SessionId::from("s-01");
        registry
            .register(id.clone(), ScopeId::global(), ProtocolClass::Native, tx)
            .await;

        let hash = ContentHash::of(b"pack");
        registry.record_applied(&id, hash.clone()).await;

        let entry = registry.entry(&id).await.expect("entry");
        assert_eq!(entry.session.last_applied_hash, Some(hash));
    }

    #[tokio::test]
    async fn reconnect_replaces_entry() {
        let registry = SessionRegistry::new();
        let (tx1, _rx1) = mpsc::channel(1);
        let (tx2, _rx2) = mpsc::channel(1);
        let id = SessionId::from("s-01");

        registry
            .register(id.clone(), ScopeId::global(), ProtocolClass::Native, tx1)
            .await;
        registry.record_applied(&id, ContentHash::of(b"old")).await;
        registry
            .register(id.clone(), ScopeId::global(), ProtocolClass::Translated, tx2)
            .await;

        let entry = registry.entry(&id).await.expect("entry");
        assert_eq!(entry.session.protocol_class, ProtocolClass::Translated);
        assert!(
            entry.session.last_applied_hash.is_none(),
            "reconnect starts with a fresh delivery state"
        );
    }
}
