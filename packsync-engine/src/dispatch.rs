//! Delivery dispatcher — per-session push with retry/backoff, idempotent
//! suppression, and a bounded worker pool for fan-out.
//!
//! One session's failure never blocks another's delivery, and per-session
//! outcomes never escalate into the reconciliation state machine.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{oneshot, Semaphore};
use tokio::time::timeout;

use packsync_core::config::{DeliveryConfig, ScopeConfig};
use packsync_core::types::{PackRecord, PushOutcome, PushResult, ScopeId, SessionId};

use crate::resolver;
use crate::sessions::{AckSignal, SessionCommand, SessionRegistry};

// ---------------------------------------------------------------------------
// Instruction & policy
// ---------------------------------------------------------------------------

/// The pack-apply instruction handed to the session layer.
///
/// Carries the public URL and the locally computed hash; the wire transfer
/// itself is owned by the proxy protocol stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyInstruction {
    pub url: String,
    pub hash: String,
    pub required: bool,
    pub prompt: String,
}

impl ApplyInstruction {
    /// Build the instruction for `record` under `scope`'s prompt settings.
    pub fn for_record(record: &PackRecord, scope: &ScopeConfig) -> Self {
        Self {
            url: record.source_url.clone(),
            hash: record.content_hash.0.clone(),
            required: scope.required,
            prompt: scope.prompt.clone(),
        }
    }
}

/// Retry/backoff budget for one push cycle.
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    pub ack_timeout: Duration,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub workers: usize,
}

impl From<&DeliveryConfig> for DeliveryPolicy {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            ack_timeout: config.ack_timeout(),
            max_attempts: config.max_attempts,
            initial_backoff: config.initial_backoff(),
            workers: config.workers.max(1),
        }
    }
}

/// Outcome counts for one dispatch cycle, consumed by the notifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchTotals {
    pub accepted: usize,
    pub rejected: usize,
    pub timed_out: usize,
    pub skipped_incompatible: usize,
}

impl DispatchTotals {
    pub fn from_outcomes(outcomes: &[PushOutcome]) -> Self {
        let mut totals = Self::default();
        for outcome in outcomes {
            match outcome.result {
                PushResult::Accepted => totals.accepted += 1,
                PushResult::Rejected => totals.rejected += 1,
                PushResult::TimedOut => totals.timed_out += 1,
                PushResult::SkippedIncompatible => totals.skipped_incompatible += 1,
            }
        }
        totals
    }
}

// ---------------------------------------------------------------------------
// Single-session push
// ---------------------------------------------------------------------------

/// Push `record` to one session.
///
/// Skips incompatible sessions, suppresses re-pushes of an already applied
/// hash (no send, outcome [`PushResult::Accepted`]), and otherwise runs the
/// send → ack-wait → backoff retry loop up to the attempt budget.
pub async fn push_session(
    registry: &SessionRegistry,
    session_id: &SessionId,
    record: &PackRecord,
    instruction: &ApplyInstruction,
    policy: &DeliveryPolicy,
) -> PushOutcome {
    let Some(entry) = registry.entry(session_id).await else {
        // Disconnected between snapshot and push.
        return PushOutcome::now(session_id.clone(), PushResult::TimedOut);
    };

    if !resolver::eligible(&entry.session, record) {
        tracing::debug!(session = %session_id, "session incompatible with pack, skipping");
        return PushOutcome::now(session_id.clone(), PushResult::SkippedIncompatible);
    }

    if entry.session.last_applied_hash.as_ref() == Some(&record.content_hash) {
        tracing::debug!(
            session = %session_id,
            hash = %record.content_hash.short(),
            "hash already applied, suppressing push",
        );
        return PushOutcome::now(session_id.clone(), PushResult::Accepted);
    }

    for attempt in 1..=policy.max_attempts {
        registry.record_attempt(session_id).await;

        let (ack_tx, ack_rx) = oneshot::channel();
        let command = SessionCommand::Apply {
            instruction: instruction.clone(),
            respond_to: ack_tx,
        };
        if entry.link.send(command).await.is_err() {
            tracing::debug!(session = %session_id, "session link closed mid-push");
            return PushOutcome::now(session_id.clone(), PushResult::TimedOut);
        }

        match timeout(policy.ack_timeout, ack_rx).await {
            Ok(Ok(AckSignal::Accepted)) => {
                registry
                    .record_applied(session_id, record.content_hash.clone())
                    .await;
                tracing::info!(
                    session = %session_id,
                    version = %record.version,
                    attempt,
                    "pack accepted",
                );
                return PushOutcome::now(session_id.clone(), PushResult::Accepted);
            }
            Ok(Ok(AckSignal::Rejected)) => {
                // Deliberate decline; retrying would not change the outcome.
                tracing::info!(session = %session_id, version = %record.version, "pack rejected");
                return PushOutcome::now(session_id.clone(), PushResult::Rejected);
            }
            Ok(Err(_)) => {
                // Session layer dropped the ack channel (disconnect).
                tracing::debug!(session = %session_id, "ack channel dropped mid-push");
                return PushOutcome::now(session_id.clone(), PushResult::TimedOut);
            }
            Err(_) => {
                tracing::debug!(
                    session = %session_id,
                    attempt,
                    max = policy.max_attempts,
                    "ack timed out",
                );
                if attempt < policy.max_attempts {
                    let backoff = policy.initial_backoff * 2u32.saturating_pow(attempt - 1);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    tracing::warn!(
        session = %session_id,
        version = %record.version,
        attempts = policy.max_attempts,
        "delivery attempts exhausted",
    );
    PushOutcome::now(session_id.clone(), PushResult::TimedOut)
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

/// Push `record` to every session attached for `scope`, bounded by the
/// worker pool. Sessions attached for other scopes are never touched.
///
/// Dispatch order across sessions is unspecified.
pub async fn dispatch_all(
    registry: &SessionRegistry,
    scope: &ScopeId,
    record: Arc<PackRecord>,
    instruction: ApplyInstruction,
    policy: &DeliveryPolicy,
) -> Vec<PushOutcome> {
    let session_ids = registry.session_ids_in(scope).await;
    let pool = Arc::new(Semaphore::new(policy.workers));
    let instruction = Arc::new(instruction);

    let mut handles = Vec::with_capacity(session_ids.len());
    for session_id in session_ids {
        let registry = registry.clone();
        let record = record.clone();
        let instruction = instruction.clone();
        let policy = policy.clone();
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            // Semaphore is never closed; acquire can only fail after close.
            let _permit = pool.acquire_owned().await.expect("worker pool closed");
            push_session(&registry, &session_id, &record, &instruction, &policy).await
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => tracing::error!(error = %err, "push task join failure"),
        }
    }
    outcomes
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
