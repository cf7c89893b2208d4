//! End-to-end reconciliation cycles against a scripted release source.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};

use chrono::Utc;
use tempfile::TempDir;
use tokio::sync::mpsc;

use packsync_core::config::ScopeConfig;
use packsync_core::types::{
    ContentHash, ProtocolClass, PushResult, ReleaseDescriptor, ScopeId, SessionId,
};
use packsync_engine::dispatch::{self, ApplyInstruction, DeliveryPolicy, DispatchTotals};
use packsync_engine::sessions::{AckSignal, SessionCommand, SessionRegistry};
use packsync_engine::store;
use packsync_engine::{ActivePacks, EngineError, ReconcileOutcome, Reconciler};
use packsync_source::{ReleaseSource, SourceError};

const MAX_BYTES: u64 = 1024 * 1024;
const BACKOFF_TICKS: u32 = 3;

// ---------------------------------------------------------------------------
// Scripted source
// ---------------------------------------------------------------------------

/// Release source driven by a script instead of the network.
struct ScriptedSource {
    tag: Mutex<String>,
    bytes: Mutex<Vec<u8>>,
    /// Declared asset size override; `None` mirrors the real byte count.
    declared_size: Mutex<Option<u64>>,
    rate_limited: AtomicBool,
    fetches: AtomicUsize,
    downloads: AtomicUsize,
    /// When set, `download` blocks until a token arrives.
    gate: Mutex<Option<std_mpsc::Receiver<()>>>,
}

impl ScriptedSource {
    fn new(tag: &str, bytes: &[u8]) -> Self {
        Self {
            tag: Mutex::new(tag.to_owned()),
            bytes: Mutex::new(bytes.to_vec()),
            declared_size: Mutex::new(None),
            rate_limited: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            gate: Mutex::new(None),
        }
    }

    fn gated(tag: &str, bytes: &[u8]) -> (Self, std_mpsc::Sender<()>) {
        let (tx, rx) = std_mpsc::channel();
        let source = Self::new(tag, bytes);
        *source.gate.lock().unwrap() = Some(rx);
        (source, tx)
    }
}

impl ReleaseSource for ScriptedSource {
    fn fetch_latest(
        &self,
        _repo: &packsync_core::config::RepoRef,
        _asset_filter: Option<&str>,
    ) -> Result<ReleaseDescriptor, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.rate_limited.load(Ordering::SeqCst) {
            return Err(SourceError::RateLimited { reset_unix: None });
        }
        let tag = self.tag.lock().unwrap().clone();
        let size = self
            .declared_size
            .lock()
            .unwrap()
            .unwrap_or(self.bytes.lock().unwrap().len() as u64);
        Ok(ReleaseDescriptor {
            tag: tag.clone(),
            download_url: format!("https://example.invalid/{tag}/pack.zip"),
            asset_name: "pack.zip".to_owned(),
            size_bytes: Some(size),
            published_at: Utc::now(),
        })
    }

    fn download(
        &self,
        _descriptor: &ReleaseDescriptor,
        _max_bytes: u64,
        _cancel: &AtomicBool,
    ) -> Result<Vec<u8>, SourceError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = self.gate.lock().unwrap().as_ref() {
            gate.recv().expect("download gate dropped");
        }
        Ok(self.bytes.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn scope_config(name: &str) -> ScopeConfig {
    ScopeConfig {
        name: ScopeId::from(name),
        repo: "alathra/server-pack".parse().expect("repo"),
        asset: None,
        cross_platform: false,
        required: true,
        prompt: "Please accept.".to_owned(),
    }
}

fn reconciler(home: &TempDir, source: Arc<ScriptedSource>) -> Reconciler {
    Reconciler::new(home.path().to_path_buf(), source, ActivePacks::new())
}

fn delivery_policy() -> DeliveryPolicy {
    DeliveryPolicy {
        ack_timeout: std::time::Duration::from_millis(500),
        max_attempts: 3,
        initial_backoff: std::time::Duration::from_millis(10),
        workers: 4,
    }
}

/// Session stub answering every apply with `signal`; returns commands seen.
fn responder(
    mut rx: mpsc::Receiver<SessionCommand>,
    signal: AckSignal,
) -> tokio::task::JoinHandle<usize> {
    tokio::spawn(async move {
        let mut seen = 0usize;
        while let Some(SessionCommand::Apply { respond_to, .. }) = rx.recv().await {
            seen += 1;
            let _ = respond_to.send(signal);
        }
        seen
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fresh_scope_activates_latest_release() {
    let home = TempDir::new().expect("home");
    let source = Arc::new(ScriptedSource::new("v2.4.0", b"pack-bytes"));
    let reconciler = reconciler(&home, source.clone());
    let scope = scope_config("global");

    let outcome = reconciler.run_scope(&scope, MAX_BYTES, BACKOFF_TICKS).await;
    let ReconcileOutcome::Activated { record } = outcome else {
        panic!("expected activation, got {outcome:?}");
    };

    // Active hash is the locally computed digest of the downloaded bytes.
    assert_eq!(record.content_hash, ContentHash::of(b"pack-bytes"));
    assert_eq!(record.version, "v2.4.0");

    let persisted = store::active_record_at(home.path(), &scope.name).expect("active");
    assert_eq!(persisted.content_hash, record.content_hash);
    assert_eq!(
        reconciler
            .active_packs()
            .get(&scope.name)
            .await
            .expect("pointer")
            .version,
        "v2.4.0"
    );
}

#[tokio::test]
async fn equal_tag_is_up_to_date_with_zero_downloads() {
    let home = TempDir::new().expect("home");
    let source = Arc::new(ScriptedSource::new("v2.3.0", b"pack-bytes"));
    let reconciler = reconciler(&home, source.clone());
    let scope = scope_config("global");

    // First cycle activates v2.3.0.
    let outcome = reconciler.run_scope(&scope, MAX_BYTES, BACKOFF_TICKS).await;
    assert!(matches!(outcome, ReconcileOutcome::Activated { .. }));
    assert_eq!(source.downloads.load(Ordering::SeqCst), 1);

    // Second cycle: same tag, no download.
    let outcome = reconciler.run_scope(&scope, MAX_BYTES, BACKOFF_TICKS).await;
    let ReconcileOutcome::UpToDate { version } = outcome else {
        panic!("expected up-to-date, got {outcome:?}");
    };
    assert_eq!(version, "v2.3.0");
    assert_eq!(source.downloads.load(Ordering::SeqCst), 1, "no re-download");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rapid_double_trigger_downloads_exactly_once() {
    let home = TempDir::new().expect("home");
    let (source, gate) = ScriptedSource::gated("v1.0.0", b"pack-bytes");
    let source = Arc::new(source);
    let reconciler = reconciler(&home, source.clone());
    let scope = scope_config("global");

    let first = tokio::spawn({
        let reconciler = reconciler.clone();
        let scope = scope.clone();
        async move { reconciler.run_scope(&scope, MAX_BYTES, BACKOFF_TICKS).await }
    });

    // Wait until the first cycle is inside the download.
    while source.downloads.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let second = reconciler.run_scope(&scope, MAX_BYTES, BACKOFF_TICKS).await;
    assert!(
        matches!(second, ReconcileOutcome::AlreadyRunning),
        "concurrent trigger must coalesce"
    );

    gate.send(()).expect("release gate");
    let first = first.await.expect("join");
    assert!(matches!(first, ReconcileOutcome::Activated { .. }));
    assert_eq!(
        source.downloads.load(Ordering::SeqCst),
        1,
        "exactly one downloading phase"
    );
}

#[tokio::test]
async fn validation_failure_keeps_previous_record_active() {
    let home = TempDir::new().expect("home");
    let source = Arc::new(ScriptedSource::new("v1.0.0", b"good-bytes"));
    let reconciler = reconciler(&home, source.clone());
    let scope = scope_config("global");

    let outcome = reconciler.run_scope(&scope, MAX_BYTES, BACKOFF_TICKS).await;
    assert!(matches!(outcome, ReconcileOutcome::Activated { .. }));
    let before = store::active_record_at(home.path(), &scope.name).expect("active");

    // New tag whose declared size disagrees with the delivered bytes.
    *source.tag.lock().unwrap() = "v1.1.0".to_owned();
    *source.bytes.lock().unwrap() = b"corrupt".to_vec();
    *source.declared_size.lock().unwrap() = Some(9999);

    let outcome = reconciler.run_scope(&scope, MAX_BYTES, BACKOFF_TICKS).await;
    let ReconcileOutcome::Failed { error } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(matches!(error, EngineError::Store(_)));

    // Fail-safe: the working record is untouched, on disk and in memory.
    let after = store::active_record_at(home.path(), &scope.name).expect("active");
    assert_eq!(after, before);
    assert_eq!(
        reconciler
            .active_packs()
            .get(&scope.name)
            .await
            .expect("pointer")
            .version,
        "v1.0.0"
    );
}

#[tokio::test]
async fn rate_limit_backs_off_poll_ticks() {
    let home = TempDir::new().expect("home");
    let source = Arc::new(ScriptedSource::new("v1.0.0", b"bytes"));
    source.rate_limited.store(true, Ordering::SeqCst);
    let reconciler = reconciler(&home, source.clone());
    let scope = scope_config("global");

    let outcome = reconciler.run_scope(&scope, MAX_BYTES, BACKOFF_TICKS).await;
    let ReconcileOutcome::Failed { error } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(matches!(
        error,
        EngineError::Source(SourceError::RateLimited { .. })
    ));

    // The next three poll ticks are suppressed, then polling resumes.
    for _ in 0..BACKOFF_TICKS {
        assert!(!reconciler.should_poll(&scope.name));
    }
    assert!(reconciler.should_poll(&scope.name));
}

#[tokio::test]
async fn rollout_reaches_native_sessions_once_translated_never() {
    let home = TempDir::new().expect("home");
    let source = Arc::new(ScriptedSource::new("v2.4.0", b"rollout-bytes"));
    let reconciler = reconciler(&home, source.clone());
    let scope = scope_config("global");

    let registry = SessionRegistry::new();
    let mut native_responders = Vec::new();
    for n in 0..2 {
        let (tx, rx) = mpsc::channel(4);
        registry
            .register(
                SessionId::from(format!("java-{n}")),
                scope.name.clone(),
                ProtocolClass::Native,
                tx,
            )
            .await;
        native_responders.push(responder(rx, AckSignal::Accepted));
    }
    let (bedrock_tx, mut bedrock_rx) = mpsc::channel(4);
    registry
        .register(
            SessionId::from("bedrock-0"),
            scope.name.clone(),
            ProtocolClass::Translated,
            bedrock_tx,
        )
        .await;

    let outcome = reconciler.run_scope(&scope, MAX_BYTES, BACKOFF_TICKS).await;
    let ReconcileOutcome::Activated { record } = outcome else {
        panic!("expected activation, got {outcome:?}");
    };

    let instruction = ApplyInstruction::for_record(&record, &scope);
    let outcomes = dispatch::dispatch_all(
        &registry,
        &scope.name,
        record.clone(),
        instruction.clone(),
        &delivery_policy(),
    )
    .await;
    let totals = DispatchTotals::from_outcomes(&outcomes);
    assert_eq!(totals.accepted, 2);
    assert_eq!(totals.skipped_incompatible, 1);
    assert!(bedrock_rx.try_recv().is_err(), "translated session untouched");

    // Re-dispatching the same record sends nothing further.
    let again = dispatch::dispatch_all(
        &registry,
        &scope.name,
        record.clone(),
        instruction,
        &delivery_policy(),
    )
    .await;
    assert!(again
        .iter()
        .all(|o| o.result == PushResult::Accepted || o.result == PushResult::SkippedIncompatible));

    // Dropping the registry entries closes the links; each native session
    // must have seen exactly one apply across both dispatches.
    for n in 0..2 {
        registry
            .unregister(&SessionId::from(format!("java-{n}")))
            .await;
    }
    for handle in native_responders {
        assert_eq!(handle.await.expect("responder"), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_mid_cycle_fails_and_keeps_previous_record() {
    let home = TempDir::new().expect("home");
    let scope = scope_config("global");

    // Establish a working record the cancelled cycle must not disturb.
    {
        let source = Arc::new(ScriptedSource::new("v1.0.0", b"good-bytes"));
        let reconciler = reconciler(&home, source);
        let outcome = reconciler.run_scope(&scope, MAX_BYTES, BACKOFF_TICKS).await;
        assert!(matches!(outcome, ReconcileOutcome::Activated { .. }));
    }
    let before = store::active_record_at(home.path(), &scope.name).expect("active");

    // The v1.1.0 cycle parks inside its download until the gate opens.
    let (source, gate) = ScriptedSource::gated("v1.1.0", b"next-bytes");
    let source = Arc::new(source);
    let reconciler = reconciler(&home, source.clone());

    assert!(
        !reconciler.cancel(&scope.name),
        "nothing in flight to cancel"
    );

    let cycle = tokio::spawn({
        let reconciler = reconciler.clone();
        let scope = scope.clone();
        async move { reconciler.run_scope(&scope, MAX_BYTES, BACKOFF_TICKS).await }
    });
    while source.downloads.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    assert!(reconciler.cancel(&scope.name), "cycle is in flight");
    gate.send(()).expect("release gate");

    let outcome = cycle.await.expect("join");
    let ReconcileOutcome::Failed { error } = outcome else {
        panic!("expected cancellation failure, got {outcome:?}");
    };
    assert!(matches!(error, EngineError::Cancelled));

    // The persisted record survives and no pointer to v1.1.0 was installed.
    let after = store::active_record_at(home.path(), &scope.name).expect("active");
    assert_eq!(after, before);
    assert!(reconciler.active_packs().get(&scope.name).await.is_none());

    // The flag retired with the cycle; an idle cancel has nothing to stop.
    assert!(!reconciler.cancel(&scope.name));
}

#[tokio::test]
async fn warm_start_restores_persisted_active_record() {
    let home = TempDir::new().expect("home");
    let scope = scope_config("global");

    // First process run activates a record.
    {
        let source = Arc::new(ScriptedSource::new("v3.0.0", b"persisted"));
        let reconciler = reconciler(&home, source);
        let outcome = reconciler.run_scope(&scope, MAX_BYTES, BACKOFF_TICKS).await;
        assert!(matches!(outcome, ReconcileOutcome::Activated { .. }));
    }

    // A fresh reconciler (daemon restart) restores it without any fetch.
    let source = Arc::new(ScriptedSource::new("v3.0.0", b"persisted"));
    let reconciler = reconciler(&home, source.clone());
    reconciler.warm_start(std::slice::from_ref(&scope)).await;

    assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    assert_eq!(
        reconciler
            .active_packs()
            .get(&scope.name)
            .await
            .expect("restored")
            .version,
        "v3.0.0"
    );
}
