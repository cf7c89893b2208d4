use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use packsync_core::config::{self, Config, ScopeConfig};
use packsync_core::types::{ScopeId, SessionId};
use packsync_engine::dispatch::{self, ApplyInstruction, DeliveryPolicy, DispatchTotals};
use packsync_engine::notify::{RolloutNotice, WebhookNotifier};
use packsync_engine::sessions::{AckSignal, SessionCommand, SessionRegistry};
use packsync_engine::{resolver, store, ActivePacks, ReconcileOutcome, Reconciler};
use packsync_source::GithubClient;

use crate::error::{io_err, DaemonError};
use crate::paths::{logs_dir, run_dir, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Per-scope last-successful-reconcile timestamps (Unix seconds).
pub type ReconcileTimestamps = HashMap<String, u64>;

struct ReconcileJob {
    scope: ScopeId,
    source: &'static str,
    /// `None` for poll-triggered jobs; the processor logs the outcome.
    respond_to: Option<oneshot::Sender<Result<ReconcileReport, String>>>,
}

/// One reconciliation cycle's result, as reported over the socket.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub scope: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totals: Option<DispatchTotals>,
    pub duration_ms: u128,
}

/// Shared handles threaded through every runtime task.
#[derive(Clone)]
struct DaemonState {
    home: PathBuf,
    config: Arc<RwLock<Config>>,
    reconciler: Reconciler,
    registry: SessionRegistry,
    notifier: Arc<RwLock<WebhookNotifier>>,
    timestamps: Arc<RwLock<ReconcileTimestamps>>,
    started_at_unix: u64,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let config = config::load_at(&home)?;
    let source = Arc::new(GithubClient::new(config.github.token.clone()));
    let reconciler = Reconciler::new(home.clone(), source, ActivePacks::new());
    reconciler.warm_start(&config.scopes).await;

    let state = DaemonState {
        home,
        notifier: Arc::new(RwLock::new(WebhookNotifier::new(config.webhook.url.clone()))),
        config: Arc::new(RwLock::new(config)),
        reconciler,
        registry: SessionRegistry::new(),
        timestamps: Arc::new(RwLock::new(HashMap::new())),
        started_at_unix: unix_seconds_now(),
    };

    let (job_tx, job_rx) = mpsc::channel::<ReconcileJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let poll_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        let job_tx = job_tx.clone();
        tokio::spawn(async move {
            let result = poll_task(state, job_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result = reconcile_processor_task(state, job_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        let job_tx = job_tx.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(state, job_tx, shutdown.clone(), shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let home = state.home.clone();
        tokio::spawn(async move {
            let result = log_rotation_task(home, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (poll_result, processor_result, socket_result, rotation_result, signal_result) = tokio::join!(
        poll_handle,
        processor_handle,
        socket_handle,
        rotation_handle,
        signal_handle
    );

    handle_join("poll", poll_result)?;
    handle_join("reconcile_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Poll trigger
// ---------------------------------------------------------------------------

async fn poll_task(
    state: DaemonState,
    job_tx: mpsc::Sender<ReconcileJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut current = state.config.read().await.poll_interval();
    let mut ticker = new_ticker(current);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                // `reload` may change the interval; pick it up on the next tick.
                let desired = state.config.read().await.poll_interval();
                if desired != current {
                    tracing::info!(
                        old_secs = current.as_secs(),
                        new_secs = desired.as_secs(),
                        "poll interval changed",
                    );
                    current = desired;
                    ticker = new_ticker(current);
                    ticker.tick().await; // consume the immediate tick
                    continue;
                }

                let scopes: Vec<ScopeId> = {
                    let config = state.config.read().await;
                    config.scopes.iter().map(|s| s.name.clone()).collect()
                };
                for scope in scopes {
                    if !state.reconciler.should_poll(&scope) {
                        tracing::debug!(scope = %scope, "poll tick suppressed by rate-limit backoff");
                        continue;
                    }
                    let job = ReconcileJob {
                        scope: scope.clone(),
                        source: "poll",
                        respond_to: None,
                    };
                    if job_tx.send(job).await.is_err() {
                        return Err(DaemonError::ChannelClosed("reconcile queue"));
                    }
                }
            }
        }
    }

    Ok(())
}

fn new_ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker
}

// ---------------------------------------------------------------------------
// Reconcile processor
// ---------------------------------------------------------------------------

async fn reconcile_processor_task(
    state: DaemonState,
    mut job_rx: mpsc::Receiver<ReconcileJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = job_rx.recv() => {
                let Some(job) = maybe_job else { break };
                // Per-scope concurrency is safe: the engine coalesces
                // overlapping cycles for the same scope.
                let state = state.clone();
                tokio::spawn(async move {
                    process_job(state, job).await;
                });
            }
        }
    }

    Ok(())
}

async fn process_job(state: DaemonState, job: ReconcileJob) {
    let started = Instant::now();
    let outcome = run_cycle(&state, &job.scope).await;

    match &outcome {
        Ok(report) => tracing::info!(
            scope = %job.scope,
            source = job.source,
            outcome = %report.outcome,
            duration_ms = report.duration_ms,
            "reconcile cycle finished",
        ),
        Err(err) => tracing::error!(
            scope = %job.scope,
            source = job.source,
            error = %err,
            duration_ms = started.elapsed().as_millis(),
            "reconcile cycle failed",
        ),
    }

    if let Some(respond_to) = job.respond_to {
        let _ = respond_to.send(outcome);
    }
}

async fn run_cycle(state: &DaemonState, scope: &ScopeId) -> Result<ReconcileReport, String> {
    let started = Instant::now();
    let (scope_config, max_bytes, backoff_ticks, policy, keep_records) = {
        let config = state.config.read().await;
        let scope_config = config
            .scope(scope)
            .cloned()
            .ok_or_else(|| format!("unknown scope '{scope}'"))?;
        (
            scope_config,
            config.download.max_bytes,
            config.rate_limit_backoff_ticks,
            DeliveryPolicy::from(&config.delivery),
            config.retention.keep_records,
        )
    };

    let outcome = state
        .reconciler
        .run_scope(&scope_config, max_bytes, backoff_ticks)
        .await;

    let report = match outcome {
        ReconcileOutcome::AlreadyRunning => ReconcileReport {
            scope: scope.0.clone(),
            outcome: "already_running".to_owned(),
            version: None,
            totals: None,
            duration_ms: started.elapsed().as_millis(),
        },
        ReconcileOutcome::UpToDate { version } => {
            state
                .timestamps
                .write()
                .await
                .insert(scope.0.clone(), unix_seconds_now());
            ReconcileReport {
                scope: scope.0.clone(),
                outcome: "up_to_date".to_owned(),
                version: Some(version),
                totals: None,
                duration_ms: started.elapsed().as_millis(),
            }
        }
        ReconcileOutcome::Activated { record } => {
            let totals = roll_out(state, &scope_config, record.as_ref(), &policy).await;
            prune_scope(state, scope, keep_records).await;
            state
                .timestamps
                .write()
                .await
                .insert(scope.0.clone(), unix_seconds_now());
            ReconcileReport {
                scope: scope.0.clone(),
                outcome: "activated".to_owned(),
                version: Some(record.version.clone()),
                totals: Some(totals),
                duration_ms: started.elapsed().as_millis(),
            }
        }
        ReconcileOutcome::Failed { error } => {
            let message = error.to_string();
            send_notice(state, RolloutNotice::failed(scope, &message)).await;
            return Err(message);
        }
    };

    Ok(report)
}

/// Fan an activated record out to the sessions attached for its scope and
/// notify.
async fn roll_out(
    state: &DaemonState,
    scope_config: &ScopeConfig,
    record: &packsync_core::types::PackRecord,
    policy: &DeliveryPolicy,
) -> DispatchTotals {
    let instruction = ApplyInstruction::for_record(record, scope_config);
    let outcomes = dispatch::dispatch_all(
        &state.registry,
        &scope_config.name,
        Arc::new(record.clone()),
        instruction,
        policy,
    )
    .await;
    let totals = DispatchTotals::from_outcomes(&outcomes);

    send_notice(
        state,
        RolloutNotice::rolled_out(&scope_config.name, &record.version, totals),
    )
    .await;
    totals
}

async fn prune_scope(state: &DaemonState, scope: &ScopeId, keep: usize) {
    let home = state.home.clone();
    let scope = scope.clone();
    let pruned = tokio::task::spawn_blocking(move || store::prune_at(&home, &scope, keep)).await;
    match pruned {
        Ok(Ok(hashes)) if !hashes.is_empty() => {
            tracing::info!(pruned = hashes.len(), "superseded pack records pruned");
        }
        Ok(Ok(_)) => {}
        Ok(Err(err)) => tracing::warn!(error = %err, "prune after activation failed"),
        Err(err) => tracing::warn!(error = %err, "prune task join failed"),
    }
}

/// Webhook delivery is blocking HTTP; never let it stall the runtime.
async fn send_notice(state: &DaemonState, notice: RolloutNotice) {
    let notifier = state.notifier.read().await.clone();
    let _ = tokio::task::spawn_blocking(move || notifier.send(&notice)).await;
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

async fn socket_server_task(
    state: DaemonState,
    job_tx: mpsc::Sender<ReconcileJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&state.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let state = state.clone();
                let job_tx = job_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) =
                        handle_socket_client(stream, state, job_tx, shutdown_tx).await
                    {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    state: DaemonState,
    job_tx: mpsc::Sender<ReconcileJob>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let cmd = request.cmd.clone();
        if cmd == "attach" {
            // The connection becomes a session bridge; no further admin
            // commands are accepted on it.
            write_response(&mut writer, &DaemonResponse::ok(json!({ "attached": true }))).await?;
            return session_bridge(lines, writer, state, request, shutdown_tx.subscribe()).await;
        }

        let response = match cmd.as_str() {
            "status" => DaemonResponse::ok(build_status_payload(&state).await),
            "reconcile" => match enqueue_reconcile(&state, &job_tx, request.scope).await {
                Ok(reports) => DaemonResponse::ok(json!(reports)),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            "rollback" => match request.scope {
                Some(scope) => match rollback_scope(&state, ScopeId::from(scope)).await {
                    Ok(payload) => DaemonResponse::ok(payload),
                    Err(err) => DaemonResponse::error(err.to_string()),
                },
                None => DaemonResponse::error("rollback requires a scope"),
            },
            "cancel" => match request.scope {
                Some(scope) => {
                    let cancelled = state.reconciler.cancel(&ScopeId::from(scope));
                    DaemonResponse::ok(json!({ "cancelled": cancelled }))
                }
                None => DaemonResponse::error("cancel requires a scope"),
            },
            "reload" => match reload_config(&state).await {
                Ok(payload) => DaemonResponse::ok(payload),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if cmd == "stop" {
            break;
        }
    }

    Ok(())
}

/// Run reconcile for one scope, or for every configured scope when unset.
async fn enqueue_reconcile(
    state: &DaemonState,
    job_tx: &mpsc::Sender<ReconcileJob>,
    scope: Option<String>,
) -> Result<Vec<ReconcileReport>, DaemonError> {
    let scopes: Vec<ScopeId> = match scope {
        Some(name) => vec![ScopeId::from(name)],
        None => {
            let config = state.config.read().await;
            config.scopes.iter().map(|s| s.name.clone()).collect()
        }
    };

    let mut reports = Vec::with_capacity(scopes.len());
    for scope in scopes {
        let (tx, rx) = oneshot::channel();
        job_tx
            .send(ReconcileJob {
                scope,
                source: "socket",
                respond_to: Some(tx),
            })
            .await
            .map_err(|_| DaemonError::ChannelClosed("reconcile queue"))?;
        let report = rx
            .await
            .map_err(|_| DaemonError::ChannelClosed("reconcile response"))?
            .map_err(DaemonError::Protocol)?;
        reports.push(report);
    }
    Ok(reports)
}

/// Reactivate the previous record and push it back out.
async fn rollback_scope(state: &DaemonState, scope: ScopeId) -> Result<Value, DaemonError> {
    let (scope_config, policy) = {
        let config = state.config.read().await;
        let scope_config = config
            .scope(&scope)
            .cloned()
            .ok_or_else(|| DaemonError::Protocol(format!("unknown scope '{scope}'")))?;
        (scope_config, DeliveryPolicy::from(&config.delivery))
    };

    let home = state.home.clone();
    let scope_for_store = scope.clone();
    let record = tokio::task::spawn_blocking(move || store::rollback_at(&home, &scope_for_store))
        .await
        .map_err(|err| DaemonError::Protocol(format!("rollback task join error: {err}")))??;

    state
        .reconciler
        .active_packs()
        .swap(scope.clone(), record.clone())
        .await;
    tracing::info!(
        scope = %scope,
        version = %record.version,
        hash = %record.content_hash.short(),
        "rolled back to previous record",
    );

    let totals = roll_out(state, &scope_config, &record, &policy).await;
    Ok(json!({
        "scope": scope.0,
        "version": record.version,
        "hash": record.content_hash.0,
        "totals": totals,
    }))
}

async fn reload_config(state: &DaemonState) -> Result<Value, DaemonError> {
    let fresh = config::load_at(&state.home)?;
    state
        .notifier
        .write()
        .await
        .set_url(fresh.webhook.url.clone());
    let scopes = fresh.scopes.len();
    let poll_interval_secs = fresh.poll_interval_secs;
    *state.config.write().await = fresh;
    tracing::info!(scopes, poll_interval_secs, "configuration reloaded");
    Ok(json!({
        "reloaded": true,
        "scopes": scopes,
        "poll_interval_secs": poll_interval_secs,
    }))
}

async fn build_status_payload(state: &DaemonState) -> Value {
    let config = state.config.read().await.clone();
    let ts_snapshot: ReconcileTimestamps = state.timestamps.read().await.clone();

    let mut scopes = Vec::with_capacity(config.scopes.len());
    for scope_config in &config.scopes {
        let name = &scope_config.name;
        let active = state.reconciler.active_packs().get(name).await;
        scopes.push(json!({
            "name": name.0,
            "repo": scope_config.repo.to_string(),
            "active_version": active.as_ref().map(|r| r.version.clone()),
            "active_hash": active.as_ref().map(|r| r.content_hash.0.clone()),
            "phase": state.reconciler.phase(name),
            "last_reconcile_at_unix": ts_snapshot.get(name.0.as_str()).copied().unwrap_or(0),
        }));
    }

    let (native, translated) = state.registry.counts().await;
    let last_reconcile_at_unix = ts_snapshot.values().copied().max().unwrap_or(0);

    json!({
        "running": true,
        "label": crate::paths::DAEMON_LABEL,
        "started_at_unix": state.started_at_unix,
        "last_reconcile_at_unix": last_reconcile_at_unix,
        "scopes": scopes,
        "sessions": { "native": native, "translated": translated },
        "socket": socket_path(&state.home).display().to_string(),
    })
}

// ---------------------------------------------------------------------------
// Session bridge
// ---------------------------------------------------------------------------

/// Line sent to an attached proxy connection for each apply instruction.
#[derive(Debug, Serialize)]
struct BridgeApply<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    instruction: &'a ApplyInstruction,
}

/// Turn an `attach`ed connection into the delivery link for one session.
///
/// Apply instructions go out as JSON lines; `{"ack":"accepted"|"rejected"}`
/// lines come back in the order instructions were sent. Disconnect
/// unregisters the session.
async fn session_bridge(
    mut lines: tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>,
    mut writer: OwnedWriteHalf,
    state: DaemonState,
    request: DaemonRequest,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let Some(session) = request.session else {
        write_response(&mut writer, &DaemonResponse::error("attach requires a session")).await?;
        return Ok(());
    };
    let session_id = SessionId::from(session);
    let protocol_class = resolver::classify(
        request.brand.as_deref(),
        request.translated.unwrap_or(false),
    );
    let scope = ScopeId::from(request.scope.unwrap_or_else(|| "global".to_owned()));

    let (link_tx, mut link_rx) = mpsc::channel::<SessionCommand>(8);
    state
        .registry
        .register(session_id.clone(), scope.clone(), protocol_class, link_tx)
        .await;
    tracing::info!(
        session = %session_id,
        class = ?protocol_class,
        scope = %scope,
        "session attached",
    );

    push_active_on_attach(&state, &scope, &session_id).await;

    // Acks map to pending instructions in send order.
    let mut pending: VecDeque<oneshot::Sender<AckSignal>> = VecDeque::new();
    let result = loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break Ok(()),
            command = link_rx.recv() => {
                let Some(SessionCommand::Apply { instruction, respond_to }) = command else {
                    break Ok(());
                };
                let line = serde_json::to_string(&BridgeApply {
                    kind: "apply",
                    instruction: &instruction,
                })?;
                if let Err(err) = write_line(&mut writer, &line).await {
                    break Err(err);
                }
                pending.push_back(respond_to);
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let Some(signal) = parse_ack_line(&line) else {
                            tracing::warn!(session = %session_id, line = %line, "unparseable ack line");
                            continue;
                        };
                        match pending.pop_front() {
                            Some(respond_to) => {
                                let _ = respond_to.send(signal);
                            }
                            None => {
                                tracing::warn!(session = %session_id, "ack with no pending instruction");
                            }
                        }
                    }
                    Ok(None) => break Ok(()),
                    Err(err) => break Err(io_err("session bridge read", err)),
                }
            }
        }
    };

    state.registry.unregister(&session_id).await;
    tracing::info!(session = %session_id, "session detached");
    result
}

/// Join-time delivery: a freshly attached session gets the scope's current
/// active pack immediately.
async fn push_active_on_attach(state: &DaemonState, scope: &ScopeId, session_id: &SessionId) {
    let Some(record) = state.reconciler.active_packs().get(scope).await else {
        return;
    };
    let (scope_config, policy) = {
        let config = state.config.read().await;
        let Some(scope_config) = config.scope(scope).cloned() else {
            tracing::warn!(scope = %scope, "attached session references unconfigured scope");
            return;
        };
        (scope_config, DeliveryPolicy::from(&config.delivery))
    };

    let registry = state.registry.clone();
    let session_id = session_id.clone();
    tokio::spawn(async move {
        let instruction = ApplyInstruction::for_record(&record, &scope_config);
        let outcome =
            dispatch::push_session(&registry, &session_id, &record, &instruction, &policy).await;
        tracing::debug!(
            session = %session_id,
            result = ?outcome.result,
            "join-time pack push finished",
        );
    });
}

fn parse_ack_line(line: &str) -> Option<AckSignal> {
    let value: Value = serde_json::from_str(line.trim()).ok()?;
    match value.get("ack")?.as_str()? {
        "accepted" => Some(AckSignal::Accepted),
        "rejected" => Some(AckSignal::Rejected),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Plumbing
// ---------------------------------------------------------------------------

async fn log_rotation_task(
    home: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // consume the first immediate tick

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let home = home.clone();
                tokio::task::spawn_blocking(move || {
                    crate::log_rotation::rotate_logs(&home);
                })
                .await
                .ok(); // rotation errors are logged inside rotate_logs
            }
        }
    }
    Ok(())
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [run_dir(home), logs_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    write_line(writer, &payload).await
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> Result<(), DaemonError> {
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
