//! Daemon control commands: `reconcile`, `rollback`, `cancel`, `reload`.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::Value;

use packsync_daemon::{
    request_cancel, request_reconcile, request_reload, request_rollback, DaemonError,
};

/// Trigger a reconciliation cycle now.
#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Scope to reconcile; all configured scopes when omitted.
    pub scope: Option<String>,
}

impl ReconcileArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        match request_reconcile(&home, self.scope) {
            Ok(reports) => {
                for report in reports.as_array().into_iter().flatten() {
                    print_report(report);
                }
                Ok(())
            }
            Err(err) => daemon_required(err, "reconcile"),
        }
    }
}

/// Reactivate the previously active pack record.
#[derive(Args, Debug)]
pub struct RollbackArgs {
    /// Scope to roll back.
    pub scope: String,
}

impl RollbackArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        match request_rollback(&home, self.scope.clone()) {
            Ok(payload) => {
                println!(
                    "✓ '{}' rolled back to {} ({})",
                    self.scope,
                    payload["version"].as_str().unwrap_or("?"),
                    payload["hash"]
                        .as_str()
                        .map(|h| &h[..h.len().min(12)])
                        .unwrap_or("?"),
                );
                Ok(())
            }
            Err(err) => daemon_required(err, "rollback"),
        }
    }
}

/// Cancel an in-flight reconciliation.
#[derive(Args, Debug)]
pub struct CancelArgs {
    /// Scope whose cycle should be cancelled.
    pub scope: String,
}

impl CancelArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        match request_cancel(&home, self.scope.clone()) {
            Ok(payload) => {
                if payload["cancelled"].as_bool().unwrap_or(false) {
                    println!("✓ cancellation requested for '{}'", self.scope);
                } else {
                    println!("no reconciliation in flight for '{}'", self.scope);
                }
                Ok(())
            }
            Err(err) => daemon_required(err, "cancel"),
        }
    }
}

pub fn run_reload() -> Result<()> {
    let home = home()?;
    match request_reload(&home) {
        Ok(payload) => {
            println!(
                "✓ config reloaded ({} scopes, poll every {}s)",
                payload["scopes"].as_u64().unwrap_or(0),
                payload["poll_interval_secs"].as_u64().unwrap_or(0),
            );
            Ok(())
        }
        Err(err) => daemon_required(err, "reload"),
    }
}

fn print_report(report: &Value) {
    let scope = report["scope"].as_str().unwrap_or("?");
    let outcome = report["outcome"].as_str().unwrap_or("?");
    match outcome {
        "activated" => {
            let totals = &report["totals"];
            println!(
                "✓ '{scope}' activated {} ({} accepted, {} rejected, {} timed out, {} skipped)",
                report["version"].as_str().unwrap_or("?"),
                totals["accepted"].as_u64().unwrap_or(0),
                totals["rejected"].as_u64().unwrap_or(0),
                totals["timed_out"].as_u64().unwrap_or(0),
                totals["skipped_incompatible"].as_u64().unwrap_or(0),
            );
        }
        "up_to_date" => println!(
            "· '{scope}' already at {}",
            report["version"].as_str().unwrap_or("?")
        ),
        "already_running" => println!("· '{scope}' reconciliation already in flight"),
        other => println!("· '{scope}' {other}"),
    }
}

fn home() -> Result<std::path::PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

fn daemon_required(err: DaemonError, action: &str) -> Result<()> {
    match err {
        DaemonError::DaemonNotRunning { .. } => {
            println!("daemon is not running; start it with `packsync daemon start`");
            Ok(())
        }
        err => Err(err).context(format!("failed to {action}")),
    }
}
