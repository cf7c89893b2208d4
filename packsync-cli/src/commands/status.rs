//! `packsync status` — per-scope rollout visibility.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::{json, Value};
use tabled::{settings::Style, Table, Tabled};

use packsync_core::config;
use packsync_daemon::{request_status, DaemonError};
use packsync_engine::store;

/// Arguments for `packsync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct ScopeRow {
    #[tabled(rename = "scope")]
    scope: String,
    #[tabled(rename = "active version")]
    version: String,
    #[tabled(rename = "hash")]
    hash: String,
    #[tabled(rename = "phase")]
    phase: String,
    #[tabled(rename = "last reconcile")]
    last_reconcile: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;

        match request_status(&home) {
            Ok(payload) => {
                if self.json {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&payload)
                            .context("failed to render status JSON")?
                    );
                } else {
                    print_daemon_status(&payload);
                }
                Ok(())
            }
            Err(DaemonError::DaemonNotRunning { .. }) => offline_status(&home, self.json),
            Err(err) => Err(err).context("failed to query daemon status"),
        }
    }
}

fn print_daemon_status(payload: &Value) {
    let (native, translated) = (
        payload["sessions"]["native"].as_u64().unwrap_or(0),
        payload["sessions"]["translated"].as_u64().unwrap_or(0),
    );
    println!(
        "packsync v{} | daemon {} | {} native / {} translated sessions",
        env!("CARGO_PKG_VERSION"),
        "running".green(),
        native,
        translated,
    );

    let scopes = payload["scopes"].as_array().cloned().unwrap_or_default();
    if scopes.is_empty() {
        println!("No scopes configured. Run `packsync init` first.");
        return;
    }

    let rows: Vec<ScopeRow> = scopes
        .iter()
        .map(|scope| ScopeRow {
            scope: scope["name"].as_str().unwrap_or("?").to_owned(),
            version: scope["active_version"]
                .as_str()
                .unwrap_or("—")
                .to_owned(),
            hash: scope["active_hash"]
                .as_str()
                .map(|h| h.chars().take(12).collect())
                .unwrap_or_else(|| "—".to_owned()),
            phase: scope["phase"].as_str().unwrap_or("idle").to_owned(),
            last_reconcile: match scope["last_reconcile_at_unix"].as_u64() {
                Some(0) | None => "never".to_owned(),
                Some(unix) => chrono::DateTime::from_timestamp(unix as i64, 0)
                    .map(super::format_age)
                    .unwrap_or_else(|| "?".to_owned()),
            },
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::sharp());
    println!("{table}");
}

/// Daemon is down: report what the on-disk store knows.
fn offline_status(home: &std::path::Path, as_json: bool) -> Result<()> {
    let config = match config::load_at(home) {
        Ok(config) => config,
        Err(packsync_core::ConfigError::ConfigNotFound { path }) => {
            println!("No config found at {}. Run `packsync init` first.", path.display());
            return Ok(());
        }
        Err(err) => return Err(err).context("failed to load config"),
    };

    if as_json {
        let scopes: Vec<Value> = config
            .scopes
            .iter()
            .map(|scope| {
                let active = store::active_record_at(home, &scope.name).ok();
                json!({
                    "name": scope.name.0,
                    "repo": scope.repo.to_string(),
                    "active_version": active.as_ref().map(|r| r.version.clone()),
                    "active_hash": active.as_ref().map(|r| r.content_hash.0.clone()),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "running": false, "scopes": scopes }))
                .context("failed to render status JSON")?
        );
        return Ok(());
    }

    println!(
        "packsync v{} | daemon {}",
        env!("CARGO_PKG_VERSION"),
        "not running".red(),
    );

    if config.scopes.is_empty() {
        println!("No scopes configured.");
        return Ok(());
    }

    let rows: Vec<ScopeRow> = config
        .scopes
        .iter()
        .map(|scope| {
            let active = store::active_record_at(home, &scope.name).ok();
            ScopeRow {
                scope: scope.name.0.clone(),
                version: active
                    .as_ref()
                    .map(|r| r.version.clone())
                    .unwrap_or_else(|| "—".to_owned()),
                hash: active
                    .as_ref()
                    .map(|r| r.content_hash.short().to_owned())
                    .unwrap_or_else(|| "—".to_owned()),
                phase: "—".to_owned(),
                last_reconcile: active
                    .as_ref()
                    .and_then(|r| r.activated_at)
                    .map(super::format_age)
                    .unwrap_or_else(|| "never".to_owned()),
            }
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::sharp());
    println!("{table}");
    Ok(())
}
