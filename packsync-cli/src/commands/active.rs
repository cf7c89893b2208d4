//! `packsync active [<scope>]` — stored pack records for a scope.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use packsync_core::types::ScopeId;
use packsync_engine::store;

/// List stored pack records for a scope.
#[derive(Args, Debug)]
pub struct ActiveArgs {
    /// Scope to inspect.
    #[arg(default_value = "global")]
    pub scope: String,
}

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = " ")]
    marker: String,
    #[tabled(rename = "version")]
    version: String,
    #[tabled(rename = "hash")]
    hash: String,
    #[tabled(rename = "size")]
    size: String,
    #[tabled(rename = "committed")]
    committed: String,
    #[tabled(rename = "activated")]
    activated: String,
}

impl ActiveArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let scope = ScopeId::from(self.scope.clone());

        let state = store::load_state_at(&home, &scope)
            .with_context(|| format!("failed to load state for scope '{}'", self.scope))?;
        if state.records.is_empty() {
            println!("No pack records stored for scope '{}'.", self.scope);
            return Ok(());
        }

        let rows: Vec<RecordRow> = state
            .records
            .iter()
            .map(|record| {
                let is_active = state.active.as_ref() == Some(&record.content_hash);
                RecordRow {
                    marker: if is_active {
                        "●".green().to_string()
                    } else {
                        " ".to_owned()
                    },
                    version: record.version.clone(),
                    hash: record.content_hash.short().to_owned(),
                    size: format_size(record.size_bytes),
                    committed: super::format_age(record.committed_at),
                    activated: record
                        .activated_at
                        .map(super::format_age)
                        .unwrap_or_else(|| "—".to_owned()),
                }
            })
            .collect();

        let mut table = Table::new(rows);
        table.with(Style::sharp());
        println!("{table}");
        Ok(())
    }
}

fn format_size(bytes: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= 1024 {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_render_in_binary_units() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(5 * 1024 * 1024 + 512 * 1024), "5.5 MiB");
    }
}
