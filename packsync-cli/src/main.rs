//! packsync — resource pack synchronization CLI.
//!
//! # Usage
//!
//! ```text
//! packsync init --repo <owner/name> [--scope <name>]
//! packsync status [--json]
//! packsync active [<scope>]
//! packsync reconcile [<scope>]
//! packsync rollback <scope>
//! packsync cancel <scope>
//! packsync reload
//! packsync daemon start|stop|status|logs
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    active::ActiveArgs,
    control::{CancelArgs, ReconcileArgs, RollbackArgs},
    daemon::DaemonCommand,
    init::InitArgs,
    status::StatusArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "packsync",
    version,
    about = "Synchronize server resource packs from upstream releases",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write an initial config.yaml with one scope.
    Init(InitArgs),

    /// Show per-scope active versions and daemon state.
    Status(StatusArgs),

    /// List stored pack records for a scope.
    Active(ActiveArgs),

    /// Trigger a reconciliation cycle now.
    Reconcile(ReconcileArgs),

    /// Reactivate the previously active pack record.
    Rollback(RollbackArgs),

    /// Cancel an in-flight reconciliation.
    Cancel(CancelArgs),

    /// Ask the daemon to re-read config.yaml.
    Reload,

    /// Manage the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Active(args) => args.run(),
        Commands::Reconcile(args) => args.run(),
        Commands::Rollback(args) => args.run(),
        Commands::Cancel(args) => args.run(),
        Commands::Reload => commands::control::run_reload(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
