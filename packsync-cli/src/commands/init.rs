//! `packsync init --repo <owner/name> [--scope <name>]`

use anyhow::{bail, Context, Result};
use clap::Args;

use packsync_core::config::{self, Config, RepoRef, ScopeConfig};
use packsync_core::types::ScopeId;

/// Write an initial config.yaml with one scope.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Upstream release repository, `owner/name`.
    #[arg(long)]
    pub repo: String,

    /// Scope name for the first configured pack.
    #[arg(long, default_value = "global")]
    pub scope: String,

    /// Overwrite an existing config.yaml.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let path = config::config_path_at(&home);
        if path.exists() && !self.force {
            bail!(
                "config already exists at {} (use --force to overwrite)",
                path.display()
            );
        }

        let repo: RepoRef = self
            .repo
            .parse()
            .with_context(|| format!("invalid repository '{}'", self.repo))?;

        let config = Config {
            scopes: vec![ScopeConfig {
                name: ScopeId::from(self.scope.clone()),
                repo: repo.clone(),
                asset: None,
                cross_platform: false,
                required: true,
                prompt: "Please accept the server resource pack.".to_owned(),
            }],
            ..Config::default()
        };
        config::save_at(&home, &config).context("failed to write config.yaml")?;

        println!("✓ Wrote {}", path.display());
        println!("  scope '{}' tracking {}", self.scope, repo);
        println!("  start the daemon with `packsync daemon start`");
        Ok(())
    }
}
