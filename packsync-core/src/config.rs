//! YAML configuration layer.
//!
//! # Storage layout
//!
//! ```text
//! ~/.packsync/
//!   config.yaml   (human-editable — read at startup, re-read on reload)
//! ```
//!
//! # API pattern
//!
//! Every load/save function has two forms:
//! - `fn_at(home: &Path, …)` — explicit home; used in tests with `TempDir`
//! - `fn(…)` — derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::ScopeId;

// ---------------------------------------------------------------------------
// Repository reference
// ---------------------------------------------------------------------------

/// An `owner/name` reference into the upstream release host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl FromStr for RepoRef {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(owner, name))
            }
            _ => Err(ConfigError::InvalidRepo(s.to_owned())),
        }
    }
}

impl TryFrom<String> for RepoRef {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<RepoRef> for String {
    fn from(repo: RepoRef) -> Self {
        repo.to_string()
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// ---------------------------------------------------------------------------
// Config sections
// ---------------------------------------------------------------------------

/// One distribution scope: a release channel mapped to a pack audience.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeConfig {
    pub name: ScopeId,
    pub repo: RepoRef,
    /// Optional asset file-name filter; the first release asset when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
    /// Whether Translated (Bedrock-proxied) sessions may receive this pack.
    #[serde(default)]
    pub cross_platform: bool,
    /// Whether the proxy marks the pack as mandatory for the client.
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default = "default_prompt")]
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GithubConfig {
    /// Optional API token; unauthenticated requests work but rate-limit sooner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Upper byte bound for a single artifact download.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
        }
    }
}

/// Per-session delivery policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Worker-pool bound for concurrent session pushes.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            ack_timeout_secs: default_ack_timeout_secs(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            workers: default_workers(),
        }
    }
}

impl DeliveryConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Superseded records kept per scope (active + previous always survive).
    #[serde(default = "default_keep_records")]
    pub keep_records: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            keep_records: default_keep_records(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WebhookConfig {
    /// Rollout status callback URL; notifications are skipped when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

// ---------------------------------------------------------------------------
// Root config
// ---------------------------------------------------------------------------

/// Root of `config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub scopes: Vec<ScopeConfig>,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Poll ticks skipped after the upstream reports quota exhaustion.
    #[serde(default = "default_rate_limit_backoff_ticks")]
    pub rate_limit_backoff_ticks: u32,
    #[serde(default)]
    pub webhook: WebhookConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            github: GithubConfig::default(),
            scopes: Vec::new(),
            download: DownloadConfig::default(),
            delivery: DeliveryConfig::default(),
            retention: RetentionConfig::default(),
            rate_limit_backoff_ticks: default_rate_limit_backoff_ticks(),
            webhook: WebhookConfig::default(),
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Look up a scope by name.
    pub fn scope(&self, name: &ScopeId) -> Option<&ScopeConfig> {
        self.scopes.iter().find(|s| &s.name == name)
    }

    /// Reject duplicate scope names; called after every load.
    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for scope in &self.scopes {
            if !seen.insert(scope.name.0.as_str()) {
                return Err(ConfigError::DuplicateScope(scope.name.0.clone()));
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_prompt() -> String {
    "Please accept the server resource pack.".to_owned()
}

fn default_poll_interval_secs() -> u64 {
    600
}

fn default_max_bytes() -> u64 {
    256 * 1024 * 1024
}

fn default_ack_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_workers() -> usize {
    8
}

fn default_keep_records() -> usize {
    3
}

fn default_rate_limit_backoff_ticks() -> u32 {
    3
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.packsync/`
pub fn packsync_root(home: &Path) -> PathBuf {
    home.join(".packsync")
}

/// `<home>/.packsync/config.yaml` — pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    packsync_root(home).join("config.yaml")
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load config from `<home>/.packsync/config.yaml`.
///
/// Returns `ConfigError::ConfigNotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    let config: Config =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })?;
    config.validate()?;
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&home()?)
}

/// Atomically save config to `<home>/.packsync/config.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `rename`.
/// `.tmp` is always in the same directory as the target (same filesystem — no EXDEV).
pub fn save_at(home: &Path, config: &Config) -> Result<(), ConfigError> {
    config.validate()?;
    let path = config_path_at(home);
    let Some(dir) = path.parent() else {
        return Err(ConfigError::Io(std::io::Error::other("invalid config path")));
    };
    std::fs::create_dir_all(dir)?;

    let yaml = serde_yaml::to_string(config)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    save_at(&home()?, config)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
