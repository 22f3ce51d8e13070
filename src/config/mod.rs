// src/config/mod.rs
//! TOML configuration (`config/sentinel.toml`) with environment overrides.
//!
//! Resolution order: file (or defaults if missing) → `SENTINEL_*` env → validation.

pub mod ai;

pub use ai::ModelConfig;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

pub const DEFAULT_CONFIG_PATH: &str = "config/sentinel.toml";
const ENV_PATH: &str = "SENTINEL_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub storage: StorageConfig,
    pub collector: CollectorConfig,
    pub analyzer: AnalyzerConfig,
    pub model: ModelConfig,
    pub server: ServerConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database: String,
    pub max_attempts: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: "sqlite://data/sentinel.db".to_string(),
            max_attempts: crate::store::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub scan_interval_secs: u64,
    pub rss: RssConfig,
    pub reddit: RedditConfig,
    pub twitter: TwitterConfig,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 900,
            rss: RssConfig::default(),
            reddit: RedditConfig::default(),
            twitter: TwitterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RssConfig {
    pub enabled: bool,
    pub feeds: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedditConfig {
    pub enabled: bool,
    pub subreddits: Vec<String>,
    pub sort: String,
    pub limit: u32,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            subreddits: vec!["stocks".into(), "investing".into(), "wallstreetbets".into()],
            sort: "hot".to_string(),
            limit: 25,
        }
    }
}

/// X/Twitter accounts fetched through Nitter RSS mirrors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TwitterConfig {
    pub enabled: bool,
    pub accounts: Vec<String>,
    /// Tried in order for each account.
    pub nitter_hosts: Vec<String>,
}

impl Default for TwitterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            accounts: Vec::new(),
            nitter_hosts: crate::ingest::providers::nitter::DEFAULT_HOSTS
                .iter()
                .map(|h| h.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub poll_interval_secs: u64,
    pub workers: usize,
    pub batch_multiplier: usize,
    pub item_timeout_secs: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            workers: 3,
            batch_multiplier: 2,
            item_timeout_secs: 120,
        }
    }
}

impl AnalyzerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Accepted bearer tokens; empty leaves the API open.
    pub tokens: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            tokens: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub channel_capacity: usize,
    pub cooldown_secs: i64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            cooldown_secs: 600,
        }
    }
}

impl SentinelConfig {
    /// Load from an explicit path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("reading config from {}", path.display()))?;
            toml::from_str::<SentinelConfig>(&content)
                .with_context(|| format!("parsing config {}", path.display()))?
        } else {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            SentinelConfig::default()
        };
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load using `--config` (if given), then `$SENTINEL_CONFIG`, then the default path.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => env::var(ENV_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
        };
        Self::load_from(&path)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_nonempty("SENTINEL_DATABASE") {
            self.storage.database = v;
        }
        if let Some(v) = env_nonempty("SENTINEL_MODEL_PROVIDER") {
            self.model.provider = v;
        }
        if let Some(v) = env_nonempty("SENTINEL_MODEL") {
            self.model.model = v;
        }
        if let Some(v) = env_nonempty("SENTINEL_API_TOKEN") {
            if !self.server.tokens.contains(&v) {
                self.server.tokens.push(v);
            }
        }
        if let Some(v) = env_nonempty("SENTINEL_PORT") {
            self.server.port = v
                .parse()
                .with_context(|| format!("SENTINEL_PORT is not a port number: {v}"))?;
        }
        Ok(())
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        let a = &self.analyzer;
        if a.workers == 0 {
            bail!("analyzer.workers must be >= 1");
        }
        if a.batch_multiplier == 0 {
            bail!("analyzer.batch_multiplier must be >= 1");
        }
        if a.poll_interval_secs == 0 || a.item_timeout_secs == 0 {
            bail!("analyzer intervals must be >= 1s");
        }
        if self.collector.scan_interval_secs == 0 {
            bail!("collector.scan_interval_secs must be >= 1");
        }
        if self.collector.twitter.enabled && self.collector.twitter.nitter_hosts.is_empty() {
            bail!("collector.twitter.nitter_hosts must not be empty when twitter is enabled");
        }
        if self.storage.max_attempts == 0 {
            bail!("storage.max_attempts must be >= 1");
        }
        if self.notify.channel_capacity == 0 {
            bail!("notify.channel_capacity must be >= 1");
        }
        if self.storage.database.trim().is_empty() {
            bail!("storage.database must not be empty");
        }
        match self.model.provider.trim().to_lowercase().as_str() {
            "anthropic" | "openai" | "ollama" | "static" => {}
            other => bail!("unknown model provider: {other}"),
        }
        Ok(())
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = SentinelConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.analyzer.workers * cfg.analyzer.batch_multiplier, 6);
        assert_eq!(cfg.analyzer.item_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: SentinelConfig = toml::from_str(
            r#"
            [analyzer]
            workers = 5

            [collector.reddit]
            enabled = true
            subreddits = ["stocks"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.analyzer.workers, 5);
        assert_eq!(cfg.analyzer.poll_interval_secs, 10);
        assert!(cfg.collector.reddit.enabled);
        assert_eq!(cfg.collector.reddit.sort, "hot");
        assert_eq!(cfg.server.port, 8080);
        assert!(!cfg.collector.twitter.enabled);
        assert_eq!(cfg.collector.twitter.nitter_hosts.len(), 2);
    }

    #[test]
    fn twitter_needs_a_nitter_host() {
        let mut cfg: SentinelConfig = toml::from_str(
            r#"
            [collector.twitter]
            enabled = true
            accounts = ["DeItaone"]
            nitter_hosts = []
            "#,
        )
        .unwrap();
        assert!(cfg.validate().is_err());
        cfg.collector.twitter.nitter_hosts = vec!["https://nitter.example".into()];
        cfg.validate().unwrap();
    }

    #[test]
    fn zero_workers_rejected() {
        let mut cfg = SentinelConfig::default();
        cfg.analyzer.workers = 0;
        assert!(cfg.validate().is_err());
    }
}
