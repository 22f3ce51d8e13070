pub mod nitter;
pub mod reddit;
pub mod rss;

pub use nitter::NitterProvider;
pub use reddit::RedditProvider;
pub use rss::RssProvider;

use std::sync::Arc;

use super::SourceProvider;
use crate::config::CollectorConfig;

/// Shared HTTP client for feed fetching.
pub(crate) fn http_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(concat!("market-sentinel/", env!("CARGO_PKG_VERSION")))
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(target: "ingest", error = %e, "feed http client fell back to defaults");
            reqwest::Client::new()
        })
}

/// Enabled adapters, in a fixed order (RSS, Reddit, then Twitter).
pub fn from_config(cfg: &CollectorConfig) -> Vec<Arc<dyn SourceProvider>> {
    let mut sources: Vec<Arc<dyn SourceProvider>> = Vec::new();
    if cfg.rss.enabled && !cfg.rss.feeds.is_empty() {
        sources.push(Arc::new(RssProvider::new(cfg.rss.feeds.clone())));
    }
    if cfg.reddit.enabled && !cfg.reddit.subreddits.is_empty() {
        sources.push(Arc::new(RedditProvider::new(
            cfg.reddit.subreddits.clone(),
            cfg.reddit.sort.clone(),
            cfg.reddit.limit,
        )));
    }
    if cfg.twitter.enabled && !cfg.twitter.accounts.is_empty() {
        sources.push(Arc::new(NitterProvider::new(
            cfg.twitter.accounts.clone(),
            cfg.twitter.nitter_hosts.clone(),
        )));
    }
    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RedditConfig, RssConfig, TwitterConfig};

    #[test]
    fn disabled_or_empty_sources_are_skipped() {
        let mut cfg = CollectorConfig::default();
        assert!(from_config(&cfg).is_empty());

        cfg.rss = RssConfig {
            enabled: true,
            feeds: vec![],
        };
        assert!(from_config(&cfg).is_empty());

        cfg.rss.feeds.push("http://127.0.0.1:1/feed.xml".into());
        cfg.reddit = RedditConfig {
            enabled: true,
            ..RedditConfig::default()
        };
        cfg.twitter = TwitterConfig {
            enabled: true,
            ..TwitterConfig::default()
        };
        // no accounts configured
        let names: Vec<String> = from_config(&cfg).iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["rss", "reddit"]);

        cfg.twitter.accounts.push("unusual_whales".into());
        let names: Vec<String> = from_config(&cfg).iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["rss", "reddit", "twitter"]);
    }
}
