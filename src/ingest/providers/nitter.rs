//! X/Twitter accounts read through Nitter's per-account RSS
//! (`<host>/<account>/rss`). Hosts come and go, so each account is tried
//! against every configured host in order and the first answer wins.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;

use super::rss::parse_feed;
use crate::ingest::types::SourceProvider;
use crate::models::RawItem;

pub const DEFAULT_HOSTS: &[&str] = &["https://nitter.poast.org", "https://nitter.privacydev.net"];

const TWITTER_BASE: &str = "https://twitter.com";

static RE_STATUS: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"/status/(\d+)").ok());

/// Tweet id from a status URL on any host.
fn status_id(url: &str) -> Option<&str> {
    RE_STATUS
        .as_ref()?
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Parse one account feed served by `host`. Items are re-keyed on the tweet id
/// so the same tweet fetched from two hosts deduplicates, and links point back
/// at twitter.com.
pub fn parse_account_feed(
    xml: &str,
    account: &str,
    host: &str,
    collected_at: DateTime<Utc>,
) -> Result<Vec<RawItem>> {
    let items = parse_feed(xml, host, collected_at)?;
    Ok(items
        .into_iter()
        .map(|it| {
            let source_id = status_id(&it.url)
                .or_else(|| status_id(&it.source_id))
                .map(str::to_string)
                .unwrap_or(it.source_id);
            let content = if it.content.is_empty() {
                it.title.clone()
            } else {
                it.content
            };
            RawItem {
                source: format!("twitter:@{account}"),
                source_id,
                author: format!("@{account}"),
                title: it.title,
                content,
                url: it.url.replacen(host, TWITTER_BASE, 1),
                published_at: it.published_at,
                collected_at: it.collected_at,
            }
        })
        .collect())
}

pub struct NitterProvider {
    accounts: Vec<String>,
    hosts: Vec<String>,
    client: reqwest::Client,
}

impl NitterProvider {
    pub fn new(accounts: Vec<String>, hosts: Vec<String>) -> Self {
        Self {
            accounts: accounts
                .into_iter()
                .map(|a| a.trim().trim_start_matches('@').to_string())
                .filter(|a| !a.is_empty())
                .collect(),
            hosts: hosts
                .into_iter()
                .map(|h| h.trim().trim_end_matches('/').to_string())
                .filter(|h| !h.is_empty())
                .collect(),
            client: super::http_client(30),
        }
    }

    async fn fetch_from(&self, host: &str, account: &str) -> Result<Vec<RawItem>> {
        let url = format!("{host}/{account}/rss");
        let body = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("nitter http get {url}"))?
            .error_for_status()
            .with_context(|| format!("nitter http status {url}"))?
            .text()
            .await
            .context("nitter http .text()")?;
        parse_account_feed(&body, account, host, Utc::now())
    }

    async fn fetch_account(&self, account: &str) -> Result<Vec<RawItem>> {
        let mut last_err = None;
        for host in &self.hosts {
            match self.fetch_from(host, account).await {
                Ok(items) => return Ok(items),
                Err(e) => {
                    tracing::debug!(target: "ingest", error = ?e, host = %host, account, "nitter host failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("no nitter hosts configured")))
            .with_context(|| format!("all nitter hosts failed for @{account}"))
    }
}

#[async_trait]
impl SourceProvider for NitterProvider {
    async fn collect(&self) -> Result<Vec<RawItem>> {
        let mut out = Vec::new();
        let mut failures = 0usize;
        let mut last_err = None;

        for account in &self.accounts {
            match self.fetch_account(account).await {
                Ok(mut items) => out.append(&mut items),
                Err(e) => {
                    tracing::warn!(target: "ingest", error = ?e, account = %account, "twitter account failed");
                    counter!("collector_source_errors_total", "source" => "twitter").increment(1);
                    failures += 1;
                    last_err = Some(e);
                }
            }
        }

        if !self.accounts.is_empty() && failures == self.accounts.len() {
            return Err(last_err.unwrap_or_else(|| anyhow!("all twitter accounts failed")))
                .context("all twitter accounts failed");
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "twitter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Unusual Whales / @unusual_whales</title>
    <link>https://nitter.example/unusual_whales</link>
    <item>
      <title><![CDATA[BREAKING: $NVDA halted pending news]]></title>
      <description><![CDATA[<p>BREAKING: $NVDA halted pending news</p>]]></description>
      <pubDate>Tue, 10 Jun 2025 14:30:00 GMT</pubDate>
      <guid>https://nitter.example/unusual_whales/status/1800000000000000001#m</guid>
      <link>https://nitter.example/unusual_whales/status/1800000000000000001#m</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn items_are_rekeyed_on_tweet_id() {
        let items =
            parse_account_feed(FEED, "unusual_whales", "https://nitter.example", Utc::now()).unwrap();
        assert_eq!(items.len(), 1);
        let it = &items[0];
        assert_eq!(it.source, "twitter:@unusual_whales");
        assert_eq!(it.source_id, "1800000000000000001");
        assert_eq!(it.author, "@unusual_whales");
        assert_eq!(it.content, "BREAKING: $NVDA halted pending news");
        assert_eq!(
            it.url,
            "https://twitter.com/unusual_whales/status/1800000000000000001#m"
        );
    }

    #[test]
    fn same_tweet_from_two_hosts_has_one_identity() {
        let other = FEED.replace("https://nitter.example", "https://mirror.example");
        let a = parse_account_feed(FEED, "unusual_whales", "https://nitter.example", Utc::now()).unwrap();
        let b = parse_account_feed(&other, "unusual_whales", "https://mirror.example", Utc::now()).unwrap();
        assert_eq!(a[0].identity(), b[0].identity());
        assert_eq!(a[0].url, b[0].url);
    }

    #[test]
    fn accounts_and_hosts_are_cleaned() {
        let p = NitterProvider::new(
            vec!["@zerohedge".into(), " ".into()],
            vec!["https://nitter.example/".into()],
        );
        assert_eq!(p.accounts, vec!["zerohedge"]);
        assert_eq!(p.hosts, vec!["https://nitter.example"]);
    }
}
