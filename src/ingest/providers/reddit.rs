use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::Deserialize;

use crate::ingest::{normalize_text, types::SourceProvider};
use crate::models::RawItem;

pub const DEFAULT_BASE_URL: &str = "https://www.reddit.com";

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    permalink: String,
    #[serde(default)]
    created_utc: f64,
    #[serde(default)]
    stickied: bool,
}

/// Parse a subreddit JSON listing. Stickied posts are skipped.
pub fn parse_listing(json: &str, subreddit: &str, collected_at: DateTime<Utc>) -> Result<Vec<RawItem>> {
    let t0 = std::time::Instant::now();
    let listing: Listing = serde_json::from_str(json).context("parsing reddit listing")?;
    let source = format!("reddit:r/{subreddit}");

    let out = listing
        .data
        .children
        .into_iter()
        .map(|c| c.data)
        .filter(|p| !p.stickied && !p.id.is_empty())
        .map(|p| RawItem {
            source: source.clone(),
            source_id: p.id,
            author: format!("u/{}", p.author),
            title: normalize_text(&p.title),
            content: normalize_text(&p.selftext),
            url: format!("https://reddit.com{}", p.permalink),
            published_at: DateTime::<Utc>::from_timestamp(p.created_utc as i64, 0)
                .unwrap_or(collected_at),
            collected_at,
        })
        .collect();

    histogram!("collector_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(out)
}

/// Subreddit listings via the public JSON endpoint.
pub struct RedditProvider {
    subreddits: Vec<String>,
    sort: String,
    limit: u32,
    base_url: String,
    client: reqwest::Client,
}

impl RedditProvider {
    pub fn new(subreddits: Vec<String>, sort: impl Into<String>, limit: u32) -> Self {
        Self {
            subreddits,
            sort: sort.into(),
            limit: limit.clamp(1, 100),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: super::http_client(30),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn listing_url(&self, subreddit: &str) -> String {
        format!(
            "{}/r/{}/{}.json?limit={}",
            self.base_url, subreddit, self.sort, self.limit
        )
    }

    async fn fetch_subreddit(&self, subreddit: &str) -> Result<Vec<RawItem>> {
        let url = self.listing_url(subreddit);
        let body = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("reddit http get {url}"))?
            .error_for_status()
            .with_context(|| format!("reddit http status {url}"))?
            .text()
            .await
            .context("reddit http .text()")?;
        parse_listing(&body, subreddit, Utc::now())
    }
}

#[async_trait]
impl SourceProvider for RedditProvider {
    async fn collect(&self) -> Result<Vec<RawItem>> {
        let mut out = Vec::new();
        let mut failures = 0usize;
        let mut last_err = None;

        for sub in &self.subreddits {
            match self.fetch_subreddit(sub).await {
                Ok(mut items) => out.append(&mut items),
                Err(e) => {
                    tracing::warn!(target: "ingest", error = ?e, subreddit = %sub, "reddit fetch failed");
                    counter!("collector_source_errors_total", "source" => "reddit").increment(1);
                    failures += 1;
                    last_err = Some(e);
                }
            }
        }

        if !self.subreddits.is_empty() && failures == self.subreddits.len() {
            return Err(last_err.unwrap_or_else(|| anyhow!("all subreddits failed")))
                .context("all subreddits failed");
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "reddit"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"{
      "kind": "Listing",
      "data": {
        "children": [
          {"kind": "t3", "data": {"id": "pinned", "title": "Daily thread", "stickied": true,
            "author": "AutoModerator", "permalink": "/r/stocks/comments/pinned/", "created_utc": 1718000000.0}},
          {"kind": "t3", "data": {"id": "1abc", "title": "TSLA deliveries &amp; margins",
            "selftext": "Q2 numbers look strong", "author": "trader42",
            "permalink": "/r/stocks/comments/1abc/tsla/", "created_utc": 1718030000.0}}
        ]
      }
    }"#;

    #[test]
    fn parses_posts_and_skips_stickied() {
        let items = parse_listing(LISTING, "stocks", Utc::now()).unwrap();
        assert_eq!(items.len(), 1);
        let it = &items[0];
        assert_eq!(it.source, "reddit:r/stocks");
        assert_eq!(it.source_id, "1abc");
        assert_eq!(it.author, "u/trader42");
        assert_eq!(it.title, "TSLA deliveries & margins");
        assert_eq!(it.url, "https://reddit.com/r/stocks/comments/1abc/tsla/");
        assert_eq!(it.published_at.timestamp(), 1_718_030_000);
    }

    #[test]
    fn listing_url_uses_sort_and_limit() {
        let p = RedditProvider::new(vec!["wallstreetbets".into()], "new", 500)
            .with_base_url("http://127.0.0.1:9/");
        assert_eq!(
            p.listing_url("wallstreetbets"),
            "http://127.0.0.1:9/r/wallstreetbets/new.json?limit=100"
        );
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_listing("<html>", "stocks", Utc::now()).is_err());
    }
}
