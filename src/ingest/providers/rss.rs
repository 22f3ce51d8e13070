use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::ingest::{normalize_text, types::SourceProvider};
use crate::models::RawItem;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(default)]
    title: Option<String>,
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Guid>,
    author: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Guid {
    #[serde(rename = "$text", default)]
    value: String,
}

// Atom 1.0

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(default)]
    title: Option<AtomText>,
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

/// Text construct; `type="html"` bodies arrive entity-decoded in `value`.
#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    id: Option<String>,
    title: Option<AtomText>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<AtomText>,
    content: Option<AtomText>,
    author: Option<AtomAuthor>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href", default)]
    href: String,
    #[serde(rename = "@rel", default)]
    rel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomAuthor {
    name: Option<String>,
}

impl AtomEntry {
    /// The `alternate` link (or a link without `rel`), else the first one.
    fn link(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
            .or_else(|| self.links.first())
            .map(|l| l.href.trim())
    }
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let dt = OffsetDateTime::parse(ts.trim(), &Rfc2822).ok()?;
    DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), dt.nanosecond())
}

fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Local name of the document element, skipping the prolog.
fn root_element(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

fn feed_name(title: Option<&str>, fallback_name: &str) -> String {
    title
        .map(normalize_text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| fallback_name.to_string())
}

/// Parse one RSS 2.0 or Atom 1.0 document into items. `source` is
/// `rss:<channel/feed title>`, falling back to `fallback_name` when untitled.
pub fn parse_feed(xml: &str, fallback_name: &str, collected_at: DateTime<Utc>) -> Result<Vec<RawItem>> {
    let t0 = std::time::Instant::now();
    let xml_clean = scrub_html_entities_for_xml(xml);
    let out = match root_element(&xml_clean).as_deref() {
        Some("feed") => parse_atom(&xml_clean, fallback_name, collected_at)?,
        _ => parse_rss(&xml_clean, fallback_name, collected_at)?,
    };
    histogram!("collector_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(out)
}

fn parse_rss(xml: &str, fallback_name: &str, collected_at: DateTime<Utc>) -> Result<Vec<RawItem>> {
    let rss: Rss = from_str(xml).context("parsing rss xml")?;

    let channel_title = feed_name(rss.channel.title.as_deref(), fallback_name);
    let source = format!("rss:{channel_title}");

    let mut out = Vec::with_capacity(rss.channel.items.len());
    for it in rss.channel.items {
        let title = normalize_text(it.title.as_deref().unwrap_or_default());
        let content = normalize_text(it.description.as_deref().unwrap_or_default());
        if title.is_empty() && content.is_empty() {
            continue;
        }

        out.push(RawItem {
            source: source.clone(),
            source_id: it.guid.map(|g| g.value.trim().to_string()).unwrap_or_default(),
            author: it
                .author
                .map(|a| normalize_text(&a))
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| channel_title.clone()),
            title,
            content,
            url: it.link.map(|l| l.trim().to_string()).unwrap_or_default(),
            published_at: it
                .pub_date
                .as_deref()
                .and_then(parse_rfc2822)
                .unwrap_or(collected_at),
            collected_at,
        });
    }
    Ok(out)
}

fn parse_atom(xml: &str, fallback_name: &str, collected_at: DateTime<Utc>) -> Result<Vec<RawItem>> {
    let feed: AtomFeed = from_str(xml).context("parsing atom xml")?;

    let feed_title = feed_name(feed.title.as_ref().map(|t| t.value.as_str()), fallback_name);
    let source = format!("rss:{feed_title}");

    let mut out = Vec::with_capacity(feed.entries.len());
    for entry in feed.entries {
        let title = normalize_text(entry.title.as_ref().map(|t| t.value.as_str()).unwrap_or_default());
        let body = entry
            .content
            .as_ref()
            .map(|c| c.value.as_str())
            .filter(|c| !c.trim().is_empty())
            .or(entry.summary.as_ref().map(|s| s.value.as_str()))
            .unwrap_or_default();
        let content = normalize_text(body);
        if title.is_empty() && content.is_empty() {
            continue;
        }

        out.push(RawItem {
            source: source.clone(),
            source_id: entry.id.as_deref().map(str::trim).unwrap_or_default().to_string(),
            author: entry
                .author
                .as_ref()
                .and_then(|a| a.name.as_deref())
                .map(normalize_text)
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| feed_title.clone()),
            url: entry.link().unwrap_or_default().to_string(),
            published_at: entry
                .published
                .as_deref()
                .or(entry.updated.as_deref())
                .and_then(parse_rfc3339)
                .unwrap_or(collected_at),
            title,
            content,
            collected_at,
        });
    }
    Ok(out)
}

/// RSS 2.0 feeds fetched over HTTP. One failing feed is skipped; the provider
/// fails only when every feed failed.
pub struct RssProvider {
    feeds: Vec<String>,
    client: reqwest::Client,
}

impl RssProvider {
    pub fn new(feeds: Vec<String>) -> Self {
        Self {
            feeds,
            client: super::http_client(30),
        }
    }

    async fn fetch_feed(&self, url: &str) -> Result<Vec<RawItem>> {
        let body = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("rss http get {url}"))?
            .error_for_status()
            .with_context(|| format!("rss http status {url}"))?
            .text()
            .await
            .context("rss http .text()")?;
        parse_feed(&body, url, Utc::now())
    }
}

#[async_trait]
impl SourceProvider for RssProvider {
    async fn collect(&self) -> Result<Vec<RawItem>> {
        let mut out = Vec::new();
        let mut failures = 0usize;
        let mut last_err = None;

        for url in &self.feeds {
            match self.fetch_feed(url).await {
                Ok(mut items) => out.append(&mut items),
                Err(e) => {
                    tracing::warn!(target: "ingest", error = ?e, feed = %url, "rss feed failed");
                    counter!("collector_source_errors_total", "source" => "rss").increment(1);
                    failures += 1;
                    last_err = Some(e);
                }
            }
        }

        if !self.feeds.is_empty() && failures == self.feeds.len() {
            return Err(last_err.unwrap_or_else(|| anyhow!("all rss feeds failed")))
                .context("all rss feeds failed");
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "rss"
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}
