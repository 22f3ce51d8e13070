//! # Domain records
//! Items flow `RawItem` (adapter output) → `StoredItem` (gateway row) →
//! `AnalysisResult` (engine output) → `Alert` (high impact only).
//!
//! Labels are small closed enums persisted as lowercase text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized item as produced by a source adapter. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawItem {
    /// Source identifier, e.g. "reddit:r/stocks" or "rss:Reuters Business".
    pub source: String,
    /// Id unique within `source`; empty when the source has no stable ids.
    pub source_id: String,
    pub author: String,
    pub title: String,
    pub content: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub collected_at: DateTime<Utc>,
}

impl RawItem {
    /// Identity used for deduplication: the source-native id, or a content hash
    /// when the source does not provide one.
    pub fn identity(&self) -> String {
        let native = self.source_id.trim();
        if !native.is_empty() {
            return native.to_string();
        }
        content_hash(&[&self.source, &self.url, &self.title, &self.content])
    }
}

/// Stable short hex digest over the given parts (16 bytes of SHA-256).
pub fn content_hash(parts: &[&str]) -> String {
    use sha2::{Digest, Sha256};
    use std::fmt::Write as _;

    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p.as_bytes());
        // separator so ("ab","c") and ("a","bc") differ
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// A persisted item. `processed` flips to true exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredItem {
    pub id: String,
    pub source: String,
    pub source_id: String,
    pub author: String,
    pub title: String,
    pub content: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub collected_at: DateTime<Utc>,
    pub processed: bool,
    /// Failed analysis attempts so far (retry budget).
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl StoredItem {
    /// Title and body joined; what the tagger scans.
    pub fn full_text(&self) -> String {
        if self.title.is_empty() {
            self.content.clone()
        } else {
            format!("{} {}", self.title, self.content)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        }
    }

    /// Lenient label parsing for model output; anything unknown is neutral.
    pub fn from_label(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" | "bullish" => Sentiment::Positive,
            "negative" | "bearish" => Sentiment::Negative,
            _ => Sentiment::Neutral,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    High,
    Medium,
    Low,
}

impl Impact {
    pub fn as_str(&self) -> &'static str {
        match self {
            Impact::High => "high",
            Impact::Medium => "medium",
            Impact::Low => "low",
        }
    }

    /// Lenient label parsing for model output; anything unknown is low.
    pub fn from_label(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Impact::High,
            "medium" | "moderate" => Impact::Medium,
            _ => Impact::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn from_label(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("critical") {
            Severity::Critical
        } else {
            Severity::High
        }
    }
}

macro_rules! display_as_str {
    ($($t:ty),*) => {
        $(impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}
display_as_str!(Sentiment, Impact, Severity);

/// Per-instrument impact reported by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockImpact {
    pub symbol: String,
    /// Signed score in [-10, 10]; negative is bearish.
    pub score: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub timeframe: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub id: String,
    pub news_id: String,
    pub sentiment: Sentiment,
    /// Mean of the per-stock scores; 0 when no stocks were reported.
    pub sentiment_score: f64,
    pub impact: Impact,
    pub summary: String,
    pub confidence: f64,
    pub stocks: Vec<StockImpact>,
    /// Union of model-reported and tagger-derived symbols.
    pub related_stocks: Vec<String>,
    pub raw_response: String,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: String,
    pub news_id: String,
    pub analysis_id: String,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub stocks: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
}

/// Report rows are written by a downstream reporting job; this crate only reads them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub id: String,
    #[serde(rename = "type")]
    pub report_type: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub summary: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Aggregated view over recent analyses mentioning one symbol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockSentiment {
    pub symbol: String,
    pub total_mentions: u32,
    pub positive_count: u32,
    pub negative_count: u32,
    pub neutral_count: u32,
    pub overall_score: f64,
    pub recent_news: Vec<StoredItem>,
    pub last_updated: DateTime<Utc>,
}

/// Backlog health signal: how many items wait and since when.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnprocessedStats {
    pub count: u64,
    pub oldest_collected_at: Option<DateTime<Utc>>,
}

impl UnprocessedStats {
    pub fn oldest_age_secs(&self, now: DateTime<Utc>) -> u64 {
        self.oldest_collected_at
            .map(|t| now.signed_duration_since(t).num_seconds().max(0) as u64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(source_id: &str, content: &str) -> RawItem {
        RawItem {
            source: "rss:Test".into(),
            source_id: source_id.into(),
            author: "desk".into(),
            title: "Title".into(),
            content: content.into(),
            url: "https://example.com/a".into(),
            published_at: Utc::now(),
            collected_at: Utc::now(),
        }
    }

    #[test]
    fn identity_prefers_native_id() {
        assert_eq!(raw("abc", "x").identity(), "abc");
    }

    #[test]
    fn identity_falls_back_to_stable_content_hash() {
        let a = raw("", "same body");
        let b = raw("  ", "same body");
        let c = raw("", "other body");
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), c.identity());
        assert_eq!(a.identity().len(), 32);
    }

    #[test]
    fn labels_parse_leniently() {
        assert_eq!(Sentiment::from_label(" Positive "), Sentiment::Positive);
        assert_eq!(Sentiment::from_label("mixed"), Sentiment::Neutral);
        assert_eq!(Impact::from_label("HIGH"), Impact::High);
        assert_eq!(Impact::from_label("??"), Impact::Low);
        assert_eq!(Severity::from_label("Critical"), Severity::Critical);
        assert_eq!(Impact::High.to_string(), "high");
    }
}
