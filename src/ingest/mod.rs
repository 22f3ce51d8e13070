// src/ingest/mod.rs
pub mod providers;
pub mod scheduler;
pub mod types;

pub use scheduler::{CollectorScheduler, CycleReport, SourceReport};
pub use types::SourceProvider;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;

/// Longest body we keep for a single item.
pub const MAX_CONTENT_CHARS: usize = 8_000;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("collector_cycles_total", "Collector cycles run.");
        describe_counter!(
            "collector_items_inserted_total",
            "Items stored for the first time."
        );
        describe_counter!(
            "collector_items_duplicate_total",
            "Items dropped as already stored."
        );
        describe_counter!(
            "collector_save_errors_total",
            "Items that failed to store."
        );
        describe_counter!(
            "collector_source_errors_total",
            "Source adapter fetch/parse errors."
        );
        describe_histogram!("collector_parse_ms", "Feed parse time in milliseconds.");
        describe_gauge!(
            "collector_last_run_ts",
            "Unix ts when the collector last finished a cycle."
        );
    });
}

static RE_TAGS: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").ok());
static RE_WS: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\s+").ok());

/// Normalize feed text: decode entities, strip tags, ASCII quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    if let Some(re) = RE_TAGS.as_ref() {
        out = re.replace_all(&out, " ").into_owned();
    }
    // entities double-encoded inside CDATA show up after the first pass
    if out.contains('&') {
        out = html_escape::decode_html_entities(&out).to_string();
    }

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    if let Some(re) = RE_WS.as_ref() {
        out = re.replace_all(&out, " ").into_owned();
    }
    out = out.trim().to_string();

    if out.chars().count() > MAX_CONTENT_CHARS {
        out = out.chars().take(MAX_CONTENT_CHARS).collect();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_collapses_ws_and_entities() {
        let s = "  Hello,&nbsp;&nbsp; world!  ";
        assert_eq!(normalize_text(s), "Hello, world!");
    }

    #[test]
    fn normalize_text_strips_tags_and_quotes() {
        let s = "<p>Fed’s <b>“pause”</b></p>\n<br/>holds";
        assert_eq!(normalize_text(s), "Fed's \"pause\" holds");
    }

    #[test]
    fn normalize_text_caps_length() {
        let s = "a".repeat(MAX_CONTENT_CHARS + 10);
        assert_eq!(normalize_text(&s).len(), MAX_CONTENT_CHARS);
    }
}
