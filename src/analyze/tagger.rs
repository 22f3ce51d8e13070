// src/analyze/tagger.rs
//! Rule-based stock tagger: company aliases, macro/sector keywords and
//! explicit ticker tokens, unioned.
//!
//! Heuristic by nature. The ticker scan will produce false positives on
//! shouted text; the stoplist only removes the most common ones.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashSet};

/// Company / product / person alias → symbol.
const COMPANIES: &[(&str, &str)] = &[
    // Tech giants
    ("apple", "AAPL"),
    ("iphone", "AAPL"),
    ("ipad", "AAPL"),
    ("mac", "AAPL"),
    ("tim cook", "AAPL"),
    ("microsoft", "MSFT"),
    ("windows", "MSFT"),
    ("azure", "MSFT"),
    ("satya", "MSFT"),
    ("google", "GOOGL"),
    ("alphabet", "GOOGL"),
    ("youtube", "GOOGL"),
    ("amazon", "AMZN"),
    ("aws", "AMZN"),
    ("bezos", "AMZN"),
    ("meta", "META"),
    ("facebook", "META"),
    ("instagram", "META"),
    ("zuckerberg", "META"),
    // AI & semiconductors
    ("nvidia", "NVDA"),
    ("jensen", "NVDA"),
    ("cuda", "NVDA"),
    ("amd", "AMD"),
    ("lisa su", "AMD"),
    ("intel", "INTC"),
    ("tsmc", "TSM"),
    ("broadcom", "AVGO"),
    ("micron", "MU"),
    ("super micro", "SMCI"),
    ("smci", "SMCI"),
    // EV & auto
    ("tesla", "TSLA"),
    ("musk", "TSLA"),
    ("spacex", "TSLA"),
    ("byd", "BYDDY"),
    ("rivian", "RIVN"),
    ("lucid", "LCID"),
    ("nio", "NIO"),
    ("xpeng", "XPEV"),
    ("li auto", "LI"),
    // Finance (crypto names map to listed proxies)
    ("jpmorgan", "JPM"),
    ("goldman", "GS"),
    ("bitcoin", "MSTR"),
    ("crypto", "COIN"),
    // Retail
    ("walmart", "WMT"),
    ("costco", "COST"),
    ("target", "TGT"),
    ("starbucks", "SBUX"),
];

/// Macro / sector keyword → instruments it usually moves.
const KEYWORDS: &[(&str, &[&str])] = &[
    ("fed", &["SPY", "QQQ", "TLT"]),
    ("powell", &["SPY", "QQQ"]),
    ("rate cut", &["TLT", "IWM", "XBI"]),
    ("rate hike", &["UUP", "XLF"]),
    ("inflation", &["GLD", "TIP"]),
    ("cpi", &["SPY", "QQQ"]),
    ("oil", &["XOM", "CVX", "USO"]),
    ("opec", &["XOM", "CVX", "USO"]),
    ("semiconductor", &["SOXX", "SMH"]),
    ("chip", &["SOXX", "SMH"]),
    ("ai", &["NVDA", "MSFT", "GOOGL"]),
    ("housing", &["XHB", "ITB"]),
];

/// Capitalized tokens that are words or acronyms far more often than tickers.
static STOPLIST: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "A", "I", "S", "P", "AM", "PM", "AN", "THE", "AND", "FOR", "WITH", "ARE", "BUT", "NOT",
        "CAN", "ALL", "ANY", "NEW", "BIG", "USA", "CEO", "CFO", "CTO", "IPO", "GDP", "AI", "EV",
        "USD", "YOY", "QOQ", "ATH", "URL", "API", "APP", "NOW", "OUT", "BUY", "SELL", "US", "UK",
        "EU", "FED", "SEC", "CPI", "PPI", "ETF", "EPS", "FDA", "FOMC", "ECB", "IMF", "IT", "IS",
        "TO", "OF", "IN", "ON", "AT", "BY", "OR", "AS", "BE", "IF", "SO", "UP", "NO", "DO", "GO",
        "MY", "WE", "HE", "ME", "OK", "DD", "EOD", "IMO", "TLDR", "YOLO", "LOL", "NEWS", "WHY",
        "HOW", "WHAT", "THIS", "THAT",
    ]
    .into_iter()
    .collect()
});

static RE_TICKER: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?:\$|\b)([A-Z]{1,5})\b").ok());
static RE_CASHTAG: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\$([A-Za-z]{1,5})\b").ok());

/// Case-insensitive term match. Terms of three characters or fewer must sit on
/// word boundaries ("ai" must not match "said"); longer ones are plain substrings.
fn contains_term(haystack_lower: &str, term: &str) -> bool {
    if term.len() > 3 {
        return haystack_lower.contains(term);
    }
    let bytes = haystack_lower.as_bytes();
    haystack_lower.match_indices(term).any(|(start, m)| {
        let end = start + m.len();
        let before_ok = start == 0 || !bytes[start - 1].is_ascii_alphanumeric();
        let after_ok = end >= bytes.len() || !bytes[end].is_ascii_alphanumeric();
        before_ok && after_ok
    })
}

/// Symbols from the company/alias table.
pub fn company_matches(text: &str) -> BTreeSet<String> {
    let lower = text.to_lowercase();
    COMPANIES
        .iter()
        .filter(|(alias, _)| contains_term(&lower, alias))
        .map(|(_, sym)| sym.to_string())
        .collect()
}

/// Symbols from the macro/sector keyword table.
pub fn keyword_matches(text: &str) -> BTreeSet<String> {
    let lower = text.to_lowercase();
    KEYWORDS
        .iter()
        .filter(|(kw, _)| contains_term(&lower, kw))
        .flat_map(|(_, syms)| syms.iter().map(|s| s.to_string()))
        .collect()
}

/// Explicit tickers: capitalized 1-5 letter tokens, or `$`-prefixed tokens of
/// any case, minus the stoplist.
pub fn ticker_matches(text: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    if let Some(re) = RE_TICKER.as_ref() {
        for cap in re.captures_iter(text) {
            if let Some(m) = cap.get(1) {
                out.insert(m.as_str().to_string());
            }
        }
    }
    if let Some(re) = RE_CASHTAG.as_ref() {
        for cap in re.captures_iter(text) {
            if let Some(m) = cap.get(1) {
                out.insert(m.as_str().to_ascii_uppercase());
            }
        }
    }
    out.retain(|t| is_valid_ticker(t));
    out
}

fn is_valid_ticker(s: &str) -> bool {
    (1..=5).contains(&s.len()) && !STOPLIST.contains(s)
}

/// Union of all three mechanisms.
pub fn tag(text: &str) -> BTreeSet<String> {
    let mut out = company_matches(text);
    out.extend(keyword_matches(text));
    out.extend(ticker_matches(text));
    out
}
