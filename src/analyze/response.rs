// src/analyze/response.rs
//! Turning model text into a structured verdict.
//!
//! Models wrap JSON in code fences or prose. We locate balanced `{...}` spans by
//! brace depth (ignoring braces inside JSON strings) and take the first span
//! that deserializes into the verdict schema.

use serde::Deserialize;
use serde_json::Value;

use crate::error::ParseError;
use crate::models::{Impact, Sentiment, StockImpact};

pub const SCORE_MIN: f64 = -10.0;
pub const SCORE_MAX: f64 = 10.0;

#[derive(Debug, Deserialize)]
struct RawVerdict {
    sentiment: String,
    impact: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    stocks: Vec<RawStock>,
    #[serde(default)]
    confidence: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawStock {
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    score: Value,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    timeframe: String,
}

/// Normalized model output.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub sentiment: Sentiment,
    pub impact: Impact,
    pub summary: String,
    pub stocks: Vec<StockImpact>,
    pub confidence: f64,
}

/// Numbers may arrive as JSON numbers or strings like "+9".
fn lenient_number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_start_matches('+').parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|f| f.is_finite())
}

impl From<RawVerdict> for Verdict {
    fn from(raw: RawVerdict) -> Self {
        let stocks = raw
            .stocks
            .into_iter()
            .filter_map(|s| {
                let symbol = s.symbol.trim().trim_start_matches('$').to_ascii_uppercase();
                if symbol.is_empty() {
                    return None;
                }
                Some(StockImpact {
                    symbol,
                    score: lenient_number(&s.score)
                        .unwrap_or(0.0)
                        .clamp(SCORE_MIN, SCORE_MAX),
                    reasoning: s.reasoning,
                    timeframe: s.timeframe,
                })
            })
            .collect();

        Self {
            sentiment: Sentiment::from_label(&raw.sentiment),
            impact: Impact::from_label(&raw.impact),
            summary: raw.summary.trim().to_string(),
            stocks,
            confidence: raw
                .confidence
                .as_ref()
                .and_then(lenient_number)
                .unwrap_or(0.0)
                .clamp(0.0, 1.0),
        }
    }
}

/// Index of the `}` closing the object opened at `start`, if balanced.
fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_str = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_str {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_str = false;
            }
            continue;
        }
        match b {
            b'"' => in_str = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Balanced `{...}` spans in `text`, left to right. A balanced span is
/// yielded whole and scanning resumes after it, so nested objects are never
/// yielded on their own. An unbalanced `{` is skipped.
fn json_objects(text: &str) -> impl Iterator<Item = &str> + '_ {
    let bytes = text.as_bytes();
    let mut offset = 0;
    std::iter::from_fn(move || {
        while let Some(rel) = text[offset..].find('{') {
            let start = offset + rel;
            match balanced_end(bytes, start) {
                Some(end) => {
                    offset = end + 1;
                    return Some(&text[start..=end]);
                }
                None => offset = start + 1,
            }
        }
        None
    })
}

/// Parse model text into a `Verdict`: the first balanced span that matches
/// the schema wins.
pub fn parse_verdict(text: &str) -> Result<Verdict, ParseError> {
    let mut last_err = None;
    for span in json_objects(text) {
        match serde_json::from_str::<RawVerdict>(span) {
            Ok(raw) => return Ok(raw.into()),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.map(ParseError::Json).unwrap_or(ParseError::NoJsonObject))
}

/// Arithmetic mean of the per-stock scores; 0 when there are none.
pub fn aggregate_score(stocks: &[StockImpact]) -> f64 {
    if stocks.is_empty() {
        return 0.0;
    }
    stocks.iter().map(|s| s.score).sum::<f64>() / stocks.len() as f64
}
