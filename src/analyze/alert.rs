use chrono::Utc;

use crate::models::{Alert, AnalysisResult, Impact, Sentiment, Severity, StoredItem};

/// Confidence strictly above this, together with a strong stock score, makes an alert critical.
pub const CRITICAL_CONFIDENCE: f64 = 0.8;
/// Absolute stock score at or above which a stock counts as strongly affected.
pub const CRITICAL_SCORE: f64 = 8.0;

/// `None` unless impact is high.
pub fn severity_for(analysis: &AnalysisResult) -> Option<Severity> {
    if analysis.impact != Impact::High {
        return None;
    }
    let strong = analysis.stocks.iter().any(|s| s.score.abs() >= CRITICAL_SCORE);
    if analysis.confidence > CRITICAL_CONFIDENCE && strong {
        Some(Severity::Critical)
    } else {
        Some(Severity::High)
    }
}

fn marker(sentiment: Sentiment) -> &'static str {
    match sentiment {
        Sentiment::Positive => "🟢",
        Sentiment::Negative => "🔴",
        Sentiment::Neutral => "⚪",
    }
}

/// "AAPL (+9), MSFT (-3), SPY": scored stocks first, then tagger-only symbols.
fn related_line(analysis: &AnalysisResult) -> String {
    let mut parts: Vec<String> = analysis
        .stocks
        .iter()
        .map(|s| format!("{} ({:+})", s.symbol, s.score))
        .collect();
    for sym in &analysis.related_stocks {
        if !analysis.stocks.iter().any(|s| &s.symbol == sym) {
            parts.push(sym.clone());
        }
    }
    parts.join(", ")
}

/// Synthesize the alert for a high-impact analysis.
pub fn build_alert(item: &StoredItem, analysis: &AnalysisResult) -> Option<Alert> {
    let severity = severity_for(analysis)?;

    let who = if item.author.is_empty() {
        item.source.as_str()
    } else {
        item.author.as_str()
    };
    let title = format!("{} High impact | {}", marker(analysis.sentiment), who);

    let mut message = analysis.summary.clone();
    let related = related_line(analysis);
    if !related.is_empty() {
        if !message.is_empty() {
            message.push('\n');
        }
        message.push_str("Related: ");
        message.push_str(&related);
    }

    Some(Alert {
        id: uuid::Uuid::new_v4().to_string(),
        news_id: item.id.clone(),
        analysis_id: analysis.id.clone(),
        severity,
        title,
        message,
        stocks: analysis.related_stocks.clone(),
        created_at: Utc::now(),
        acknowledged: false,
    })
}
