use crate::models::StoredItem;

/// Build the analysis prompt for one item. The model must answer with the
/// JSON schema parsed by `response::parse_verdict`.
pub fn build_prompt(item: &StoredItem) -> String {
    let body = if item.title.is_empty() {
        item.content.clone()
    } else if item.content.is_empty() {
        item.title.clone()
    } else {
        format!("{}\n\n{}", item.title, item.content)
    };

    format!(
        r#"Analyze the following news/social media post for stock market impact.

Source: {source}
Author: {author}
Published: {published}
Content:
{body}

You must respond with valid JSON only. No other text. The JSON schema is:
{{
  "sentiment": "positive|negative|neutral",
  "impact": "high|medium|low",
  "summary": "Brief summary of the content and its market implications",
  "stocks": [
    {{
      "symbol": "TICKER",
      "score": -10 to +10 (negative = bearish, positive = bullish),
      "reasoning": "Why this stock is affected",
      "timeframe": "immediate|short|long"
    }}
  ],
  "confidence": 0.5 to 1.0
}}

Focus on:
- Direct company mentions
- Industry/sector implications
- Policy/regulatory impact
- Macro economic signals

Only include stocks with clear connection to the content. If no specific stocks are affected, return empty stocks array."#,
        source = item.source,
        author = item.author,
        published = item.published_at.to_rfc3339(),
        body = body,
    )
}
