// tests/store_gateway.rs
//
// Gateway invariants against a real SQLite file:
// - dedup on (source, identity) across reopen
// - processed flag converges and is idempotent
// - retry budget / dead-lettering
// - one alert per analysis
// - filtered list queries and per-symbol sentiment

use chrono::{Duration, Utc};
use market_sentinel::models::{
    Alert, AnalysisResult, Impact, RawItem, Sentiment, Severity, StockImpact,
};
use market_sentinel::store::{AlertFilter, AnalysisFilter, NewsFilter, Page, Store};

fn raw(source: &str, source_id: &str, title: &str, age_mins: i64) -> RawItem {
    let now = Utc::now();
    RawItem {
        source: source.into(),
        source_id: source_id.into(),
        author: "desk".into(),
        title: title.into(),
        content: format!("{title} body"),
        url: format!("https://example.com/{source_id}"),
        published_at: now - Duration::minutes(age_mins),
        collected_at: now,
    }
}

fn analysis(news_id: &str, sentiment: Sentiment, impact: Impact, score: f64, related: &[&str]) -> AnalysisResult {
    AnalysisResult {
        id: uuid::Uuid::new_v4().to_string(),
        news_id: news_id.into(),
        sentiment,
        sentiment_score: score,
        impact,
        summary: "summary".into(),
        confidence: 0.9,
        stocks: related
            .iter()
            .map(|s| StockImpact {
                symbol: s.to_string(),
                score,
                reasoning: String::new(),
                timeframe: "short".into(),
            })
            .collect(),
        related_stocks: related.iter().map(|s| s.to_string()).collect(),
        raw_response: "{}".into(),
        analyzed_at: Utc::now(),
    }
}

fn alert_for(a: &AnalysisResult, severity: Severity) -> Alert {
    Alert {
        id: uuid::Uuid::new_v4().to_string(),
        news_id: a.news_id.clone(),
        analysis_id: a.id.clone(),
        severity,
        title: "High impact".into(),
        message: "msg".into(),
        stocks: a.related_stocks.clone(),
        created_at: Utc::now(),
        acknowledged: false,
    }
}

async fn file_store(dir: &tempfile::TempDir) -> Store {
    let url = format!("sqlite://{}", dir.path().join("sentinel.db").display());
    Store::open(&url).await.expect("open store")
}

#[tokio::test]
async fn save_is_idempotent_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let item = raw("rss:Wire", "guid-1", "Chip rally", 5);

    let store = file_store(&dir).await;
    assert!(store.save(&item).await.unwrap());
    assert!(!store.save(&item).await.unwrap());
    store.close().await;

    let store = file_store(&dir).await;
    assert!(!store.save(&item).await.unwrap(), "dedup survives restart");
    let (rows, total) = store.list_news(&NewsFilter::default(), Page::default()).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(rows[0].source_id, "guid-1");
    assert!(!rows[0].processed);
}

#[tokio::test]
async fn same_native_id_in_different_sources_is_kept() {
    let store = Store::open_in_memory().await.unwrap();
    assert!(store.save(&raw("rss:A", "1", "x", 1)).await.unwrap());
    assert!(store.save(&raw("rss:B", "1", "x", 1)).await.unwrap());
}

#[tokio::test]
async fn items_without_native_id_dedup_on_content() {
    let store = Store::open_in_memory().await.unwrap();
    let a = raw("rss:A", "", "Same headline", 1);
    let mut b = a.clone();
    b.collected_at = b.collected_at + Duration::minutes(10);
    assert!(store.save(&a).await.unwrap());
    assert!(!store.save(&b).await.unwrap());

    let mut c = a.clone();
    c.title = "Different headline".into();
    assert!(store.save(&c).await.unwrap());
}

#[tokio::test]
async fn fetch_unprocessed_is_newest_first_and_converges() {
    let store = Store::open_in_memory().await.unwrap();
    for (i, age) in [30, 10, 20].into_iter().enumerate() {
        store.save(&raw("rss:A", &format!("n{i}"), "t", age)).await.unwrap();
    }

    let batch = store.fetch_unprocessed(10).await.unwrap();
    let ids: Vec<&str> = batch.iter().map(|i| i.source_id.as_str()).collect();
    assert_eq!(ids, vec!["n1", "n2", "n0"]);

    let first = &batch[0].id;
    store.mark_processed(first).await.unwrap();
    store.mark_processed(first).await.unwrap();

    let rest = store.fetch_unprocessed(10).await.unwrap();
    assert_eq!(rest.len(), 2);
    assert!(rest.iter().all(|i| &i.id != first));
    assert_eq!(store.unprocessed_stats().await.unwrap().count, 2);

    let limited = store.fetch_unprocessed(1).await.unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn mark_processed_unknown_id_is_not_found() {
    let store = Store::open_in_memory().await.unwrap();
    let err = store.mark_processed("nope").await.unwrap_err();
    assert!(matches!(err, market_sentinel::error::StoreError::NotFound { .. }));
}

#[tokio::test]
async fn exhausted_retry_budget_dead_letters_item() {
    let store = Store::open_in_memory().await.unwrap().with_max_attempts(2);
    store.save(&raw("rss:A", "x", "t", 1)).await.unwrap();
    let id = store.fetch_unprocessed(1).await.unwrap()[0].id.clone();

    assert_eq!(store.record_failure(&id, "timeout").await.unwrap(), 1);
    assert_eq!(store.fetch_unprocessed(5).await.unwrap().len(), 1);
    assert_eq!(store.record_failure(&id, "bad json").await.unwrap(), 2);
    assert!(store.fetch_unprocessed(5).await.unwrap().is_empty());
    assert_eq!(store.unprocessed_stats().await.unwrap().count, 0);

    let item = store.get_news(&id).await.unwrap().unwrap();
    assert!(!item.processed, "dead-lettered items stay unprocessed");
    assert_eq!(item.attempts, 2);
    assert_eq!(item.last_error.as_deref(), Some("bad json"));
}

#[tokio::test]
async fn only_one_alert_per_analysis() {
    let store = Store::open_in_memory().await.unwrap();
    store.save(&raw("rss:A", "x", "t", 1)).await.unwrap();
    let id = store.fetch_unprocessed(1).await.unwrap()[0].id.clone();
    let a = analysis(&id, Sentiment::Positive, Impact::High, 9.0, &["NVDA"]);
    store.save_analysis(&a).await.unwrap();

    assert!(store.save_alert(&alert_for(&a, Severity::Critical)).await.unwrap());
    assert!(!store.save_alert(&alert_for(&a, Severity::High)).await.unwrap());

    let (alerts, total) = store.list_alerts(&AlertFilter::default(), Page::default()).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(alerts[0].severity, Severity::Critical);
    assert_eq!(alerts[0].stocks, vec!["NVDA"]);
}

#[tokio::test]
async fn list_filters_and_pagination() {
    let store = Store::open_in_memory().await.unwrap();
    for i in 0..5 {
        store.save(&raw("reddit:r/stocks", &format!("r{i}"), "post", i)).await.unwrap();
    }
    store.save(&raw("rss:Wire", "w0", "wire", 100)).await.unwrap();

    let filter = NewsFilter {
        source: Some("reddit:r/stocks".into()),
        ..Default::default()
    };
    let (rows, total) = store.list_news(&filter, Page::new(Some(2), Some(1))).await.unwrap();
    assert_eq!(total, 5);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].source_id, "r1");

    let old = NewsFilter {
        until: Some(Utc::now() - Duration::minutes(60)),
        ..Default::default()
    };
    let (rows, total) = store.list_news(&old, Page::default()).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(rows[0].source, "rss:Wire");

    let ids: Vec<String> = store.fetch_unprocessed(10).await.unwrap().into_iter().map(|i| i.id).collect();
    store
        .save_analysis(&analysis(&ids[0], Sentiment::Negative, Impact::High, -6.0, &["TSLA"]))
        .await
        .unwrap();
    store
        .save_analysis(&analysis(&ids[1], Sentiment::Neutral, Impact::Low, 0.0, &[]))
        .await
        .unwrap();

    let high = AnalysisFilter {
        impact: Some(Impact::High),
        ..Default::default()
    };
    let (rows, total) = store.list_analyses(&high, Page::default()).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(rows[0].stocks[0].symbol, "TSLA");
    assert!(store.get_analysis(&rows[0].id).await.unwrap().is_some());
    assert_eq!(store.analyses_for_news(&ids[0]).await.unwrap().len(), 1);
}

#[tokio::test]
async fn stock_sentiment_aggregates_recent_mentions() {
    let store = Store::open_in_memory().await.unwrap();
    for i in 0..3 {
        store.save(&raw("rss:A", &format!("s{i}"), "t", i)).await.unwrap();
    }
    let ids: Vec<String> = store.fetch_unprocessed(10).await.unwrap().into_iter().map(|i| i.id).collect();

    store.save_analysis(&analysis(&ids[0], Sentiment::Positive, Impact::High, 8.0, &["AAPL"])).await.unwrap();
    store.save_analysis(&analysis(&ids[1], Sentiment::Negative, Impact::Medium, -2.0, &["AAPL", "MSFT"])).await.unwrap();
    store.save_analysis(&analysis(&ids[2], Sentiment::Positive, Impact::Low, 4.0, &["MSFT"])).await.unwrap();

    let s = store.stock_sentiment("aapl", 24).await.unwrap();
    assert_eq!(s.symbol, "AAPL");
    assert_eq!(s.total_mentions, 2);
    assert_eq!(s.positive_count, 1);
    assert_eq!(s.negative_count, 1);
    assert!((s.overall_score - 3.0).abs() < 1e-9);
    assert_eq!(s.recent_news.len(), 2);

    let none = store.stock_sentiment("AA", 24).await.unwrap();
    assert_eq!(none.total_mentions, 0, "substring of a symbol must not match");
    assert_eq!(none.overall_score, 0.0);
}
