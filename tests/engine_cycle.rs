// tests/engine_cycle.rs
//
// Analysis engine against an in-memory store and scripted model fakes:
// - a cycle drains the whole backlog in rounds
// - concurrency never exceeds the worker count
// - the alert rule end to end (critical / none)
// - failures keep items unprocessed, spend attempts, then dead-letter
// - per-item timeout

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use market_sentinel::error::ModelError;
use market_sentinel::models::{RawItem, Severity};
use market_sentinel::notify::AlertSink;
use market_sentinel::store::{AlertFilter, AnalysisFilter, Page, Store};
use market_sentinel::{AnalysisEngine, EngineSettings, ModelClient};

const HIGH_CRITICAL: &str = r#"Sure! ```json
{"sentiment":"positive","impact":"high","summary":"Blowout quarter.","stocks":[{"symbol":"NVDA","score":9,"reasoning":"beat","timeframe":"short"}],"confidence":0.85}
```"#;
const MEDIUM: &str = r#"{"sentiment":"negative","impact":"medium","summary":"Soft guide.","stocks":[{"symbol":"AAPL","score":-4}],"confidence":0.9}"#;

enum Reply {
    Text(&'static str),
    Fail,
}

struct FakeModel {
    reply: Reply,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeModel {
    fn new(reply: Reply, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply,
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ModelClient for FakeModel {
    async fn generate(&self, _prompt: &str) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match self.reply {
            Reply::Text(t) => Ok(t.to_string()),
            Reply::Fail => Err(ModelError::EmptyResponse("fake")),
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

fn settings(workers: usize, batch_multiplier: usize) -> EngineSettings {
    EngineSettings {
        poll_interval: Duration::from_secs(3600),
        workers,
        batch_multiplier,
        item_timeout: Duration::from_secs(5),
    }
}

async fn seeded_store(n: usize) -> Store {
    let store = Store::open_in_memory().await.unwrap();
    let now = Utc::now();
    for i in 0..n {
        let item = RawItem {
            source: "rss:Wire".into(),
            source_id: format!("item-{i}"),
            author: "Markets desk".into(),
            title: format!("Story number {i}"),
            content: "Chipmakers extend gains".into(),
            url: format!("https://example.com/{i}"),
            published_at: now - chrono::Duration::minutes(i as i64),
            collected_at: now,
        };
        assert!(store.save(&item).await.unwrap());
    }
    store
}

fn build_engine(store: &Store, model: Arc<FakeModel>, s: EngineSettings) -> (AnalysisEngine, tokio::sync::mpsc::Receiver<market_sentinel::models::Alert>) {
    let (sink, rx) = AlertSink::new(store.clone(), 16);
    (AnalysisEngine::new(store.clone(), model, sink, s), rx)
}

#[tokio::test]
async fn default_settings_drain_a_backlog_larger_than_many_batches() {
    let store = seeded_store(60).await;
    let model = FakeModel::new(Reply::Text(MEDIUM), Duration::ZERO);
    let mut s = EngineSettings::default();
    s.poll_interval = Duration::from_secs(3600);
    let (engine, _rx) = build_engine(&store, model.clone(), s);

    let summary = engine.process_cycle().await.unwrap();
    assert_eq!(summary.fetched, 60);
    assert_eq!(summary.analyzed, 60);
    // 60 items in batches of 6
    assert_eq!(summary.rounds, 10);
    assert_eq!(model.calls.load(Ordering::SeqCst), 60);
    assert_eq!(store.unprocessed_stats().await.unwrap().count, 0);
}

#[tokio::test]
async fn one_cycle_drains_whole_backlog() {
    let store = seeded_store(7).await;
    let model = FakeModel::new(Reply::Text(MEDIUM), Duration::ZERO);
    let (engine, _rx) = build_engine(&store, model.clone(), settings(2, 1));

    let summary = engine.process_cycle().await.unwrap();
    assert_eq!(summary.fetched, 7);
    assert_eq!(summary.analyzed, 7);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.rounds, 4);
    assert_eq!(model.calls.load(Ordering::SeqCst), 7);

    assert!(store.fetch_unprocessed(100).await.unwrap().is_empty());
    let (_, total) = store.list_analyses(&AnalysisFilter::default(), Page::default()).await.unwrap();
    assert_eq!(total, 7);

    // nothing left: the next cycle is a no-op
    let again = engine.process_cycle().await.unwrap();
    assert_eq!(again.fetched, 0);
    assert_eq!(model.calls.load(Ordering::SeqCst), 7);
}

#[tokio::test]
async fn concurrency_is_bounded_by_workers() {
    let store = seeded_store(12).await;
    let model = FakeModel::new(Reply::Text(MEDIUM), Duration::from_millis(30));
    let (engine, _rx) = build_engine(&store, model.clone(), settings(3, 2));

    let summary = engine.process_cycle().await.unwrap();
    assert_eq!(summary.analyzed, 12);
    let peak = model.max_in_flight.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= 3, "peak in-flight was {peak}");
}

#[tokio::test]
async fn high_impact_confident_strong_score_raises_one_critical_alert() {
    let store = seeded_store(1).await;
    let model = FakeModel::new(Reply::Text(HIGH_CRITICAL), Duration::ZERO);
    let (engine, mut rx) = build_engine(&store, model, settings(1, 1));

    let summary = engine.process_cycle().await.unwrap();
    assert_eq!(summary.alerts, 1);

    let (alerts, total) = store.list_alerts(&AlertFilter::default(), Page::default()).await.unwrap();
    assert_eq!(total, 1);
    let alert = &alerts[0];
    assert_eq!(alert.severity, Severity::Critical);
    assert!(alert.title.contains("High impact"));
    assert!(alert.title.contains("Markets desk"));
    assert!(alert.message.contains("NVDA (+9)"));
    assert!(alert.stocks.contains(&"NVDA".to_string()));

    let live = rx.try_recv().expect("live copy on the channel");
    assert_eq!(live.id, alert.id);

    engine.process_cycle().await.unwrap();
    let (_, total) = store.list_alerts(&AlertFilter::default(), Page::default()).await.unwrap();
    assert_eq!(total, 1, "processed items are never re-analyzed");
}

#[tokio::test]
async fn medium_impact_raises_no_alert() {
    let store = seeded_store(2).await;
    let model = FakeModel::new(Reply::Text(MEDIUM), Duration::ZERO);
    let (engine, mut rx) = build_engine(&store, model, settings(2, 1));

    let summary = engine.process_cycle().await.unwrap();
    assert_eq!(summary.analyzed, 2);
    assert_eq!(summary.alerts, 0);
    let (_, total) = store.list_alerts(&AlertFilter::default(), Page::default()).await.unwrap();
    assert_eq!(total, 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn model_errors_keep_items_unprocessed_until_dead_lettered() {
    let store = seeded_store(3).await.with_max_attempts(2);
    let model = FakeModel::new(Reply::Fail, Duration::ZERO);
    let (engine, _rx) = build_engine(&store, model.clone(), settings(2, 1));

    let first = engine.process_cycle().await.unwrap();
    assert_eq!(first.failed, 3);
    assert_eq!(first.analyzed, 0);
    assert_eq!(first.dead_lettered, 0);
    // each item is tried once per cycle
    assert_eq!(model.calls.load(Ordering::SeqCst), 3);

    let pending = store.fetch_unprocessed(10).await.unwrap();
    assert_eq!(pending.len(), 3);
    assert!(pending.iter().all(|i| i.attempts == 1 && !i.processed));

    let second = engine.process_cycle().await.unwrap();
    assert_eq!(second.dead_lettered, 3);
    assert!(store.fetch_unprocessed(10).await.unwrap().is_empty());

    let third = engine.process_cycle().await.unwrap();
    assert_eq!(third.fetched, 0);
    assert_eq!(model.calls.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn unparseable_output_is_retried_not_processed() {
    let store = seeded_store(1).await;
    let model = FakeModel::new(Reply::Text("I cannot comment on markets."), Duration::ZERO);
    let (engine, _rx) = build_engine(&store, model, settings(1, 1));

    let summary = engine.process_cycle().await.unwrap();
    assert_eq!(summary.failed, 1);

    let item = &store.fetch_unprocessed(1).await.unwrap()[0];
    assert_eq!(item.attempts, 1);
    assert!(item.last_error.is_some());
    let (_, total) = store.list_analyses(&AnalysisFilter::default(), Page::default()).await.unwrap();
    assert_eq!(total, 0);
}

#[tokio::test]
async fn slow_model_hits_item_timeout() {
    let store = seeded_store(1).await;
    let model = FakeModel::new(Reply::Text(MEDIUM), Duration::from_secs(5));
    let mut s = settings(1, 1);
    s.item_timeout = Duration::from_millis(50);
    let (engine, _rx) = build_engine(&store, model, s);

    let started = std::time::Instant::now();
    let summary = engine.process_cycle().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(summary.failed, 1);
    let item = &store.fetch_unprocessed(1).await.unwrap()[0];
    assert!(item.last_error.as_deref().unwrap_or_default().contains("timed out"));
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let store = seeded_store(0).await;
    let model = FakeModel::new(Reply::Text(MEDIUM), Duration::ZERO);
    let (engine, _rx) = build_engine(&store, model, settings(1, 1));
    let engine = Arc::new(engine);

    assert!(engine.start().await);
    assert!(!engine.start().await);
    assert!(engine.is_running().await);
    assert!(engine.stop().await);
    assert!(!engine.stop().await);
    assert!(!engine.is_running().await);
}
