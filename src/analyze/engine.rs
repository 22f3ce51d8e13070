// src/analyze/engine.rs
//! Analysis engine: drains the unprocessed queue with bounded concurrency.
//!
//! A cycle runs in rounds. Each round fetches `workers × batch_multiplier`
//! items (skipping ids already attempted this cycle), dispatches them to at
//! most `workers` concurrent tasks and joins them all before the next round.
//!
//! The backlog is counted when the cycle starts. Rounds continue until every
//! item collected before that instant has been attempted once, or a round
//! comes back empty. Items arriving mid-cycle are picked up along the way but
//! never extend the cycle on their own, so a steady trickle of new items
//! cannot keep it alive forever.
//!
//! `fetch_unprocessed` is a snapshot read, not a claim. Cycles are serialized
//! within the engine, so a single engine per store never analyzes an item twice
//! concurrently. Running several engines against one store is not supported.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

use crate::analyze::{alert, prompt, response, tagger};
use crate::config::AnalyzerConfig;
use crate::error::{AnalysisError, ModelError, StoreError};
use crate::model::DynModelClient;
use crate::models::{AnalysisResult, StockImpact, StoredItem};
use crate::notify::AlertSink;
use crate::periodic::PeriodicLoop;
use crate::store::Store;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("analysis_cycles_total", "Analysis cycles run.");
        describe_counter!("analysis_items_total", "Items analyzed, by outcome.");
        describe_counter!("analysis_failures_total", "Failed item analyses, by kind.");
        describe_counter!(
            "analysis_dead_letter_total",
            "Items that exhausted their retry budget."
        );
        describe_histogram!("analysis_duration_ms", "Per-item analysis time in milliseconds.");
        describe_gauge!("analysis_unprocessed_items", "Retryable unprocessed items.");
        describe_gauge!(
            "analysis_oldest_unprocessed_age_secs",
            "Age of the oldest retryable unprocessed item."
        );
    });
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub poll_interval: Duration,
    pub workers: usize,
    pub batch_multiplier: usize,
    pub item_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        (&AnalyzerConfig::default()).into()
    }
}

impl From<&AnalyzerConfig> for EngineSettings {
    fn from(c: &AnalyzerConfig) -> Self {
        Self {
            poll_interval: c.poll_interval(),
            workers: c.workers.max(1),
            batch_multiplier: c.batch_multiplier.max(1),
            item_timeout: c.item_timeout(),
        }
    }
}

impl EngineSettings {
    pub fn batch_size(&self) -> usize {
        self.workers * self.batch_multiplier
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CycleSummary {
    pub rounds: usize,
    pub fetched: usize,
    pub analyzed: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    pub alerts: usize,
}

/// Per-item result of a successful analysis.
#[derive(Debug)]
struct ItemOutcome {
    alert_stored: bool,
}

/// Everything a worker task needs; cheap to clone into each task.
#[derive(Clone)]
struct Worker {
    store: Store,
    model: DynModelClient,
    sink: AlertSink,
    item_timeout: Duration,
}

impl Worker {
    async fn analyze_one(&self, item: &StoredItem) -> Result<ItemOutcome, AnalysisError> {
        let prompt = prompt::build_prompt(item);

        let raw = tokio::time::timeout(self.item_timeout, self.model.generate(&prompt))
            .await
            .map_err(|_| ModelError::Timeout(self.item_timeout.as_secs()))??;

        let verdict = response::parse_verdict(&raw)?;
        let sentiment_score = response::aggregate_score(&verdict.stocks);
        let related_stocks = merge_related(&verdict.stocks, tagger::tag(&item.full_text()));

        let analysis = AnalysisResult {
            id: uuid::Uuid::new_v4().to_string(),
            news_id: item.id.clone(),
            sentiment: verdict.sentiment,
            sentiment_score,
            impact: verdict.impact,
            summary: verdict.summary,
            confidence: verdict.confidence,
            stocks: verdict.stocks,
            related_stocks,
            raw_response: raw,
            analyzed_at: Utc::now(),
        };

        self.store.save_analysis(&analysis).await?;
        self.store.mark_processed(&item.id).await?;

        let mut alert_stored = false;
        if let Some(a) = alert::build_alert(item, &analysis) {
            let severity = a.severity;
            // the item is already processed; a lost alert cannot be retried
            match self.sink.publish(a).await {
                Ok(outcome) => {
                    alert_stored = outcome.stored;
                    tracing::info!(
                        item_id = %item.id,
                        analysis_id = %analysis.id,
                        %severity,
                        score = sentiment_score,
                        "high impact alert"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, item_id = %item.id, "failed to persist alert");
                }
            }
        }

        Ok(ItemOutcome { alert_stored })
    }

    /// Run one item and account for the result. Returns `Ok(alert)` on success.
    async fn run(&self, item: StoredItem, max_attempts: u32) -> Result<bool, Failure> {
        let t0 = Instant::now();
        let res = self.analyze_one(&item).await;
        histogram!("analysis_duration_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        match res {
            Ok(outcome) => {
                counter!("analysis_items_total", "outcome" => "ok").increment(1);
                Ok(outcome.alert_stored)
            }
            Err(e) => {
                counter!("analysis_items_total", "outcome" => "failed").increment(1);
                counter!("analysis_failures_total", "kind" => e.kind()).increment(1);
                tracing::warn!(item_id = %item.id, kind = e.kind(), error = %e, "analysis failed");

                let dead = match self.store.record_failure(&item.id, &e.to_string()).await {
                    Ok(attempts) if attempts >= max_attempts => {
                        counter!("analysis_dead_letter_total").increment(1);
                        tracing::error!(
                            item_id = %item.id,
                            attempts,
                            last_error = %e,
                            "retry budget exhausted, item dead-lettered"
                        );
                        true
                    }
                    Ok(_) => false,
                    Err(se) => {
                        tracing::error!(item_id = %item.id, error = %se, "failed to record analysis failure");
                        false
                    }
                };
                Err(Failure { dead })
            }
        }
    }
}

#[derive(Debug)]
struct Failure {
    dead: bool,
}

/// Model-reported symbols first, then tagger symbols not already present.
fn merge_related(stocks: &[StockImpact], tagged: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for sym in stocks.iter().map(|s| s.symbol.clone()).chain(tagged) {
        if seen.insert(sym.clone()) {
            out.push(sym);
        }
    }
    out
}

pub struct AnalysisEngine {
    worker: Worker,
    settings: EngineSettings,
    periodic: PeriodicLoop,
    cycle: Mutex<()>,
}

impl AnalysisEngine {
    pub fn new(store: Store, model: DynModelClient, sink: AlertSink, settings: EngineSettings) -> Self {
        ensure_metrics_described();
        Self {
            worker: Worker {
                store,
                model,
                sink,
                item_timeout: settings.item_timeout,
            },
            periodic: PeriodicLoop::new("analysis", settings.poll_interval, false),
            settings,
            cycle: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// First cycle runs one poll interval after start. Returns `false` if already running.
    pub async fn start(self: &Arc<Self>) -> bool {
        let this = Arc::clone(self);
        let started = self
            .periodic
            .start(move || {
                let this = Arc::clone(&this);
                async move {
                    if let Err(e) = this.process_cycle().await {
                        tracing::error!(error = %e, "analysis cycle aborted: storage unavailable");
                    }
                }
            })
            .await;
        if started {
            tracing::info!(
                workers = self.settings.workers,
                batch = self.settings.batch_size(),
                model = self.worker.model.name(),
                "analysis engine started"
            );
        }
        started
    }

    /// Blocks until the in-flight cycle (if any) completes.
    pub async fn stop(&self) -> bool {
        self.periodic.stop().await
    }

    pub async fn is_running(&self) -> bool {
        self.periodic.is_running().await
    }

    /// Analyze every retryable unprocessed item present when the cycle starts.
    /// Only a failing queue read aborts the cycle; per-item failures are
    /// counted in the summary.
    pub async fn process_cycle(&self) -> Result<CycleSummary, StoreError> {
        let _guard = self.cycle.lock().await;
        let store = &self.worker.store;
        let max_attempts = store.max_attempts();
        let batch = self.settings.batch_size();
        let mut summary = CycleSummary::default();
        let mut attempted: HashSet<String> = HashSet::new();

        let started_at = Utc::now();
        let backlog = store.unprocessed_stats().await?.count as usize;
        // attempted items that were already queued when the cycle started
        let mut backlog_attempted = 0usize;

        while backlog_attempted < backlog {
            let items: Vec<StoredItem> = store
                .fetch_unprocessed(batch + attempted.len())
                .await?
                .into_iter()
                .filter(|i| !attempted.contains(&i.id))
                .take(batch)
                .collect();
            if items.is_empty() {
                break;
            }

            summary.rounds += 1;
            summary.fetched += items.len();
            tracing::debug!(round = summary.rounds, items = items.len(), "analysis round");

            let permits = Arc::new(Semaphore::new(self.settings.workers));
            let mut set = JoinSet::new();
            for item in items {
                attempted.insert(item.id.clone());
                if item.collected_at <= started_at {
                    backlog_attempted += 1;
                }
                let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                    break;
                };
                let worker = self.worker.clone();
                set.spawn(async move {
                    let _permit = permit;
                    worker.run(item, max_attempts).await
                });
            }

            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(Ok(alerted)) => {
                        summary.analyzed += 1;
                        summary.alerts += usize::from(alerted);
                    }
                    Ok(Err(f)) => {
                        summary.failed += 1;
                        summary.dead_lettered += usize::from(f.dead);
                    }
                    Err(e) => {
                        summary.failed += 1;
                        tracing::error!(error = %e, "analysis task panicked");
                    }
                }
            }
        }

        counter!("analysis_cycles_total").increment(1);
        self.refresh_health().await;

        if summary.fetched > 0 {
            tracing::info!(
                rounds = summary.rounds,
                fetched = summary.fetched,
                analyzed = summary.analyzed,
                failed = summary.failed,
                dead_lettered = summary.dead_lettered,
                alerts = summary.alerts,
                "analysis cycle finished"
            );
        }
        Ok(summary)
    }

    async fn refresh_health(&self) {
        match self.worker.store.unprocessed_stats().await {
            Ok(stats) => {
                gauge!("analysis_unprocessed_items").set(stats.count as f64);
                gauge!("analysis_oldest_unprocessed_age_secs")
                    .set(stats.oldest_age_secs(Utc::now()) as f64);
            }
            Err(e) => tracing::warn!(error = %e, "failed to read unprocessed stats"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stock(sym: &str) -> StockImpact {
        StockImpact {
            symbol: sym.into(),
            score: 1.0,
            reasoning: String::new(),
            timeframe: String::new(),
        }
    }

    #[test]
    fn merge_keeps_model_order_and_dedups() {
        let merged = merge_related(
            &[stock("NVDA"), stock("AAPL")],
            ["AAPL".to_string(), "SPY".to_string(), "NVDA".to_string()],
        );
        assert_eq!(merged, vec!["NVDA", "AAPL", "SPY"]);
    }

    #[test]
    fn batch_size_is_workers_times_multiplier() {
        let s = EngineSettings::default();
        assert_eq!(s.batch_size(), 6);
        assert_eq!(s.poll_interval, Duration::from_secs(10));
    }
}
