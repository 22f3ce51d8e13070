// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::ingest::{ensure_metrics_described, types::SourceProvider};
use crate::periodic::PeriodicLoop;
use crate::store::Store;

/// Outcome of one source within a collector cycle.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SourceReport {
    pub source: String,
    pub fetched: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub save_errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub sources: Vec<SourceReport>,
    pub duration_ms: u64,
}

impl CycleReport {
    pub fn inserted(&self) -> usize {
        self.sources.iter().map(|s| s.inserted).sum()
    }

    pub fn failed_sources(&self) -> usize {
        self.sources.iter().filter(|s| s.error.is_some()).count()
    }
}

/// Runs every source adapter concurrently on a fixed interval and feeds the
/// results to the gateway. The first cycle fires immediately on `start`.
pub struct CollectorScheduler {
    store: Store,
    sources: Vec<Arc<dyn SourceProvider>>,
    periodic: PeriodicLoop,
    // serializes timer cycles with manually triggered ones
    cycle: Mutex<()>,
}

impl CollectorScheduler {
    pub fn new(store: Store, sources: Vec<Arc<dyn SourceProvider>>, interval: Duration) -> Self {
        Self {
            store,
            sources,
            periodic: PeriodicLoop::new("collector", interval, true),
            cycle: Mutex::new(()),
        }
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    /// Returns `false` if the loop was already running.
    pub async fn start(self: &Arc<Self>) -> bool {
        let this = Arc::clone(self);
        let started = self
            .periodic
            .start(move || {
                let this = Arc::clone(&this);
                async move {
                    this.run_once().await;
                }
            })
            .await;
        if started {
            tracing::info!(
                target: "ingest",
                sources = self.sources.len(),
                interval_secs = self.periodic.period().as_secs(),
                "collector scheduler started"
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

    /// One collection cycle across all sources. Never fails: per-source
    /// errors are recorded in the report.
    pub async fn run_once(&self) -> CycleReport {
        ensure_metrics_described();
        let _guard = self.cycle.lock().await;
        let t0 = Instant::now();

        let mut set = JoinSet::new();
        for (idx, source) in self.sources.iter().enumerate() {
            let source = Arc::clone(source);
            let store = self.store.clone();
            set.spawn(async move { (idx, collect_source(source.as_ref(), &store).await) });
        }

        // a source whose task panics keeps this placeholder
        let mut reports: Vec<SourceReport> = self
            .sources
            .iter()
            .map(|s| SourceReport {
                source: s.name().to_string(),
                error: Some("adapter task panicked".to_string()),
                ..Default::default()
            })
            .collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, r)) => {
                    if let Some(slot) = reports.get_mut(idx) {
                        *slot = r;
                    }
                }
                Err(e) => {
                    tracing::error!(target: "ingest", error = %e, "source task panicked");
                    counter!("collector_source_errors_total").increment(1);
                }
            }
        }

        let report = CycleReport {
            sources: reports,
            duration_ms: t0.elapsed().as_millis() as u64,
        };

        counter!("collector_cycles_total").increment(1);
        gauge!("collector_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
        histogram!("collector_cycle_ms").record(report.duration_ms as f64);

        tracing::info!(
            target: "ingest",
            sources = report.sources.len(),
            inserted = report.inserted(),
            failed_sources = report.failed_sources(),
            duration_ms = report.duration_ms,
            "collector cycle finished"
        );
        report
    }
}

async fn collect_source(source: &dyn SourceProvider, store: &Store) -> SourceReport {
    let mut report = SourceReport {
        source: source.name().to_string(),
        ..Default::default()
    };

    let items = match source.collect().await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(target: "ingest", error = ?e, provider = source.name(), "provider error");
            counter!("collector_source_errors_total", "source" => report.source.clone())
                .increment(1);
            report.error = Some(format!("{e:#}"));
            return report;
        }
    };

    report.fetched = items.len();
    for item in &items {
        match store.save(item).await {
            Ok(true) => report.inserted += 1,
            Ok(false) => report.duplicates += 1,
            Err(e) => {
                tracing::warn!(
                    target: "ingest",
                    error = %e,
                    source = %item.source,
                    source_id = %item.source_id,
                    "failed to save item"
                );
                report.save_errors += 1;
            }
        }
    }

    if report.save_errors > 0 && report.save_errors == report.fetched {
        // every write failed: the store itself is likely down
        tracing::error!(
            target: "ingest",
            provider = source.name(),
            save_errors = report.save_errors,
            "all saves failed for source"
        );
    }

    counter!("collector_items_inserted_total").increment(report.inserted as u64);
    counter!("collector_items_duplicate_total").increment(report.duplicates as u64);
    counter!("collector_save_errors_total").increment(report.save_errors as u64);
    report
}
