//! Start/stop-guarded periodic task shared by the collector and the analysis engine.
//!
//! `start` on a running loop and `stop` on an idle one are no-ops. `stop` waits
//! for an in-flight tick to finish; shutdown is only observed between ticks.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct PeriodicLoop {
    name: &'static str,
    period: Duration,
    run_immediately: bool,
    running: Mutex<Option<Running>>,
}

impl PeriodicLoop {
    /// `run_immediately` fires the first tick on start instead of one period later.
    pub fn new(name: &'static str, period: Duration, run_immediately: bool) -> Self {
        Self {
            name,
            period: period.max(Duration::from_millis(1)),
            run_immediately,
            running: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Spawn the loop. Returns `false` (and spawns nothing) if already running.
    pub async fn start<F, Fut>(&self, mut tick: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut guard = self.running.lock().await;
        if let Some(r) = guard.as_ref() {
            if !r.handle.is_finished() {
                tracing::debug!(task = self.name, "start ignored: already running");
                return false;
            }
        }

        let (tx, mut rx) = watch::channel(false);
        let name = self.name;
        let period = self.period;
        let first = if self.run_immediately {
            Instant::now()
        } else {
            Instant::now() + period
        };

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(task = name, period_secs = period.as_secs_f64(), "periodic task started");
            loop {
                tokio::select! {
                    biased;
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => tick().await,
                }
            }
            tracing::info!(task = name, "periodic task stopped");
        });

        *guard = Some(Running {
            shutdown: tx,
            handle,
        });
        true
    }

    /// Signal shutdown and wait for the in-flight tick. Returns `false` if it was not running.
    pub async fn stop(&self) -> bool {
        let running = self.running.lock().await.take();
        let Some(running) = running else {
            return false;
        };
        let _ = running.shutdown.send(true);
        if let Err(e) = running.handle.await {
            tracing::error!(task = self.name, error = %e, "periodic task panicked");
        }
        true
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn start_twice_is_noop_and_stop_is_idempotent() {
        let lp = PeriodicLoop::new("test", Duration::from_secs(3600), true);
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        assert!(
            lp.start(move || {
                let h = h.clone();
                async move {
                    h.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await
        );
        assert!(!lp.start(|| async {}).await);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(lp.stop().await);
        assert!(!lp.stop().await);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!lp.is_running().await);
    }

    #[tokio::test]
    async fn stop_before_start_is_safe() {
        let lp = PeriodicLoop::new("idle", Duration::from_secs(1), false);
        assert!(!lp.stop().await);
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_tick() {
        let lp = PeriodicLoop::new("slow", Duration::from_secs(3600), true);
        let done = Arc::new(AtomicUsize::new(0));
        let d = done.clone();
        lp.start(move || {
            let d = d.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                d.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        lp.stop().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delayed_start_skips_first_tick() {
        let lp = PeriodicLoop::new("delayed", Duration::from_secs(3600), false);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        lp.start(move || {
            let h = h.clone();
            async move {
                h.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        lp.stop().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
