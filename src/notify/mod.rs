// src/notify/mod.rs
//! Alert sink and downstream notification fan-out.
//!
//! `AlertSink::publish` persists first, then offers a live copy on a bounded
//! channel without waiting. The dispatcher drains that channel and forwards
//! to every configured `Notifier`.

pub mod antiflutter;
pub mod discord;
pub mod email;
pub mod slack;

pub use antiflutter::AntiFlutter;
pub use discord::DiscordNotifier;
pub use email::EmailNotifier;
pub use slack::SlackNotifier;

use anyhow::Result;
use chrono::Utc;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::models::Alert;
use crate::store::Store;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("alerts_created_total", "Alerts persisted, by severity.");
        describe_counter!(
            "alerts_notify_dropped_total",
            "Live alert copies dropped because the channel was full."
        );
        describe_counter!("alerts_notified_total", "Alerts forwarded to notifiers.");
        describe_counter!(
            "alerts_suppressed_total",
            "Alerts held back by the notification cooldown."
        );
        describe_counter!("notifier_errors_total", "Notifier send failures.");
    });
}

/// What `publish` did with an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOutcome {
    /// False when an alert for the same analysis already existed.
    pub stored: bool,
    /// False when the live copy was dropped (channel full or closed).
    pub notified: bool,
}

#[derive(Clone)]
pub struct AlertSink {
    store: Store,
    tx: mpsc::Sender<Alert>,
}

impl AlertSink {
    /// Sink plus the receiving end for downstream consumers.
    pub fn new(store: Store, capacity: usize) -> (Self, mpsc::Receiver<Alert>) {
        ensure_metrics_described();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { store, tx }, rx)
    }

    /// Persist, then try a non-blocking send. Storage errors propagate;
    /// a full channel only loses the live copy.
    pub async fn publish(&self, alert: Alert) -> Result<PublishOutcome, StoreError> {
        let stored = self.store.save_alert(&alert).await?;
        if !stored {
            tracing::debug!(analysis_id = %alert.analysis_id, "alert already recorded");
            return Ok(PublishOutcome {
                stored: false,
                notified: false,
            });
        }
        counter!("alerts_created_total", "severity" => alert.severity.as_str()).increment(1);

        let notified = match self.tx.try_send(alert) {
            Ok(()) => true,
            Err(TrySendError::Full(a)) => {
                counter!("alerts_notify_dropped_total").increment(1);
                tracing::warn!(alert_id = %a.id, "alert channel full, live notification dropped");
                false
            }
            Err(TrySendError::Closed(a)) => {
                tracing::debug!(alert_id = %a.id, "no alert consumer attached");
                false
            }
        };
        Ok(PublishOutcome {
            stored: true,
            notified,
        })
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Fan-out over all configured channels. Failures are logged, never propagated.
#[derive(Default)]
pub struct NotifierMux {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl NotifierMux {
    pub fn new(notifiers: Vec<Box<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    /// Channels whose credentials are present in the environment.
    pub fn from_env() -> Self {
        let mut notifiers: Vec<Box<dyn Notifier>> = Vec::new();
        if let Some(n) = DiscordNotifier::from_env() {
            notifiers.push(Box::new(n));
        }
        if let Some(n) = SlackNotifier::from_env() {
            notifiers.push(Box::new(n));
        }
        match EmailNotifier::from_env() {
            Ok(Some(n)) => notifiers.push(Box::new(n)),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = ?e, "email notifier misconfigured, disabled"),
        }
        Self { notifiers }
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.notifiers.iter().map(|n| n.name()).collect()
    }

    pub async fn send_all(&self, alert: &Alert) {
        for n in &self.notifiers {
            if let Err(e) = n.send(alert).await {
                counter!("notifier_errors_total", "notifier" => n.name()).increment(1);
                tracing::warn!(error = ?e, notifier = n.name(), alert_id = %alert.id, "notify failed");
            }
        }
    }
}

/// Drain the alert channel until every sender is gone.
pub fn spawn_dispatcher(
    mut rx: mpsc::Receiver<Alert>,
    mux: NotifierMux,
    mut gate: AntiFlutter,
) -> JoinHandle<()> {
    ensure_metrics_described();
    tokio::spawn(async move {
        tracing::info!(notifiers = ?mux.names(), "alert dispatcher started");
        while let Some(alert) = rx.recv().await {
            let now = Utc::now();
            if !gate.should_alert(&alert, now) {
                counter!("alerts_suppressed_total").increment(1);
                tracing::debug!(alert_id = %alert.id, "alert suppressed by cooldown");
                continue;
            }
            mux.send_all(&alert).await;
            gate.record_alert(&alert, now);
            counter!("alerts_notified_total").increment(1);
        }
        tracing::info!("alert dispatcher stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;
    use std::sync::{Arc, Mutex};

    fn alert(analysis_id: &str) -> Alert {
        Alert {
            id: uuid::Uuid::new_v4().to_string(),
            news_id: "n1".into(),
            analysis_id: analysis_id.into(),
            severity: Severity::High,
            title: "🟢 High impact | desk".into(),
            message: "m".into(),
            stocks: vec!["AAPL".into()],
            created_at: Utc::now(),
            acknowledged: false,
        }
    }

    struct Recorder(Arc<Mutex<Vec<String>>>);

    #[async_trait::async_trait]
    impl Notifier for Recorder {
        async fn send(&self, alert: &Alert) -> Result<()> {
            self.0.lock().unwrap().push(alert.analysis_id.clone());
            Ok(())
        }
        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    #[tokio::test]
    async fn full_channel_drops_live_copy_but_keeps_row() {
        let store = Store::open_in_memory().await.unwrap();
        let (sink, _rx) = AlertSink::new(store.clone(), 1);

        let first = sink.publish(alert("a1")).await.unwrap();
        assert_eq!(first, PublishOutcome { stored: true, notified: true });
        let second = sink.publish(alert("a2")).await.unwrap();
        assert_eq!(second, PublishOutcome { stored: true, notified: false });
        let dup = sink.publish(alert("a1")).await.unwrap();
        assert!(!dup.stored);

        let (rows, total) = store
            .list_alerts(&Default::default(), Default::default())
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn dispatcher_forwards_and_applies_cooldown() {
        let store = Store::open_in_memory().await.unwrap();
        let (sink, rx) = AlertSink::new(store, 8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mux = NotifierMux::new(vec![Box::new(Recorder(seen.clone()))]);
        let handle = spawn_dispatcher(rx, mux, AntiFlutter::new(600));

        sink.publish(alert("a1")).await.unwrap();
        // same symbol set within cooldown
        sink.publish(alert("a2")).await.unwrap();
        drop(sink);
        handle.await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["a1".to_string()]);
    }
}
