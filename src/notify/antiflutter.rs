// src/notify/antiflutter.rs
use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::models::{Alert, Severity};

/// Cooldown gate to prevent notification spam.
/// - Keyed on the alert's symbol set (order-insensitive).
/// - First alert for a key always passes; inside the cooldown it is suppressed.
/// - Critical alerts always pass.
/// - State is updated explicitly via `record_alert` after sending.
#[derive(Debug, Clone, Default)]
pub struct AntiFlutter {
    cooldown: ChronoDuration,
    last_sent: HashMap<String, DateTime<Utc>>,
}

impl AntiFlutter {
    /// `cooldown_secs` < 0 is treated as 0 (no cooldown).
    pub fn new(cooldown_secs: i64) -> Self {
        Self {
            cooldown: ChronoDuration::seconds(cooldown_secs.max(0)),
            last_sent: HashMap::new(),
        }
    }

    fn key(alert: &Alert) -> String {
        let mut syms: Vec<&str> = alert.stocks.iter().map(String::as_str).collect();
        syms.sort_unstable();
        syms.dedup();
        syms.join(",")
    }

    /// Check if we may notify at `now`. Does NOT mutate state.
    pub fn should_alert(&self, alert: &Alert, now: DateTime<Utc>) -> bool {
        if alert.severity == Severity::Critical {
            return true;
        }
        match self.last_sent.get(&Self::key(alert)) {
            None => true,
            Some(ts) => now.signed_duration_since(*ts) >= self.cooldown,
        }
    }

    pub fn record_alert(&mut self, alert: &Alert, now: DateTime<Utc>) {
        // expired keys are dropped so the map stays bounded by the cooldown window
        let cooldown = self.cooldown;
        self.last_sent
            .retain(|_, ts| now.signed_duration_since(*ts) < cooldown);
        self.last_sent.insert(Self::key(alert), now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn alert(stocks: &[&str], severity: Severity) -> Alert {
        Alert {
            id: "x".into(),
            news_id: "n".into(),
            analysis_id: "a".into(),
            severity,
            title: String::new(),
            message: String::new(),
            stocks: stocks.iter().map(|s| s.to_string()).collect(),
            created_at: Utc::now(),
            acknowledged: false,
        }
    }

    #[test]
    fn inside_cooldown_blocked_per_symbol_set() {
        let mut af = AntiFlutter::new(10_800);
        let t0 = Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap();
        let a = alert(&["AAPL", "MSFT"], Severity::High);
        assert!(af.should_alert(&a, t0));
        af.record_alert(&a, t0);

        let t1 = t0 + ChronoDuration::seconds(120);
        assert!(!af.should_alert(&alert(&["MSFT", "AAPL"], Severity::High), t1));
        assert!(af.should_alert(&alert(&["TSLA"], Severity::High), t1));
        assert!(af.should_alert(&alert(&["AAPL", "MSFT"], Severity::Critical), t1));
    }

    #[test]
    fn after_cooldown_passes() {
        let mut af = AntiFlutter::new(10_800);
        let t0 = Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap();
        let a = alert(&["AAPL"], Severity::High);
        af.record_alert(&a, t0);
        let t_after = t0 + ChronoDuration::seconds(10_800 + 5);
        assert!(af.should_alert(&a, t_after));
    }
}
