#![allow(missing_docs)]
//! Model Monitor
//!
//! Per-model performance tracking with threshold alerting, a staleness-driven
//! health sweep and snapshot history.
//!
//! # Architecture
//!
//! ```text
//!  ModelRegistry
//!       |  record_request / record_failure / record_error / in_flight
//!       v
//! +--------------+     evaluate      +-------------+   try_send   +-----------+
//! | ModelMonitor |------------------>| AlertEngine |------------->| Receiver  |
//! |  metrics map |                   |  rules      |  (bounded)   | (caller)  |
//! +------+-------+                   +-------------+              +-----------+
//!        | take_snapshots
//!        v
//! +-----------------+
//! | SnapshotHistory |
//! +-----------------+
//! ```
//!
//! Updates for one model are linearized by the metrics write lock. Alert
//! evaluation runs on a copy of the record after the lock is released.

pub mod alerts;
pub mod history;
pub mod metrics;

use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::MonitorConfig;

pub use alerts::{
    Alert, AlertEngine, AlertRule, Comparison, MetricName, Severity, WILDCARD_MODEL,
};
pub use history::{MetricsSnapshot, SnapshotHistory, TrendSummary};
pub use metrics::{Counter, HealthStatus, ModelMetrics};

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// Metrics store, alert engine and snapshot history behind one ingestion API
pub struct ModelMonitor {
    config: MonitorConfig,
    metrics: RwLock<HashMap<String, ModelMetrics>>,
    alerts: AlertEngine,
    history: RwLock<SnapshotHistory>,
}

impl ModelMonitor {
    /// Create a monitor and the receiving end of its alert channel
    #[must_use]
    pub fn new(config: MonitorConfig) -> (Self, mpsc::Receiver<Alert>) {
        let (alerts, rx) = AlertEngine::new(config.alert_channel_capacity);
        let history = SnapshotHistory::new(config.history_capacity);
        let monitor = Self {
            config,
            metrics: RwLock::new(HashMap::new()),
            alerts,
            history: RwLock::new(history),
        };
        (monitor, rx)
    }

    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Apply an update to a model's record, creating it on first touch
    ///
    /// Check, create and write happen under one exclusive lock. Returns a copy
    /// of the updated record.
    fn update<F>(&self, model_id: &str, now: DateTime<Utc>, f: F) -> ModelMetrics
    where
        F: FnOnce(&mut ModelMetrics),
    {
        let mut metrics = self.metrics.write();
        let record = metrics
            .entry(model_id.to_string())
            .or_insert_with(|| ModelMetrics::new(model_id.to_string(), now));
        f(record);
        record.refresh_health_score(now, self.config.max_load);
        record.clone()
    }

    /// Record a completed provider call
    pub fn record_request(&self, model_id: &str, latency: Duration, cost: f64) {
        let now = Utc::now();
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let updated = self.update(model_id, now, |m| m.record_request(latency_ms, cost, now));
        debug!(
            model = model_id,
            latency_ms,
            cost,
            requests = updated.request_count,
            "Recorded request"
        );
        self.alerts.evaluate(&updated, now);
    }

    /// Record a provider call that failed
    ///
    /// Attempt, error and latency land in one update, and the rules see the
    /// record once.
    pub fn record_failure(&self, model_id: &str, latency: Duration, error: &dyn fmt::Display) {
        let now = Utc::now();
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let message = error.to_string();
        let previous = self.health_status(model_id);
        let updated = self.update(model_id, now, |m| m.record_failure(latency_ms, message, now));
        self.finish_error(previous, &updated, now);
    }

    /// Record a failure that never reached a provider
    pub fn record_error(&self, model_id: &str, error: &dyn fmt::Display) {
        let now = Utc::now();
        let message = error.to_string();
        let previous = self.health_status(model_id);
        let updated = self.update(model_id, now, |m| m.record_error(message, now));
        self.finish_error(previous, &updated, now);
    }

    fn finish_error(&self, previous: Option<HealthStatus>, updated: &ModelMetrics, now: DateTime<Utc>) {
        if previous != Some(updated.status) && updated.status != HealthStatus::Healthy {
            warn!(
                model = %updated.model_id,
                error_rate = updated.error_rate,
                status = %updated.status,
                "Model health changed"
            );
        }
        self.alerts.evaluate(updated, now);
    }

    /// Count a provider call as in flight until the guard drops
    #[must_use = "the call stops counting as in flight when the guard drops"]
    pub fn in_flight<'a>(&'a self, model_id: &'a str) -> InFlight<'a> {
        self.begin_request(model_id);
        InFlight {
            monitor: self,
            model_id,
        }
    }

    /// A provider call for this model started
    pub fn begin_request(&self, model_id: &str) {
        self.update(model_id, Utc::now(), ModelMetrics::begin_request);
    }

    /// A provider call for this model finished
    pub fn end_request(&self, model_id: &str) {
        self.update(model_id, Utc::now(), ModelMetrics::end_request);
    }

    /// Copy of one model's metrics with a fresh health score
    #[must_use]
    pub fn metrics(&self, model_id: &str) -> Option<ModelMetrics> {
        let now = Utc::now();
        self.metrics.read().get(model_id).map(|m| {
            let mut copy = m.clone();
            copy.refresh_health_score(now, self.config.max_load);
            copy
        })
    }

    /// Copy of every model's metrics with fresh health scores
    ///
    /// Strategies run against this copy, never against the live map.
    #[must_use]
    pub fn snapshot_all(&self) -> HashMap<String, ModelMetrics> {
        let now = Utc::now();
        let mut copy = self.metrics.read().clone();
        for metrics in copy.values_mut() {
            metrics.refresh_health_score(now, self.config.max_load);
        }
        copy
    }

    #[must_use]
    pub fn health_status(&self, model_id: &str) -> Option<HealthStatus> {
        self.metrics.read().get(model_id).map(|m| m.status)
    }

    /// Mark every model idle past the staleness window unhealthy
    ///
    /// Returns the IDs newly marked.
    pub fn sweep_stale(&self) -> Vec<String> {
        self.sweep_stale_at(Utc::now())
    }

    /// [`Self::sweep_stale`] against an explicit clock
    pub fn sweep_stale_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let cutoff = now - to_chrono(self.config.staleness());
        let mut marked = Vec::new();
        let mut metrics = self.metrics.write();
        for record in metrics.values_mut() {
            if record.updated_at < cutoff && record.status != HealthStatus::Unhealthy {
                record.mark_unhealthy();
                marked.push(record.model_id.clone());
            }
        }
        drop(metrics);

        for model_id in &marked {
            warn!(model = %model_id, "No activity within staleness window, marking unhealthy");
        }
        marked
    }

    /// Append one snapshot per model to the history
    pub fn take_snapshots(&self) -> usize {
        self.take_snapshots_at(Utc::now())
    }

    /// [`Self::take_snapshots`] against an explicit clock
    pub fn take_snapshots_at(&self, now: DateTime<Utc>) -> usize {
        let snapshots: Vec<MetricsSnapshot> = self
            .metrics
            .read()
            .values()
            .map(|m| {
                let mut copy = m.clone();
                copy.refresh_health_score(now, self.config.max_load);
                MetricsSnapshot::capture(&copy, now)
            })
            .collect();

        let count = snapshots.len();
        let mut history = self.history.write();
        for snapshot in snapshots {
            history.push(snapshot);
        }
        count
    }

    /// Snapshots of a model over a trailing window, oldest first
    #[must_use]
    pub fn history(&self, model_id: &str, trailing: Duration) -> Vec<MetricsSnapshot> {
        let since = Utc::now() - to_chrono(trailing);
        self.history.read().since(model_id, since)
    }

    /// Trend of a model over a trailing window
    #[must_use]
    pub fn trend(&self, model_id: &str, trailing: Duration) -> Option<TrendSummary> {
        let since = Utc::now() - to_chrono(trailing);
        self.history.read().trend(model_id, since)
    }

    /// Add or replace an alert rule; returns its ID
    pub fn add_rule(&self, rule: AlertRule) -> String {
        self.alerts.add_rule(rule)
    }

    /// Remove an alert rule
    pub fn remove_rule(&self, rule_id: &str) -> bool {
        self.alerts.remove_rule(rule_id)
    }

    /// Enable or disable an alert rule
    pub fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> bool {
        self.alerts.set_rule_enabled(rule_id, enabled)
    }

    #[must_use]
    pub fn rules(&self) -> Vec<AlertRule> {
        self.alerts.rules()
    }

    /// Alerts lost to a full or closed channel
    #[must_use]
    pub fn dropped_alerts(&self) -> u64 {
        self.alerts.dropped_count()
    }

    /// Alerts fired since startup
    #[must_use]
    pub fn fired_alerts(&self) -> u64 {
        self.alerts.fired_count()
    }

    /// Export as Prometheus text format
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let mut snapshot: Vec<ModelMetrics> = self.snapshot_all().into_values().collect();
        snapshot.sort_by(|a, b| a.model_id.cmp(&b.model_id));

        let mut output = String::new();
        let families: [(&str, &str, &str, fn(&ModelMetrics) -> f64); 7] = [
            ("model_requests_total", "counter", "Finished attempts per model", |m| m.request_count as f64),
            ("model_errors_total", "counter", "Failures per model", |m| m.error_count as f64),
            ("model_latency_avg_ms", "gauge", "Running average latency", |m| m.avg_latency_ms),
            ("model_cost_total", "counter", "Accumulated cost", |m| m.total_cost),
            ("model_in_flight", "gauge", "Requests in flight", |m| m.current_load as f64),
            ("model_health_score", "gauge", "Composite health score", |m| m.health_score),
            ("model_unhealthy", "gauge", "1 when the model is unhealthy", |m| {
                f64::from(u8::from(m.status == HealthStatus::Unhealthy))
            }),
        ];

        for (name, kind, help, value) in families {
            let _ = writeln!(output, "# HELP {name} {help}\n# TYPE {name} {kind}");
            for metrics in &snapshot {
                let _ = writeln!(output, "{name}{{model=\"{}\"}} {}", metrics.model_id, value(metrics));
            }
            output.push('\n');
        }

        let _ = writeln!(
            output,
            "# HELP alerts_dropped_total Alerts lost to a full channel\n\
             # TYPE alerts_dropped_total counter\n\
             alerts_dropped_total {}\n",
            self.dropped_alerts()
        );
        output
    }
}

/// In-flight marker for one provider call, see [`ModelMonitor::in_flight`]
///
/// Dropping it ends the request, including while a panicking provider unwinds.
pub struct InFlight<'a> {
    monitor: &'a ModelMonitor,
    model_id: &'a str,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.monitor.end_request(self.model_id);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;

    fn monitor() -> (ModelMonitor, mpsc::Receiver<Alert>) {
        ModelMonitor::new(MonitorConfig::default())
    }

    fn drain(rx: &mut mpsc::Receiver<Alert>) -> Vec<Alert> {
        let mut alerts = Vec::new();
        while let Ok(alert) = rx.try_recv() {
            alerts.push(alert);
        }
        alerts
    }

    #[test]
    fn test_lazy_creation() {
        let (monitor, _rx) = monitor();
        assert!(monitor.metrics("m1").is_none());

        monitor.record_error("m1", &"boom");
        let metrics = monitor.metrics("m1").unwrap();
        assert_eq!(metrics.error_count, 1);
        assert_eq!(metrics.request_count, 1);
        assert_eq!(metrics.success_count, 0);
        assert_eq!(metrics.provider_calls, 0);
        assert_eq!(metrics.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_alert_fires_once_when_threshold_crossed() {
        let (monitor, mut rx) = monitor();
        monitor.add_rule(AlertRule::new(
            "m1",
            MetricName::ErrorRate,
            Comparison::GreaterThan,
            0.15,
            Severity::Warning,
        ));

        for _ in 0..8 {
            monitor.record_request("m1", Duration::from_millis(100), 0.0);
        }
        monitor.record_error("m1", &"first");
        assert!(drain(&mut rx).is_empty(), "1/9 is not above 0.15");

        monitor.record_error("m1", &"second");
        let alerts = drain(&mut rx);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].model_id, "m1");
        assert!((alerts[0].value - 0.2).abs() < 1e-9);
        assert!((alerts[0].threshold - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_failure_evaluates_rules_once() {
        let (monitor, mut rx) = monitor();
        monitor.add_rule(AlertRule::new(
            "m1",
            MetricName::ErrorRate,
            Comparison::GreaterThan,
            0.1,
            Severity::Warning,
        ));

        for _ in 0..10 {
            monitor.record_request("m1", Duration::from_millis(100), 0.0);
        }
        for _ in 0..4 {
            monitor.record_failure("m1", Duration::from_millis(100), &"timed out");
        }

        // 1/11 stays under the threshold, then 2/12, 3/13, 4/14
        let values: Vec<f64> = drain(&mut rx).iter().map(|a| a.value).collect();
        assert_eq!(values.len(), 3);
        for (value, errors) in values.iter().zip(2_u32..) {
            let expected = f64::from(errors) / f64::from(errors + 10);
            assert!((value - expected).abs() < 1e-9, "{value} != {expected}");
        }
        assert!(values.windows(2).all(|w| w[0] < w[1]));

        let metrics = monitor.metrics("m1").unwrap();
        assert_eq!(metrics.request_count, 14);
        assert_eq!(metrics.provider_calls, 14);
        assert_eq!(metrics.success_count + metrics.error_count, metrics.request_count);
    }

    #[test]
    fn test_in_flight_guard_releases_on_panic() {
        let (monitor, _rx) = monitor();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _in_flight = monitor.in_flight("m1");
            assert_eq!(monitor.metrics("m1").unwrap().current_load, 1);
            panic!("provider blew up");
        }));
        assert!(result.is_err());
        assert_eq!(monitor.metrics("m1").unwrap().current_load, 0);
    }

    #[test]
    fn test_error_rate_status_transitions() {
        let (monitor, _rx) = monitor();
        for _ in 0..2 {
            monitor.record_request("m1", Duration::from_millis(10), 0.0);
        }
        assert_eq!(monitor.health_status("m1"), Some(HealthStatus::Healthy));

        monitor.record_error("m1", &"e");
        assert_eq!(monitor.health_status("m1"), Some(HealthStatus::Degraded));

        monitor.record_error("m1", &"e");
        assert_eq!(monitor.health_status("m1"), Some(HealthStatus::Unhealthy));

        for _ in 0..36 {
            monitor.record_request("m1", Duration::from_millis(10), 0.0);
        }
        // 2 errors over 40 requests
        assert_eq!(monitor.health_status("m1"), Some(HealthStatus::Healthy));
    }

    #[test]
    fn test_staleness_sweep() {
        let (monitor, _rx) = monitor();
        monitor.record_request("old", Duration::from_millis(10), 0.0);
        monitor.record_request("fresh", Duration::from_millis(10), 0.0);

        let now = Utc::now();
        assert!(monitor.sweep_stale_at(now).is_empty());

        monitor
            .metrics
            .write()
            .get_mut("old")
            .unwrap()
            .updated_at = now - ChronoDuration::minutes(10);

        let marked = monitor.sweep_stale_at(now);
        assert_eq!(marked, vec!["old".to_string()]);
        assert_eq!(monitor.health_status("old"), Some(HealthStatus::Unhealthy));
        assert_eq!(monitor.health_status("fresh"), Some(HealthStatus::Healthy));

        // Already unhealthy models are not reported twice
        assert!(monitor.sweep_stale_at(now).is_empty());

        // Fresh traffic clears the forced state
        monitor.record_request("old", Duration::from_millis(10), 0.0);
        assert_eq!(monitor.health_status("old"), Some(HealthStatus::Healthy));
    }

    #[test]
    fn test_load_tracking() {
        let (monitor, _rx) = monitor();
        monitor.begin_request("m1");
        monitor.begin_request("m1");
        assert_eq!(monitor.metrics("m1").unwrap().current_load, 2);
        monitor.end_request("m1");
        assert_eq!(monitor.metrics("m1").unwrap().current_load, 1);
    }

    #[test]
    fn test_snapshot_history() {
        let (monitor, _rx) = monitor();
        monitor.record_request("m1", Duration::from_millis(100), 0.5);
        monitor.record_request("m2", Duration::from_millis(100), 0.5);

        assert_eq!(monitor.take_snapshots(), 2);
        monitor.record_request("m1", Duration::from_millis(300), 0.5);
        assert_eq!(monitor.take_snapshots(), 2);

        let history = monitor.history("m1", Duration::from_secs(60));
        assert_eq!(history.len(), 2);
        let trend = monitor.trend("m1", Duration::from_secs(60)).unwrap();
        assert_eq!(trend.samples, 2);
        assert_eq!(trend.requests_in_window, 1);
        assert!(trend.latency_delta_ms > 0.0);
    }

    #[test]
    fn test_prometheus_export() {
        let (monitor, _rx) = monitor();
        monitor.record_request("m1", Duration::from_millis(100), 0.25);
        monitor.record_error("m1", &"e");

        let text = monitor.to_prometheus();
        assert!(text.contains("# TYPE model_requests_total counter"));
        assert!(text.contains("model_requests_total{model=\"m1\"} 2"));
        assert!(text.contains("model_errors_total{model=\"m1\"} 1"));
        assert!(text.contains("model_unhealthy{model=\"m1\"} 1"));
        assert!(text.contains("alerts_dropped_total 0"));
    }
}
