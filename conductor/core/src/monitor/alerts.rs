//! Threshold Alerting
//!
//! Rules compare one named metric of a model against a threshold. Evaluation
//! runs on every metrics update; firing alerts are pushed into a bounded
//! channel with `try_send`, so a slow or missing consumer causes drops, never
//! backpressure into the request path.

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use super::metrics::{Counter, ModelMetrics};

/// Model ID that matches every model
pub const WILDCARD_MODEL: &str = "*";

// ============================================================================
// Rule vocabulary
// ============================================================================

/// Metric a rule reads from [`ModelMetrics`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    ErrorRate,
    SuccessRate,
    AvgLatencyMs,
    TotalCost,
    RequestCount,
    ErrorCount,
    HealthScore,
    CurrentLoad,
}

impl MetricName {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ErrorRate => "error_rate",
            Self::SuccessRate => "success_rate",
            Self::AvgLatencyMs => "avg_latency_ms",
            Self::TotalCost => "total_cost",
            Self::RequestCount => "request_count",
            Self::ErrorCount => "error_count",
            Self::HealthScore => "health_score",
            Self::CurrentLoad => "current_load",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison applied as `value <op> threshold`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "==")]
    Equal,
}

impl Comparison {
    #[must_use]
    pub fn matches(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::GreaterOrEqual => value >= threshold,
            Self::LessThan => value < threshold,
            Self::LessOrEqual => value <= threshold,
            Self::Equal => (value - threshold).abs() < f64::EPSILON,
        }
    }

    #[must_use]
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::GreaterThan => ">",
            Self::GreaterOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessOrEqual => "<=",
            Self::Equal => "==",
        }
    }
}

/// Alert severity
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Critical,
}

// ============================================================================
// Rules and alerts
// ============================================================================

fn new_rule_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn enabled_by_default() -> bool {
    true
}

/// A threshold rule
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    #[serde(default = "new_rule_id")]
    pub id: String,
    /// Model the rule watches, or [`WILDCARD_MODEL`]
    pub model_id: String,
    pub metric: MetricName,
    pub comparison: Comparison,
    pub threshold: f64,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl AlertRule {
    pub fn new(
        model_id: impl Into<String>,
        metric: MetricName,
        comparison: Comparison,
        threshold: f64,
        severity: Severity,
    ) -> Self {
        Self {
            id: new_rule_id(),
            model_id: model_id.into(),
            metric,
            comparison,
            threshold,
            severity,
            enabled: true,
        }
    }

    /// Rule that watches every model
    #[must_use]
    pub fn for_all_models(
        metric: MetricName,
        comparison: Comparison,
        threshold: f64,
        severity: Severity,
    ) -> Self {
        Self::new(WILDCARD_MODEL, metric, comparison, threshold, severity)
    }

    #[must_use]
    pub fn applies_to(&self, model_id: &str) -> bool {
        self.enabled && (self.model_id == WILDCARD_MODEL || self.model_id == model_id)
    }

    /// Build an alert if the rule fires for this record
    #[must_use]
    pub fn evaluate(&self, metrics: &ModelMetrics, now: DateTime<Utc>) -> Option<Alert> {
        if !self.applies_to(&metrics.model_id) {
            return None;
        }
        let value = metrics.metric_value(self.metric);
        if !self.comparison.matches(value, self.threshold) {
            return None;
        }
        Some(Alert {
            id: uuid::Uuid::new_v4().to_string(),
            rule_id: self.id.clone(),
            model_id: metrics.model_id.clone(),
            metric: self.metric,
            comparison: self.comparison,
            value,
            threshold: self.threshold,
            severity: self.severity,
            fired_at: now,
        })
    }
}

/// A fired alert. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub model_id: String,
    pub metric: MetricName,
    pub comparison: Comparison,
    /// Observed value
    pub value: f64,
    pub threshold: f64,
    pub severity: Severity,
    pub fired_at: DateTime<Utc>,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:?}] {} {} = {:.4} {} {}",
            self.severity,
            self.model_id,
            self.metric,
            self.value,
            self.comparison.symbol(),
            self.threshold
        )
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Rule set plus the bounded delivery channel
pub struct AlertEngine {
    rules: RwLock<Vec<AlertRule>>,
    tx: mpsc::Sender<Alert>,
    fired: Counter,
    dropped: Counter,
}

impl AlertEngine {
    /// Create an engine and the receiving end of its channel
    #[must_use]
    pub fn new(channel_capacity: usize) -> (Self, mpsc::Receiver<Alert>) {
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        let engine = Self {
            rules: RwLock::new(Vec::new()),
            tx,
            fired: Counter::new(),
            dropped: Counter::new(),
        };
        (engine, rx)
    }

    /// Add or replace a rule (by ID); returns the rule ID
    pub fn add_rule(&self, rule: AlertRule) -> String {
        let id = rule.id.clone();
        let mut rules = self.rules.write();
        if let Some(existing) = rules.iter_mut().find(|r| r.id == id) {
            *existing = rule;
        } else {
            rules.push(rule);
        }
        id
    }

    /// Remove a rule; returns whether it existed
    pub fn remove_rule(&self, rule_id: &str) -> bool {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r.id != rule_id);
        rules.len() != before
    }

    /// Enable or disable a rule; returns whether it existed
    pub fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> bool {
        let mut rules = self.rules.write();
        match rules.iter_mut().find(|r| r.id == rule_id) {
            Some(rule) => {
                rule.enabled = enabled;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn rules(&self) -> Vec<AlertRule> {
        self.rules.read().clone()
    }

    /// Evaluate every applicable rule and deliver what fires
    ///
    /// Returns the number of alerts delivered.
    pub fn evaluate(&self, metrics: &ModelMetrics, now: DateTime<Utc>) -> usize {
        let fired: Vec<Alert> = self
            .rules
            .read()
            .iter()
            .filter_map(|rule| rule.evaluate(metrics, now))
            .collect();

        let mut delivered = 0;
        for alert in fired {
            self.fired.inc();
            warn!(
                model = %alert.model_id,
                metric = %alert.metric,
                value = alert.value,
                threshold = alert.threshold,
                severity = ?alert.severity,
                "Alert fired"
            );
            match self.tx.try_send(alert) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(alert)) => {
                    self.dropped.inc();
                    warn!(rule = %alert.rule_id, model = %alert.model_id, "Alert channel full, dropping alert");
                }
                Err(TrySendError::Closed(alert)) => {
                    self.dropped.inc();
                    debug!(rule = %alert.rule_id, "No alert subscriber, dropping alert");
                }
            }
        }
        delivered
    }

    /// Alerts that fired (delivered or not)
    #[must_use]
    pub fn fired_count(&self) -> u64 {
        self.fired.get()
    }

    /// Alerts lost to a full or closed channel
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.get()
    }
}
