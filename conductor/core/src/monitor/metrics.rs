//! Per-Model Metrics
//!
//! Pure data plus update functions. Locking lives in [`super::ModelMonitor`];
//! everything here operates on a plain `&mut ModelMetrics`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::alerts::MetricName;

/// Error rate above which a model is degraded
pub const DEGRADED_ERROR_RATE: f64 = 0.1;
/// Error rate at or above which a model is unhealthy
pub const UNHEALTHY_ERROR_RATE: f64 = 0.5;
/// Latency at which the latency term of the health score reaches zero
pub const HEALTH_LATENCY_CEILING_MS: f64 = 1000.0;
/// Idle time at which the recency term of the health score reaches zero
pub const HEALTH_RECENCY_WINDOW_MINUTES: f64 = 60.0;

// ============================================================================
// Counter
// ============================================================================

/// A simple atomic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

// ============================================================================
// Health status
// ============================================================================

/// Health state of a model
///
/// ```text
/// healthy --(error rate > 0.1)--> degraded --(error rate >= 0.5)--> unhealthy
///    ^                                                                  |
///    +----------(rate back under 0.1 and recent activity)--------------+
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Status implied by an error rate alone
    #[must_use]
    pub fn from_error_rate(error_rate: f64) -> Self {
        if error_rate >= UNHEALTHY_ERROR_RATE {
            Self::Unhealthy
        } else if error_rate > DEGRADED_ERROR_RATE {
            Self::Degraded
        } else {
            Self::Healthy
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Model metrics
// ============================================================================

/// Performance record for a single model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub model_id: String,
    /// Attempts that finished, always `success_count + error_count`
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    /// Attempts that reached a provider, successful or not
    pub provider_calls: u64,
    /// Running average provider latency
    pub avg_latency_ms: f64,
    pub total_cost: f64,
    /// Requests currently in flight
    pub current_load: u64,
    pub success_rate: f64,
    pub error_rate: f64,
    /// Composite score in [0, 1], refreshed on update and on read
    pub health_score: f64,
    pub status: HealthStatus,
    pub last_error: Option<String>,
    /// Last provider call, successful or not
    pub last_request_at: Option<DateTime<Utc>>,
    /// Last update of any kind
    pub updated_at: DateTime<Utc>,
}

impl ModelMetrics {
    #[must_use]
    pub fn new(model_id: String, now: DateTime<Utc>) -> Self {
        Self {
            model_id,
            request_count: 0,
            success_count: 0,
            error_count: 0,
            provider_calls: 0,
            avg_latency_ms: 0.0,
            total_cost: 0.0,
            current_load: 0,
            success_rate: 1.0,
            error_rate: 0.0,
            health_score: 0.0,
            status: HealthStatus::Healthy,
            last_error: None,
            last_request_at: None,
            updated_at: now,
        }
    }

    /// Record one successful provider call
    pub fn record_request(&mut self, latency_ms: f64, cost: f64, now: DateTime<Utc>) {
        self.success_count += 1;
        self.record_provider_call(latency_ms, now);
        self.total_cost += cost.max(0.0);
        self.recompute_rates();
    }

    /// Record one failed provider call
    pub fn record_failure(&mut self, latency_ms: f64, message: String, now: DateTime<Utc>) {
        self.error_count += 1;
        self.last_error = Some(message);
        self.record_provider_call(latency_ms, now);
        self.recompute_rates();
    }

    /// Record one failure that never reached a provider
    pub fn record_error(&mut self, message: String, now: DateTime<Utc>) {
        self.error_count += 1;
        self.last_error = Some(message);
        self.updated_at = now;
        self.recompute_rates();
    }

    fn record_provider_call(&mut self, latency_ms: f64, now: DateTime<Utc>) {
        self.provider_calls += 1;
        self.avg_latency_ms += (latency_ms - self.avg_latency_ms) / self.provider_calls as f64;
        self.last_request_at = Some(now);
        self.updated_at = now;
    }

    /// A provider call started
    pub fn begin_request(&mut self) {
        self.current_load += 1;
    }

    /// A provider call finished
    pub fn end_request(&mut self) {
        self.current_load = self.current_load.saturating_sub(1);
    }

    fn recompute_rates(&mut self) {
        self.request_count = self.success_count + self.error_count;
        self.error_rate = if self.request_count == 0 {
            0.0
        } else {
            self.error_count as f64 / self.request_count as f64
        };
        self.success_rate = 1.0 - self.error_rate;
        self.status = HealthStatus::from_error_rate(self.error_rate);
    }

    /// Force the unhealthy state (staleness sweep)
    pub fn mark_unhealthy(&mut self) {
        self.status = HealthStatus::Unhealthy;
    }

    /// Average cost of one request, if any cost was recorded
    #[must_use]
    pub fn cost_per_request(&self) -> Option<f64> {
        if self.success_count == 0 || self.total_cost <= 0.0 {
            return None;
        }
        Some(self.total_cost / self.success_count as f64)
    }

    /// Minutes since the last completed request
    #[must_use]
    pub fn minutes_since_last_request(&self, now: DateTime<Utc>) -> Option<f64> {
        self.last_request_at
            .map(|at| ((now - at).num_milliseconds().max(0) as f64) / 60_000.0)
    }

    /// Composite health score in [0, 1]
    ///
    /// `0.4*success + 0.3*latency + 0.2*load + 0.1*recency`, each term floored
    /// at zero.
    #[must_use]
    pub fn compute_health_score(&self, now: DateTime<Utc>, max_load: u64) -> f64 {
        let success = self.success_rate.clamp(0.0, 1.0);
        let latency = (1.0 - self.avg_latency_ms / HEALTH_LATENCY_CEILING_MS).max(0.0);
        let load = if max_load == 0 {
            0.0
        } else {
            (1.0 - self.current_load as f64 / max_load as f64).max(0.0)
        };
        let recency = self
            .minutes_since_last_request(now)
            .map_or(0.0, |m| (1.0 - m / HEALTH_RECENCY_WINDOW_MINUTES).max(0.0));

        (0.4 * success + 0.3 * latency.min(1.0) + 0.2 * load.min(1.0) + 0.1 * recency.min(1.0))
            .clamp(0.0, 1.0)
    }

    /// Store a fresh health score
    pub fn refresh_health_score(&mut self, now: DateTime<Utc>, max_load: u64) {
        self.health_score = self.compute_health_score(now, max_load);
    }

    /// Read a named metric (alert evaluation)
    #[must_use]
    pub fn metric_value(&self, metric: MetricName) -> f64 {
        match metric {
            MetricName::ErrorRate => self.error_rate,
            MetricName::SuccessRate => self.success_rate,
            MetricName::AvgLatencyMs => self.avg_latency_ms,
            MetricName::TotalCost => self.total_cost,
            MetricName::RequestCount => self.request_count as f64,
            MetricName::ErrorCount => self.error_count as f64,
            MetricName::HealthScore => self.health_score,
            MetricName::CurrentLoad => self.current_load as f64,
        }
    }
}
