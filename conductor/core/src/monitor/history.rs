//! Snapshot History
//!
//! Periodic, append-only snapshots of each model's metrics, kept in a capped
//! ring buffer per model for trend queries over a trailing window.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metrics::{HealthStatus, ModelMetrics};

/// Point-in-time copy of the interesting fields of a [`ModelMetrics`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub model_id: String,
    pub taken_at: DateTime<Utc>,
    pub request_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub total_cost: f64,
    pub current_load: u64,
    pub health_score: f64,
    pub status: HealthStatus,
}

impl MetricsSnapshot {
    #[must_use]
    pub fn capture(metrics: &ModelMetrics, taken_at: DateTime<Utc>) -> Self {
        Self {
            model_id: metrics.model_id.clone(),
            taken_at,
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            error_rate: metrics.error_rate,
            avg_latency_ms: metrics.avg_latency_ms,
            total_cost: metrics.total_cost,
            current_load: metrics.current_load,
            health_score: metrics.health_score,
            status: metrics.status,
        }
    }
}

/// Summary of the snapshots inside a trailing window
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    pub model_id: String,
    pub samples: usize,
    pub mean_error_rate: f64,
    pub mean_latency_ms: f64,
    pub mean_health_score: f64,
    /// Latest minus earliest average latency
    pub latency_delta_ms: f64,
    /// Requests recorded between the earliest and latest snapshot
    pub requests_in_window: u64,
}

/// Ring buffers of snapshots, one per model
#[derive(Debug)]
pub struct SnapshotHistory {
    capacity: usize,
    series: HashMap<String, VecDeque<MetricsSnapshot>>,
}

impl SnapshotHistory {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: HashMap::new(),
        }
    }

    /// Append a snapshot, dropping the oldest once the model's buffer is full
    pub fn push(&mut self, snapshot: MetricsSnapshot) {
        let capacity = self.capacity;
        let series = self
            .series
            .entry(snapshot.model_id.clone())
            .or_insert_with(|| VecDeque::with_capacity(capacity.min(64)));
        if series.len() >= capacity {
            series.pop_front();
        }
        series.push_back(snapshot);
    }

    /// Number of snapshots held for a model
    #[must_use]
    pub fn len(&self, model_id: &str) -> usize {
        self.series.get(model_id).map_or(0, VecDeque::len)
    }

    /// Snapshots taken at or after `since`, oldest first
    #[must_use]
    pub fn since(&self, model_id: &str, since: DateTime<Utc>) -> Vec<MetricsSnapshot> {
        self.series
            .get(model_id)
            .map(|series| {
                series
                    .iter()
                    .filter(|s| s.taken_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Summarise the snapshots taken at or after `since`
    #[must_use]
    pub fn trend(&self, model_id: &str, since: DateTime<Utc>) -> Option<TrendSummary> {
        let window = self.since(model_id, since);
        let first = window.first()?;
        let last = window.last()?;
        let n = window.len() as f64;

        Some(TrendSummary {
            model_id: model_id.to_string(),
            samples: window.len(),
            mean_error_rate: window.iter().map(|s| s.error_rate).sum::<f64>() / n,
            mean_latency_ms: window.iter().map(|s| s.avg_latency_ms).sum::<f64>() / n,
            mean_health_score: window.iter().map(|s| s.health_score).sum::<f64>() / n,
            latency_delta_ms: last.avg_latency_ms - first.avg_latency_ms,
            requests_in_window: last.request_count.saturating_sub(first.request_count),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn snapshot(model: &str, at: DateTime<Utc>, requests: u64, latency: f64) -> MetricsSnapshot {
        let mut metrics = ModelMetrics::new(model.to_string(), at);
        metrics.request_count = requests;
        metrics.avg_latency_ms = latency;
        MetricsSnapshot::capture(&metrics, at)
    }

    #[test]
    fn test_ring_buffer_cap() {
        let mut history = SnapshotHistory::new(3);
        let now = Utc::now();
        for i in 0..5 {
            history.push(snapshot("m", now + Duration::minutes(i), i as u64, 0.0));
        }
        assert_eq!(history.len("m"), 3);
        let all = history.since("m", now - Duration::days(1));
        assert_eq!(all.first().unwrap().request_count, 2);
        assert_eq!(all.last().unwrap().request_count, 4);
    }

    #[test]
    fn test_trailing_window_and_trend() {
        let mut history = SnapshotHistory::new(100);
        let now = Utc::now();
        history.push(snapshot("m", now - Duration::minutes(30), 0, 100.0));
        history.push(snapshot("m", now - Duration::minutes(4), 10, 200.0));
        history.push(snapshot("m", now - Duration::minutes(2), 25, 300.0));
        history.push(snapshot("other", now, 99, 1.0));

        let recent = history.since("m", now - Duration::minutes(5));
        assert_eq!(recent.len(), 2);

        let trend = history.trend("m", now - Duration::minutes(5)).unwrap();
        assert_eq!(trend.samples, 2);
        assert!((trend.mean_latency_ms - 250.0).abs() < 1e-9);
        assert!((trend.latency_delta_ms - 100.0).abs() < 1e-9);
        assert_eq!(trend.requests_in_window, 15);

        assert!(history.trend("m", now + Duration::minutes(1)).is_none());
        assert!(history.trend("unknown", now - Duration::days(1)).is_none());
    }
}
