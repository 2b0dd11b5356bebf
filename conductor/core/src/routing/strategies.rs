//! Built-in Selection Strategies
//!
//! | Name                   | Picks                                     |
//! |------------------------|-------------------------------------------|
//! | `round_robin`          | next model in a shared cyclic cursor      |
//! | `weighted_round_robin` | model with most remaining credit          |
//! | `least_connections`    | lowest in-flight load                     |
//! | `performance_based`    | highest health score                      |
//! | `cost_optimized`       | highest success rate per unit cost        |
//! | `random`               | uniform random choice                     |

use std::cmp::Ordering;
use std::collections::HashMap;

use parking_lot::Mutex;
use rand::seq::SliceRandom;

use super::{admissible, BalancerError, SelectionRequirements, Strategy};
use crate::models::Model;
use crate::monitor::ModelMetrics;

pub const ROUND_ROBIN: &str = "round_robin";
pub const WEIGHTED_ROUND_ROBIN: &str = "weighted_round_robin";
pub const LEAST_CONNECTIONS: &str = "least_connections";
pub const PERFORMANCE_BASED: &str = "performance_based";
pub const COST_OPTIMIZED: &str = "cost_optimized";
pub const RANDOM: &str = "random";

/// Health score assumed for a model with no metrics yet
pub const DEFAULT_HEALTH_SCORE: f64 = 0.5;
/// Cost score used when a model has no recorded cost
pub const DEFAULT_COST_SCORE: f64 = 1.0;

/// Pick the highest-scoring model; earlier candidates win ties
fn highest_scoring<F>(candidates: Vec<&Model>, score: F) -> Result<Model, BalancerError>
where
    F: Fn(&Model) -> f64,
{
    let mut scored: Vec<(f64, &Model)> = candidates.into_iter().map(|m| (score(m), m)).collect();
    // Stable sort keeps input order among equal scores
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    scored
        .first()
        .map(|(_, m)| (*m).clone())
        .ok_or(BalancerError::NoActiveModels)
}

// ============================================================================
// Round robin
// ============================================================================

/// Cycles through the admissible candidates, advancing on every call
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    cursor: Mutex<usize>,
}

impl RoundRobinStrategy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for RoundRobinStrategy {
    fn name(&self) -> &str {
        ROUND_ROBIN
    }

    fn select(
        &self,
        candidates: &[Model],
        _metrics: &HashMap<String, ModelMetrics>,
        requirements: &SelectionRequirements,
    ) -> Result<Model, BalancerError> {
        let admitted = admissible(candidates, requirements)?;
        let mut cursor = self.cursor.lock();
        let index = *cursor % admitted.len();
        *cursor = cursor.wrapping_add(1);
        Ok(admitted[index].clone())
    }
}

// ============================================================================
// Weighted round robin
// ============================================================================

/// Credit-based rotation weighted by health score
///
/// Each model starts a cycle with `floor(health * 10) + 1` credits. A call
/// takes one credit from the model holding the most. When the chosen model
/// runs out, every model's credits are reset.
#[derive(Debug, Default)]
pub struct WeightedRoundRobinStrategy {
    credits: Mutex<HashMap<String, u32>>,
}

impl WeightedRoundRobinStrategy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Credits a model receives at the start of a cycle
    #[must_use]
    pub fn weight(health_score: f64) -> u32 {
        (health_score.clamp(0.0, 1.0) * 10.0).floor() as u32 + 1
    }
}

impl Strategy for WeightedRoundRobinStrategy {
    fn name(&self) -> &str {
        WEIGHTED_ROUND_ROBIN
    }

    fn select(
        &self,
        candidates: &[Model],
        metrics: &HashMap<String, ModelMetrics>,
        requirements: &SelectionRequirements,
    ) -> Result<Model, BalancerError> {
        let admitted = admissible(candidates, requirements)?;
        let mut credits = self.credits.lock();

        let mut chosen: Option<(&Model, u32)> = None;
        for &model in &admitted {
            let remaining = *credits.entry(model.id.clone()).or_insert_with(|| {
                let health = metrics
                    .get(&model.id)
                    .map_or(DEFAULT_HEALTH_SCORE, |m| m.health_score);
                Self::weight(health)
            });
            if chosen.map_or(true, |(_, best)| remaining > best) {
                chosen = Some((model, remaining));
            }
        }

        let (model, _) = chosen.ok_or(BalancerError::NoActiveModels)?;
        let exhausted = credits.get_mut(&model.id).map_or(true, |c| {
            *c = c.saturating_sub(1);
            *c == 0
        });
        if exhausted {
            credits.clear();
        }
        Ok(model.clone())
    }
}

// ============================================================================
// Least connections
// ============================================================================

/// Lowest in-flight load; models without metrics count as idle
#[derive(Debug, Default)]
pub struct LeastConnectionsStrategy;

impl Strategy for LeastConnectionsStrategy {
    fn name(&self) -> &str {
        LEAST_CONNECTIONS
    }

    fn select(
        &self,
        candidates: &[Model],
        metrics: &HashMap<String, ModelMetrics>,
        requirements: &SelectionRequirements,
    ) -> Result<Model, BalancerError> {
        admissible(candidates, requirements)?
            .into_iter()
            .min_by_key(|m| metrics.get(&m.id).map_or(0, |mm| mm.current_load))
            .cloned()
            .ok_or(BalancerError::NoActiveModels)
    }
}

// ============================================================================
// Performance based
// ============================================================================

/// Highest health score
#[derive(Debug, Default)]
pub struct PerformanceBasedStrategy;

impl Strategy for PerformanceBasedStrategy {
    fn name(&self) -> &str {
        PERFORMANCE_BASED
    }

    fn select(
        &self,
        candidates: &[Model],
        metrics: &HashMap<String, ModelMetrics>,
        requirements: &SelectionRequirements,
    ) -> Result<Model, BalancerError> {
        highest_scoring(admissible(candidates, requirements)?, |m| {
            metrics
                .get(&m.id)
                .map_or(DEFAULT_HEALTH_SCORE, |mm| mm.health_score)
        })
    }
}

// ============================================================================
// Cost optimized
// ============================================================================

/// Highest `success_rate / cost_per_request`
#[derive(Debug, Default)]
pub struct CostOptimizedStrategy;

impl CostOptimizedStrategy {
    fn score(metrics: Option<&ModelMetrics>) -> f64 {
        metrics
            .and_then(|m| m.cost_per_request().map(|cost| m.success_rate / cost))
            .unwrap_or(DEFAULT_COST_SCORE)
    }
}

impl Strategy for CostOptimizedStrategy {
    fn name(&self) -> &str {
        COST_OPTIMIZED
    }

    fn select(
        &self,
        candidates: &[Model],
        metrics: &HashMap<String, ModelMetrics>,
        requirements: &SelectionRequirements,
    ) -> Result<Model, BalancerError> {
        highest_scoring(admissible(candidates, requirements)?, |m| {
            Self::score(metrics.get(&m.id))
        })
    }
}

// ============================================================================
// Random
// ============================================================================

/// Uniform random choice
#[derive(Debug, Default)]
pub struct RandomStrategy;

impl Strategy for RandomStrategy {
    fn name(&self) -> &str {
        RANDOM
    }

    fn select(
        &self,
        candidates: &[Model],
        _metrics: &HashMap<String, ModelMetrics>,
        requirements: &SelectionRequirements,
    ) -> Result<Model, BalancerError> {
        admissible(candidates, requirements)?
            .choose(&mut rand::thread_rng())
            .map(|m| (*m).clone())
            .ok_or(BalancerError::NoActiveModels)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::{Modality, ModelStatus};

    fn models(ids: &[&str]) -> Vec<Model> {
        ids.iter()
            .map(|id| Model::new(*id, "test", Modality::Text))
            .collect()
    }

    fn metrics_with(id: &str, f: impl FnOnce(&mut ModelMetrics)) -> (String, ModelMetrics) {
        let mut m = ModelMetrics::new(id.to_string(), Utc::now());
        f(&mut m);
        (id.to_string(), m)
    }

    fn pick_counts(
        strategy: &dyn Strategy,
        candidates: &[Model],
        metrics: &HashMap<String, ModelMetrics>,
        n: usize,
    ) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for _ in 0..n {
            let model = strategy
                .select(candidates, metrics, &SelectionRequirements::new())
                .unwrap();
            *counts.entry(model.id).or_insert(0) += 1;
        }
        counts
    }

    #[test]
    fn test_round_robin_fairness() {
        let candidates = models(&["a", "b", "c"]);
        let strategy = RoundRobinStrategy::new();
        let counts = pick_counts(&strategy, &candidates, &HashMap::new(), 3 * 7);
        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|&c| c == 7));
    }

    #[test]
    fn test_round_robin_order_and_wrap() {
        let candidates = models(&["a", "b"]);
        let strategy = RoundRobinStrategy::new();
        let reqs = SelectionRequirements::new();
        let picks: Vec<String> = (0..5)
            .map(|_| strategy.select(&candidates, &HashMap::new(), &reqs).unwrap().id)
            .collect();
        assert_eq!(picks, vec!["a", "b", "a", "b", "a"]);
    }

    #[test]
    fn test_round_robin_skips_inactive() {
        let mut candidates = models(&["a", "b", "c"]);
        candidates[1].status = ModelStatus::Inactive;
        let strategy = RoundRobinStrategy::new();
        let counts = pick_counts(&strategy, &candidates, &HashMap::new(), 10);
        assert_eq!(counts.get("b"), None);
        assert_eq!(counts.get("a"), Some(&5));
        assert_eq!(counts.get("c"), Some(&5));
    }

    #[test]
    fn test_weighted_round_robin_weights() {
        assert_eq!(WeightedRoundRobinStrategy::weight(0.0), 1);
        assert_eq!(WeightedRoundRobinStrategy::weight(0.55), 6);
        assert_eq!(WeightedRoundRobinStrategy::weight(1.0), 11);
    }

    #[test]
    fn test_weighted_round_robin_prefers_healthier() {
        let candidates = models(&["strong", "weak"]);
        let metrics: HashMap<_, _> = [
            metrics_with("strong", |m| m.health_score = 0.9),
            metrics_with("weak", |m| m.health_score = 0.1),
        ]
        .into_iter()
        .collect();

        // strong: 10 credits, weak: 2 credits
        let strategy = WeightedRoundRobinStrategy::new();
        let reqs = SelectionRequirements::new();
        let picks: Vec<String> = (0..10)
            .map(|_| strategy.select(&candidates, &metrics, &reqs).unwrap().id)
            .collect();

        assert!(picks[..8].iter().all(|id| id == "strong"));
        // Credits tie at 2, first candidate wins
        assert_eq!(picks[8], "strong");
        assert_eq!(picks[9], "weak");
    }

    #[test]
    fn test_weighted_round_robin_resets_on_exhaustion() {
        let candidates = models(&["a", "b"]);
        let metrics: HashMap<_, _> = [
            metrics_with("a", |m| m.health_score = 0.0),
            metrics_with("b", |m| m.health_score = 0.0),
        ]
        .into_iter()
        .collect();

        // One credit each: "a" exhausts immediately and resets the table, so
        // "b" is starved while the weights stay equal.
        let strategy = WeightedRoundRobinStrategy::new();
        let counts = pick_counts(&strategy, &candidates, &metrics, 6);
        assert_eq!(counts.get("a"), Some(&6));
        assert_eq!(counts.get("b"), None);
    }

    #[test]
    fn test_least_connections() {
        let candidates = models(&["busy", "idle", "also_idle"]);
        let metrics: HashMap<_, _> = [
            metrics_with("busy", |m| m.current_load = 5),
            metrics_with("idle", |m| m.current_load = 1),
            metrics_with("also_idle", |m| m.current_load = 1),
        ]
        .into_iter()
        .collect();

        let picked = LeastConnectionsStrategy
            .select(&candidates, &metrics, &SelectionRequirements::new())
            .unwrap();
        assert_eq!(picked.id, "idle");

        // No metrics counts as zero load
        let mut with_new = candidates.clone();
        with_new.push(Model::new("fresh", "test", Modality::Text));
        let picked = LeastConnectionsStrategy
            .select(&with_new, &metrics, &SelectionRequirements::new())
            .unwrap();
        assert_eq!(picked.id, "fresh");
    }

    #[test]
    fn test_least_connections_never_returns_inactive() {
        let mut candidates = models(&["m1", "m2"]);
        candidates[1].status = ModelStatus::Inactive;
        let metrics: HashMap<_, _> = [metrics_with("m1", |m| m.current_load = 50)]
            .into_iter()
            .collect();
        for _ in 0..10 {
            let picked = LeastConnectionsStrategy
                .select(&candidates, &metrics, &SelectionRequirements::new())
                .unwrap();
            assert_eq!(picked.id, "m1");
        }
    }

    #[test]
    fn test_performance_based() {
        let candidates = models(&["unknown", "good", "bad"]);
        let metrics: HashMap<_, _> = [
            metrics_with("good", |m| m.health_score = 0.8),
            metrics_with("bad", |m| m.health_score = 0.2),
        ]
        .into_iter()
        .collect();
        let picked = PerformanceBasedStrategy
            .select(&candidates, &metrics, &SelectionRequirements::new())
            .unwrap();
        assert_eq!(picked.id, "good");

        // Ties keep input order; no metrics scores 0.5
        let picked = PerformanceBasedStrategy
            .select(&models(&["x", "y"]), &HashMap::new(), &SelectionRequirements::new())
            .unwrap();
        assert_eq!(picked.id, "x");
    }

    #[test]
    fn test_cost_optimized() {
        let candidates = models(&["pricey", "cheap", "free"]);
        let metrics: HashMap<_, _> = [
            metrics_with("pricey", |m| {
                m.request_count = 10;
                m.success_count = 10;
                m.total_cost = 10.0;
                m.success_rate = 1.0;
            }),
            metrics_with("cheap", |m| {
                m.request_count = 10;
                m.success_count = 10;
                m.total_cost = 0.5;
                m.success_rate = 0.9;
            }),
        ]
        .into_iter()
        .collect();

        // pricey: 1.0, cheap: 18.0, free: 1.0 (no cost recorded)
        let picked = CostOptimizedStrategy
            .select(&candidates, &metrics, &SelectionRequirements::new())
            .unwrap();
        assert_eq!(picked.id, "cheap");
    }

    #[test]
    fn test_random_only_picks_admissible() {
        let mut candidates = models(&["a", "b", "c"]);
        candidates[0].status = ModelStatus::Deprecated;
        let reqs = SelectionRequirements::new().exclude("c");
        for _ in 0..20 {
            let picked = RandomStrategy
                .select(&candidates, &HashMap::new(), &reqs)
                .unwrap();
            assert_eq!(picked.id, "b");
        }
    }

    #[test]
    fn test_empty_candidates() {
        let strategies: Vec<Box<dyn Strategy>> = vec![
            Box::new(RoundRobinStrategy::new()),
            Box::new(WeightedRoundRobinStrategy::new()),
            Box::new(LeastConnectionsStrategy),
            Box::new(PerformanceBasedStrategy),
            Box::new(CostOptimizedStrategy),
            Box::new(RandomStrategy),
        ];
        let mut inactive = models(&["gone"]);
        inactive[0].status = ModelStatus::Inactive;

        for strategy in &strategies {
            for candidates in [&[][..], &inactive[..]] {
                assert_eq!(
                    strategy
                        .select(candidates, &HashMap::new(), &SelectionRequirements::new())
                        .unwrap_err(),
                    BalancerError::NoActiveModels,
                    "{}",
                    strategy.name()
                );
            }
        }
    }
}
