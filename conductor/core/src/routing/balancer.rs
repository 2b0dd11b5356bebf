//! Load Balancer
//!
//! Named, open set of strategies. Built-ins are registered at construction and
//! callers may add or replace strategies at runtime.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::strategies::{
    CostOptimizedStrategy, LeastConnectionsStrategy, PerformanceBasedStrategy, RandomStrategy,
    RoundRobinStrategy, WeightedRoundRobinStrategy, PERFORMANCE_BASED,
};
use super::{BalancerError, SelectionRequirements, Strategy};
use crate::models::Model;
use crate::monitor::ModelMetrics;

/// Dispatches selection to a named strategy
pub struct LoadBalancer {
    strategies: RwLock<HashMap<String, Arc<dyn Strategy>>>,
    default_strategy: RwLock<String>,
}

impl LoadBalancer {
    /// Create a balancer with every built-in strategy registered and
    /// `performance_based` as the default
    #[must_use]
    pub fn new() -> Self {
        let balancer = Self {
            strategies: RwLock::new(HashMap::new()),
            default_strategy: RwLock::new(PERFORMANCE_BASED.to_string()),
        };
        balancer.register(Arc::new(RoundRobinStrategy::new()));
        balancer.register(Arc::new(WeightedRoundRobinStrategy::new()));
        balancer.register(Arc::new(LeastConnectionsStrategy));
        balancer.register(Arc::new(PerformanceBasedStrategy));
        balancer.register(Arc::new(CostOptimizedStrategy));
        balancer.register(Arc::new(RandomStrategy));
        balancer
    }

    /// Register a strategy under its own name
    pub fn register(&self, strategy: Arc<dyn Strategy>) {
        let name = strategy.name().to_string();
        self.register_strategy(name, strategy);
    }

    /// Register (or replace) a strategy under an explicit name
    pub fn register_strategy(&self, name: impl Into<String>, strategy: Arc<dyn Strategy>) {
        let name = name.into();
        info!(strategy = %name, "Registered selection strategy");
        self.strategies.write().insert(name, strategy);
    }

    /// Look up a strategy by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies.read().get(name).cloned()
    }

    /// Names of all registered strategies, sorted
    #[must_use]
    pub fn list_strategies(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.read().keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn default_strategy(&self) -> String {
        self.default_strategy.read().clone()
    }

    /// Change the strategy used when a request names none
    ///
    /// # Errors
    ///
    /// Returns `BalancerError::StrategyNotFound` if nothing is registered
    /// under `name`.
    pub fn set_default_strategy(&self, name: &str) -> Result<(), BalancerError> {
        if !self.strategies.read().contains_key(name) {
            return Err(BalancerError::StrategyNotFound(name.to_string()));
        }
        *self.default_strategy.write() = name.to_string();
        info!(strategy = name, "Default selection strategy changed");
        Ok(())
    }

    /// Pick a model with the strategy the requirements name, or the default
    ///
    /// `metrics` must be a copy; no lock is held while the strategy runs.
    ///
    /// # Errors
    ///
    /// Returns `BalancerError::StrategyNotFound` for an unknown strategy name
    /// and `BalancerError::NoActiveModels` when no candidate is admissible.
    pub fn select(
        &self,
        candidates: &[Model],
        metrics: &HashMap<String, ModelMetrics>,
        requirements: &SelectionRequirements,
    ) -> Result<Model, BalancerError> {
        let name = requirements
            .strategy
            .clone()
            .unwrap_or_else(|| self.default_strategy());
        let strategy = self
            .get(&name)
            .ok_or_else(|| BalancerError::StrategyNotFound(name.clone()))?;

        let model = strategy.select(candidates, metrics, requirements)?;
        debug!(strategy = %name, model = %model.id, candidates = candidates.len(), "Selected model");
        Ok(model)
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("strategies", &self.list_strategies())
            .field("default_strategy", &self.default_strategy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Modality;
    use crate::routing::strategies::{LEAST_CONNECTIONS, ROUND_ROBIN};

    /// Always picks the last admissible candidate
    struct LastStrategy;

    impl Strategy for LastStrategy {
        fn name(&self) -> &str {
            "last"
        }

        fn select(
            &self,
            candidates: &[Model],
            _metrics: &HashMap<String, ModelMetrics>,
            requirements: &SelectionRequirements,
        ) -> Result<Model, BalancerError> {
            crate::routing::admissible(candidates, requirements)?
                .last()
                .map(|m| (*m).clone())
                .ok_or(BalancerError::NoActiveModels)
        }
    }

    fn candidates() -> Vec<Model> {
        vec![
            Model::new("a", "p", Modality::Text),
            Model::new("b", "p", Modality::Text),
            Model::new("c", "p", Modality::Text),
        ]
    }

    #[test]
    fn test_builtins_registered() {
        let balancer = LoadBalancer::new();
        assert_eq!(
            balancer.list_strategies(),
            vec![
                "cost_optimized",
                "least_connections",
                "performance_based",
                "random",
                "round_robin",
                "weighted_round_robin",
            ]
        );
        assert_eq!(balancer.default_strategy(), PERFORMANCE_BASED);
    }

    #[test]
    fn test_runtime_registration() {
        let balancer = LoadBalancer::new();
        balancer.register(Arc::new(LastStrategy));

        let reqs = SelectionRequirements::new().with_strategy("last");
        let picked = balancer.select(&candidates(), &HashMap::new(), &reqs).unwrap();
        assert_eq!(picked.id, "c");

        balancer.set_default_strategy("last").unwrap();
        let picked = balancer
            .select(&candidates(), &HashMap::new(), &SelectionRequirements::new())
            .unwrap();
        assert_eq!(picked.id, "c");
    }

    #[test]
    fn test_unknown_strategy() {
        let balancer = LoadBalancer::new();
        let reqs = SelectionRequirements::new().with_strategy("nope");
        assert_eq!(
            balancer.select(&candidates(), &HashMap::new(), &reqs).unwrap_err(),
            BalancerError::StrategyNotFound("nope".into())
        );
        assert!(balancer.set_default_strategy("nope").is_err());
        assert_eq!(balancer.default_strategy(), PERFORMANCE_BASED);
    }

    #[test]
    fn test_per_call_strategy_choice() {
        let balancer = LoadBalancer::new();
        let rr = SelectionRequirements::new().with_strategy(ROUND_ROBIN);
        let first = balancer.select(&candidates(), &HashMap::new(), &rr).unwrap();
        let second = balancer.select(&candidates(), &HashMap::new(), &rr).unwrap();
        assert_ne!(first.id, second.id);

        let lc = SelectionRequirements::new().with_strategy(LEAST_CONNECTIONS);
        assert!(balancer.select(&[], &HashMap::new(), &lc).is_err());
    }
}
