#![allow(missing_docs)]
//! Model Selection
//!
//! Pluggable strategies that pick one model out of a candidate set, and the
//! load balancer that dispatches to them by name.
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |  ModelRegistry   |  <-- select_best(modality, requirements)
//! +--------+---------+
//!          |  candidates + metrics copy
//!          v
//! +------------------+
//! |   LoadBalancer   |  <-- resolves strategy name, no monitor lock held
//! +--------+---------+
//!          |
//!    +-----+------+------+------+------+
//!    |     |      |      |      |      |
//!    v     v      v      v      v      v
//!   rr   wrr   least   perf   cost  random   (+ runtime-registered)
//! ```
//!
//! Every built-in strategy first narrows the candidates to active models that
//! satisfy the [`SelectionRequirements`], and fails with
//! [`BalancerError::NoActiveModels`] when nothing survives.

pub mod balancer;
pub mod strategies;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Model;
use crate::monitor::ModelMetrics;

pub use balancer::LoadBalancer;
pub use strategies::{
    CostOptimizedStrategy, LeastConnectionsStrategy, PerformanceBasedStrategy, RandomStrategy,
    RoundRobinStrategy, WeightedRoundRobinStrategy,
};

// ============================================================================
// Requirements
// ============================================================================

/// Per-request constraints on model selection
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionRequirements {
    /// Strategy to use (the balancer default when `None`)
    pub strategy: Option<String>,
    /// Capability tags the chosen model must carry
    pub required_capabilities: Vec<String>,
    /// Model IDs that must not be chosen
    pub excluded_models: Vec<String>,
}

impl SelectionRequirements {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Select with a named strategy
    #[must_use]
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    /// Require a capability tag
    #[must_use]
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.required_capabilities.push(capability.into());
        self
    }

    /// Never pick this model
    #[must_use]
    pub fn exclude(mut self, model_id: impl Into<String>) -> Self {
        self.excluded_models.push(model_id.into());
        self
    }

    /// Whether a model may be chosen under these requirements
    #[must_use]
    pub fn admits(&self, model: &Model) -> bool {
        model.is_active()
            && !self.excluded_models.iter().any(|id| *id == model.id)
            && model.has_capabilities(&self.required_capabilities)
    }
}

// ============================================================================
// Strategy contract
// ============================================================================

/// Selection errors
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BalancerError {
    /// Candidate set empty after filtering
    #[error("No active models available")]
    NoActiveModels,

    /// No strategy registered under this name
    #[error("Strategy not found: {0}")]
    StrategyNotFound(String),
}

/// A model-selection algorithm
///
/// Implementations may keep state across calls (cursors, credit tables) and
/// must guard it themselves; the balancer calls them concurrently.
pub trait Strategy: Send + Sync {
    /// Name the strategy is registered under
    fn name(&self) -> &str;

    /// Pick one model from `candidates`
    ///
    /// `metrics` is a private copy; strategies never see the live store.
    ///
    /// # Errors
    ///
    /// Returns `BalancerError::NoActiveModels` if no candidate is admissible.
    fn select(
        &self,
        candidates: &[Model],
        metrics: &HashMap<String, ModelMetrics>,
        requirements: &SelectionRequirements,
    ) -> Result<Model, BalancerError>;
}

/// Active candidates satisfying the requirements, in input order
///
/// # Errors
///
/// Returns `BalancerError::NoActiveModels` if the result would be empty.
pub fn admissible<'a>(
    candidates: &'a [Model],
    requirements: &SelectionRequirements,
) -> Result<Vec<&'a Model>, BalancerError> {
    let admitted: Vec<&Model> = candidates
        .iter()
        .filter(|m| requirements.admits(m))
        .collect();
    if admitted.is_empty() {
        return Err(BalancerError::NoActiveModels);
    }
    Ok(admitted)
}
