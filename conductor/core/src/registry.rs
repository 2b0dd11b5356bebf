//! Model Registry
//!
//! The entry point for generation. Owns the model table and provider
//! bindings, and wires the response cache, monitor and load balancer into one
//! request path:
//!
//! ```text
//! request --> resolve model --> resolve provider --> limits --> cache lookup
//!   (empty id: select_best)      (ProviderNotFound)               |     |
//!                                                               hit   miss
//!                                                                |     v
//!                                                                |  provider call (no locks held)
//!                                                                |     |
//!                                                                |  ok: record_request + cache set
//!                                                                |  err: record_failure, propagate
//!                                                                v     v
//!                                                                 response
//! ```
//!
//! Provider failures are never retried here.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::{CacheableRequest, ResponseCache};
use crate::config::ServingConfig;
use crate::models::{GenerationConfig, Modality, Model, ModelStatus};
use crate::monitor::{Alert, ModelMonitor};
use crate::provider::{
    AudioRequest, AudioResponse, GenerationRequest, GenerationResponse, ImageRequest,
    ImageResponse, ModelProvider, ProviderError, ProviderHealth, ProviderUsage, TextRequest,
    TextResponse, VideoRequest, VideoResponse,
};
use crate::routing::{BalancerError, LoadBalancer, SelectionRequirements};
use crate::template::{PromptRenderer, TemplateError};

// ============================================================================
// Errors
// ============================================================================

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No model registered under this ID
    #[error("Model not found: {0}")]
    NotFound(String),

    /// Nothing registered for this modality
    #[error("No models available for {0}")]
    NoModelsAvailable(Modality),

    /// Models exist but none is selectable
    #[error("No active models available")]
    NoActiveModels,

    /// Requirements named an unknown strategy
    #[error("Strategy not found: {0}")]
    StrategyNotFound(String),

    /// The model's provider is not bound
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    /// Request exceeds the model's usage limits
    #[error("Limit exceeded for {model}: {detail}")]
    LimitExceeded {
        /// Model ID
        model: String,
        /// Which limit and by how much
        detail: String,
    },

    /// Prompt template failed to render
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The provider call failed
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl From<BalancerError> for RegistryError {
    fn from(err: BalancerError) -> Self {
        match err {
            BalancerError::NoActiveModels => Self::NoActiveModels,
            BalancerError::StrategyNotFound(name) => Self::StrategyNotFound(name),
        }
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// A request the registry can route to a provider capability
pub trait Dispatch: GenerationRequest {
    /// Call the provider capability for this request type
    ///
    /// # Errors
    ///
    /// Returns whatever the provider returned.
    fn dispatch(&self, provider: &dyn ModelProvider) -> Result<Self::Response, ProviderError>;
}

impl Dispatch for TextRequest {
    fn dispatch(&self, provider: &dyn ModelProvider) -> Result<TextResponse, ProviderError> {
        provider.generate_text(self)
    }
}

impl Dispatch for ImageRequest {
    fn dispatch(&self, provider: &dyn ModelProvider) -> Result<ImageResponse, ProviderError> {
        provider.generate_image(self)
    }
}

impl Dispatch for AudioRequest {
    fn dispatch(&self, provider: &dyn ModelProvider) -> Result<AudioResponse, ProviderError> {
        provider.process_audio(self)
    }
}

impl Dispatch for VideoRequest {
    fn dispatch(&self, provider: &dyn ModelProvider) -> Result<VideoResponse, ProviderError> {
        provider.process_video(self)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Model table, provider bindings and the generation request path
pub struct ModelRegistry {
    models: RwLock<HashMap<String, Model>>,
    providers: DashMap<String, Arc<dyn ModelProvider>>,
    cache: Arc<ResponseCache>,
    monitor: Arc<ModelMonitor>,
    balancer: LoadBalancer,
}

impl ModelRegistry {
    /// Create an empty registry over a shared cache and monitor
    #[must_use]
    pub fn new(cache: Arc<ResponseCache>, monitor: Arc<ModelMonitor>) -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
            providers: DashMap::new(),
            cache,
            monitor,
            balancer: LoadBalancer::new(),
        }
    }

    /// Build cache, monitor and registry from configuration, then install the
    /// configured models and alert rules
    ///
    /// Returns the registry and the alert receiver.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::StrategyNotFound` if the configured default
    /// strategy is not a known strategy.
    pub fn from_config(
        config: &ServingConfig,
    ) -> Result<(Self, mpsc::Receiver<Alert>), RegistryError> {
        let cache = Arc::new(ResponseCache::new(&config.cache));
        let (monitor, alerts) = ModelMonitor::new(config.monitor.clone());
        let registry = Self::new(cache, Arc::new(monitor));

        registry
            .balancer
            .set_default_strategy(&config.balancer.default_strategy)?;
        for model in &config.models {
            registry.register(model.clone());
        }
        for rule in &config.alert_rules {
            registry.monitor.add_rule(rule.clone());
        }
        Ok((registry, alerts))
    }

    /// Shared response cache
    #[must_use]
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Shared monitor
    #[must_use]
    pub fn monitor(&self) -> &Arc<ModelMonitor> {
        &self.monitor
    }

    /// Strategy registry used by [`Self::select_best`]
    #[must_use]
    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    // ------------------------------------------------------------------------
    // Model table
    // ------------------------------------------------------------------------

    /// Insert or replace a model, stamping both timestamps
    pub fn register(&self, mut model: Model) {
        let now = Utc::now();
        model.created_at = now;
        model.updated_at = now;
        info!(
            model = %model.id,
            provider = %model.provider,
            modality = %model.modality,
            "Registered model"
        );
        self.models.write().insert(model.id.clone(), model);
    }

    /// Look up a model
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` for an unknown ID.
    pub fn get(&self, model_id: &str) -> Result<Model, RegistryError> {
        self.models
            .read()
            .get(model_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(model_id.to_string()))
    }

    /// Every registered model
    #[must_use]
    pub fn list(&self) -> Vec<Model> {
        self.models.read().values().cloned().collect()
    }

    /// Models of one modality
    #[must_use]
    pub fn list_by_type(&self, modality: Modality) -> Vec<Model> {
        self.models
            .read()
            .values()
            .filter(|m| m.modality == modality)
            .cloned()
            .collect()
    }

    /// Models served by one provider
    #[must_use]
    pub fn list_by_provider(&self, provider: &str) -> Vec<Model> {
        self.models
            .read()
            .values()
            .filter(|m| m.provider == provider)
            .cloned()
            .collect()
    }

    /// Replace a model's default generation config
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` for an unknown ID.
    pub fn update_config(
        &self,
        model_id: &str,
        config: GenerationConfig,
    ) -> Result<(), RegistryError> {
        self.mutate(model_id, |model| model.config = config)?;
        info!(model = model_id, "Updated model config");
        Ok(())
    }

    /// Exclude a model from selection; it stays retrievable
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` for an unknown ID.
    pub fn deactivate(&self, model_id: &str) -> Result<(), RegistryError> {
        self.set_status(model_id, ModelStatus::Inactive)
    }

    /// Change a model's lifecycle status
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` for an unknown ID.
    pub fn set_status(&self, model_id: &str, status: ModelStatus) -> Result<(), RegistryError> {
        self.mutate(model_id, |model| model.status = status)?;
        info!(model = model_id, status = ?status, "Model status changed");
        Ok(())
    }

    fn mutate<F>(&self, model_id: &str, f: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut Model),
    {
        let mut models = self.models.write();
        let model = models
            .get_mut(model_id)
            .ok_or_else(|| RegistryError::NotFound(model_id.to_string()))?;
        f(model);
        model.updated_at = Utc::now();
        Ok(())
    }

    /// Pick a model of `modality` via the load balancer
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NoModelsAvailable` if nothing of that modality
    /// is registered, `RegistryError::NoActiveModels` if nothing registered is
    /// selectable and `RegistryError::StrategyNotFound` for an unknown
    /// strategy name.
    pub fn select_best(
        &self,
        modality: Modality,
        requirements: &SelectionRequirements,
    ) -> Result<Model, RegistryError> {
        let candidates = self.list_by_type(modality);
        if candidates.is_empty() {
            return Err(RegistryError::NoModelsAvailable(modality));
        }
        let metrics = self.monitor.snapshot_all();
        Ok(self.balancer.select(&candidates, &metrics, requirements)?)
    }

    // ------------------------------------------------------------------------
    // Providers
    // ------------------------------------------------------------------------

    /// Bind a provider under its own name, replacing any previous binding
    pub fn bind_provider(&self, provider: Arc<dyn ModelProvider>) {
        let name = provider.name().to_string();
        info!(provider = %name, models = provider.supported_models().len(), "Bound provider");
        self.providers.insert(name, provider);
    }

    /// Remove a provider binding
    pub fn unbind_provider(&self, name: &str) -> bool {
        self.providers.remove(name).is_some()
    }

    fn provider(&self, name: &str) -> Option<Arc<dyn ModelProvider>> {
        self.providers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Health report of every bound provider, by name
    #[must_use]
    pub fn provider_health(&self) -> HashMap<String, ProviderHealth> {
        self.bound_providers()
            .into_iter()
            .map(|(name, provider)| (name, provider.health()))
            .collect()
    }

    /// Usage counters of every bound provider, by name
    #[must_use]
    pub fn provider_usage(&self) -> HashMap<String, ProviderUsage> {
        self.bound_providers()
            .into_iter()
            .map(|(name, provider)| (name, provider.usage()))
            .collect()
    }

    // Providers are queried after the map guards are released
    fn bound_providers(&self) -> Vec<(String, Arc<dyn ModelProvider>)> {
        self.providers
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    // ------------------------------------------------------------------------
    // Generation
    // ------------------------------------------------------------------------

    /// Generate text
    ///
    /// # Errors
    ///
    /// See [`Self::generate`].
    pub fn generate_text(&self, request: TextRequest) -> Result<TextResponse, RegistryError> {
        self.generate(request)
    }

    /// Generate images
    ///
    /// # Errors
    ///
    /// See [`Self::generate`].
    pub fn generate_image(&self, request: ImageRequest) -> Result<ImageResponse, RegistryError> {
        self.generate(request)
    }

    /// Transcribe, translate or synthesize audio
    ///
    /// # Errors
    ///
    /// See [`Self::generate`].
    pub fn process_audio(&self, request: AudioRequest) -> Result<AudioResponse, RegistryError> {
        self.generate(request)
    }

    /// Describe, summarize or transcribe video
    ///
    /// # Errors
    ///
    /// See [`Self::generate`].
    pub fn process_video(&self, request: VideoRequest) -> Result<VideoResponse, RegistryError> {
        self.generate(request)
    }

    /// Render a prompt template, then generate text from it
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Template` if rendering fails, otherwise as
    /// [`Self::generate`].
    pub fn generate_from_template(
        &self,
        renderer: &dyn PromptRenderer,
        template_id: &str,
        variables: &HashMap<String, Value>,
        mut request: TextRequest,
    ) -> Result<TextResponse, RegistryError> {
        request.prompt = renderer.render(template_id, variables)?;
        debug!(template = template_id, chars = request.prompt.len(), "Rendered prompt template");
        self.generate_text(request)
    }

    /// Shared request path for every modality
    ///
    /// # Errors
    ///
    /// - `NotFound`: explicit model ID is unknown
    /// - `NoModelsAvailable` / `NoActiveModels` / `StrategyNotFound`: empty
    ///   model ID and selection failed
    /// - `ProviderNotFound`: the model's provider is not bound
    /// - `LimitExceeded`: the request breaks the model's usage limits
    /// - `Provider`: the provider call failed
    pub fn generate<R>(&self, mut request: R) -> Result<R::Response, RegistryError>
    where
        R: Dispatch + CacheableRequest<Cached = <R as GenerationRequest>::Response>,
    {
        let model = if request.model_id().is_empty() {
            let model = self.select_best(request.modality(), request.requirements())?;
            request.set_model_id(model.id.clone());
            model
        } else {
            self.get(request.model_id())?
        };

        let Some(provider) = self.provider(&model.provider) else {
            let err = RegistryError::ProviderNotFound(model.provider.clone());
            self.monitor.record_error(&model.id, &err);
            return Err(err);
        };

        request.apply_model_defaults(&model);
        Self::check_limits(&model, &request)?;

        if let Some(cached) = self.cache.get(&request) {
            return Ok(cached);
        }

        let in_flight = self.monitor.in_flight(&model.id);
        let started = Instant::now();
        let result = request.dispatch(provider.as_ref());
        let latency = started.elapsed();
        drop(in_flight);

        match result {
            Ok(mut response) => {
                let usage = response.meta().usage;
                let meta = response.meta_mut();
                meta.model_id = model.id.clone();
                meta.provider = provider.name().to_string();
                meta.latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                if meta.cost <= 0.0 {
                    meta.cost = model.pricing.cost_for(usage.input_tokens, usage.output_tokens);
                }
                let cost = meta.cost;

                self.monitor.record_request(&model.id, latency, cost);
                self.cache.set(&request, response.clone());
                Ok(response)
            }
            Err(err) => {
                warn!(model = %model.id, provider = %model.provider, error = %err, "Provider call failed");
                self.monitor.record_failure(&model.id, latency, &err);
                Err(RegistryError::Provider(err))
            }
        }
    }

    fn check_limits<R: GenerationRequest>(model: &Model, request: &R) -> Result<(), RegistryError> {
        if let (Some(limit), Some(requested)) = (
            model.limits.max_tokens_per_request,
            request.requested_max_tokens(),
        ) {
            if requested > limit {
                return Err(RegistryError::LimitExceeded {
                    model: model.id.clone(),
                    detail: format!("max_tokens {requested} exceeds {limit}"),
                });
            }
        }
        if let Some(limit) = model.limits.max_prompt_chars {
            let chars = request.prompt_chars();
            if chars > limit {
                return Err(RegistryError::LimitExceeded {
                    model: model.id.clone(),
                    detail: format!("prompt length {chars} exceeds {limit}"),
                });
            }
        }
        Ok(())
    }

    /// Export monitor and cache statistics as Prometheus text format
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let mut output = self.monitor.to_prometheus();
        output.push_str(&self.cache.stats().to_prometheus());
        let _ = writeln!(
            output,
            "# TYPE registered_models gauge\nregistered_models {}",
            self.models.read().len()
        );
        output
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.models.read().len())
            .field("providers", &self.providers.len())
            .field("cache", &self.cache)
            .field("balancer", &self.balancer)
            .finish_non_exhaustive()
    }
}
