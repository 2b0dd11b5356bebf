//! Model Definitions
//!
//! Types describing a registered model: what it generates, which provider
//! serves it, how it is configured and what it costs.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Modality
// ============================================================================

/// Content type a model consumes/produces
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Text generation (chat, completion)
    Text,
    /// Image generation
    Image,
    /// Audio processing (transcription, translation, speech)
    Audio,
    /// Video processing
    Video,
    /// Mixed inputs/outputs
    Multimodal,
}

impl Modality {
    /// Modalities that own a response cache keyspace
    pub const CACHED: [Modality; 4] = [Self::Text, Self::Image, Self::Audio, Self::Video];

    /// Stable lowercase name (used in logs and metric labels)
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Multimodal => "multimodal",
        }
    }
}

impl Default for Modality {
    fn default() -> Self {
        Self::Text
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Lifecycle status of a registered model
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    /// Eligible for selection
    Active,
    /// Soft-deleted: still retrievable, never selected
    Inactive,
    /// Kept for history, never selected
    Deprecated,
}

impl Default for ModelStatus {
    fn default() -> Self {
        Self::Active
    }
}

// ============================================================================
// Generation configuration
// ============================================================================

/// Default sampling parameters for a model
///
/// Every field here affects the generated output and therefore takes part in
/// the response cache key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Maximum tokens in the response (0 = provider default)
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Nucleus sampling mass
    pub top_p: f32,
    /// Top-k sampling cutoff
    pub top_k: Option<u32>,
    /// Frequency penalty
    pub frequency_penalty: f32,
    /// Presence penalty
    pub presence_penalty: f32,
    /// Stop sequences
    pub stop: Vec<String>,
    /// Deterministic sampling seed
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.7,
            top_p: 1.0,
            top_k: None,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop: Vec::new(),
            seed: None,
        }
    }
}

impl GenerationConfig {
    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set seed
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Whether every sampling parameter is a finite number
    #[must_use]
    pub fn is_finite(&self) -> bool {
        [
            self.temperature,
            self.top_p,
            self.frequency_penalty,
            self.presence_penalty,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// Per-model request limits checked before dispatch
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageLimits {
    /// Largest `max_tokens` a single request may ask for
    pub max_tokens_per_request: Option<u32>,
    /// Largest prompt (in characters) a single request may carry
    pub max_prompt_chars: Option<usize>,
}

/// Model pricing, in currency units
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pricing {
    /// Cost per 1000 input tokens
    pub input_per_1k: f64,
    /// Cost per 1000 output tokens
    pub output_per_1k: f64,
    /// Flat cost per request (image/audio/video)
    pub per_request: f64,
}

impl Pricing {
    /// Cost of one request with the given token counts
    #[must_use]
    pub fn cost_for(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        self.per_request
            + f64::from(input_tokens) / 1000.0 * self.input_per_1k
            + f64::from(output_tokens) / 1000.0 * self.output_per_1k
    }
}

// ============================================================================
// Model
// ============================================================================

/// A registered model and its provider binding
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Unique model identifier
    pub id: String,

    /// Human-readable name
    #[serde(default)]
    pub display_name: String,

    /// Name of the provider binding that serves this model
    pub provider: String,

    /// Content type
    #[serde(default)]
    pub modality: Modality,

    /// Capability tags (e.g. "chat", "vision", "tools")
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Default generation parameters
    #[serde(default)]
    pub config: GenerationConfig,

    /// Request limits
    #[serde(default)]
    pub limits: UsageLimits,

    /// Pricing
    #[serde(default)]
    pub pricing: Pricing,

    /// Lifecycle status
    #[serde(default)]
    pub status: ModelStatus,

    /// When the model was first registered
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// When the model was last registered or mutated
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Create an active model with default configuration
    pub fn new(id: impl Into<String>, provider: impl Into<String>, modality: Modality) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            display_name: String::new(),
            provider: provider.into(),
            modality,
            capabilities: Vec::new(),
            config: GenerationConfig::default(),
            limits: UsageLimits::default(),
            pricing: Pricing::default(),
            status: ModelStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set display name
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Add a capability tag
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    /// Set pricing
    #[must_use]
    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = pricing;
        self
    }

    /// Set limits
    #[must_use]
    pub fn with_limits(mut self, limits: UsageLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set generation config
    #[must_use]
    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }

    /// Set lifecycle status
    #[must_use]
    pub fn with_status(mut self, status: ModelStatus) -> Self {
        self.status = status;
        self
    }

    /// Whether the model may be selected for routing
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == ModelStatus::Active
    }

    /// Whether the model carries every given capability tag
    #[must_use]
    pub fn has_capabilities(&self, required: &[String]) -> bool {
        required.iter().all(|c| self.capabilities.contains(c))
    }
}
