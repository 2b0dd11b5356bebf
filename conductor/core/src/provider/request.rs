//! Generation Request/Response Shapes
//!
//! One request and one response type per cached modality. Every response
//! carries a [`ResponseMeta`] block that the registry stamps after dispatch
//! (resolved model, provider, latency, cost).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{GenerationConfig, Modality, Model};
use crate::routing::SelectionRequirements;

// ============================================================================
// Shared pieces
// ============================================================================

/// One chat turn
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role ("user", "assistant", "system", "tool")
    pub role: String,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// Create a message
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Token accounting reported by a provider
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens
    pub input_tokens: u32,
    /// Generated tokens
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Total tokens
    #[must_use]
    pub fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Why generation stopped
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of output
    #[default]
    Stop,
    /// Hit the token limit
    Length,
    /// Blocked by a content filter
    ContentFilter,
    /// Stopped to call a tool
    ToolCalls,
}

/// Metadata common to every response
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    /// Model that served the request
    pub model_id: String,
    /// Provider binding that served the request
    pub provider: String,
    /// Token counts (zero for non-token modalities)
    pub usage: TokenUsage,
    /// Cost of the request
    pub cost: f64,
    /// Provider latency in milliseconds
    pub latency_ms: u64,
    /// Why generation stopped
    pub finish_reason: FinishReason,
    /// Flags raised by a safety collaborator, if one is present
    pub safety_flags: Vec<String>,
}

// ============================================================================
// Request contract
// ============================================================================

/// Behaviour the registry needs from every request type
pub trait GenerationRequest: Clone + Send + Sync {
    /// Response type produced for this request
    type Response: GenerationResponse;

    /// Modality of this request
    fn modality(&self) -> Modality;

    /// Requested model ID (empty = auto-select)
    fn model_id(&self) -> &str;

    /// Pin the request to a resolved model
    fn set_model_id(&mut self, model_id: String);

    /// Routing requirements used when no model is named
    fn requirements(&self) -> &SelectionRequirements;

    /// Fill unset output-affecting fields from the model's defaults
    fn apply_model_defaults(&mut self, _model: &Model) {}

    /// Prompt length in characters, if the request carries a prompt
    fn prompt_chars(&self) -> usize {
        0
    }

    /// Requested output tokens, if the request asks for a bound
    fn requested_max_tokens(&self) -> Option<u32> {
        None
    }
}

/// Behaviour the registry needs from every response type
pub trait GenerationResponse: Clone + Send + Sync {
    /// Shared metadata
    fn meta(&self) -> &ResponseMeta;

    /// Shared metadata (mutable)
    fn meta_mut(&mut self) -> &mut ResponseMeta;
}

macro_rules! impl_response_meta {
    ($($ty:ty),* $(,)?) => {
        $(
            impl GenerationResponse for $ty {
                fn meta(&self) -> &ResponseMeta {
                    &self.meta
                }

                fn meta_mut(&mut self) -> &mut ResponseMeta {
                    &mut self.meta
                }
            }
        )*
    };
}

// ============================================================================
// Text
// ============================================================================

/// Text generation request
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TextRequest {
    /// Model to use (empty = auto-select)
    pub model_id: String,
    /// Single-turn prompt
    pub prompt: String,
    /// Conversation messages
    pub messages: Vec<ChatMessage>,
    /// System prompt
    pub system_prompt: Option<String>,
    /// Generation parameters (None = model defaults)
    pub config: Option<GenerationConfig>,
    /// Routing requirements for auto-selection
    #[serde(default)]
    pub requirements: SelectionRequirements,
    /// Caller metadata (does not affect output)
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl TextRequest {
    /// Create a prompt request for a model
    pub fn new(model_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Set system prompt
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    /// Append a conversation message
    #[must_use]
    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    /// Set generation parameters
    #[must_use]
    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set routing requirements
    #[must_use]
    pub fn with_requirements(mut self, requirements: SelectionRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    /// Attach caller metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Text generation response
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TextResponse {
    /// Generated text
    pub content: String,
    /// Shared metadata
    pub meta: ResponseMeta,
}

impl TextResponse {
    /// Create a response with content and token usage
    pub fn new(content: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            content: content.into(),
            meta: ResponseMeta {
                usage,
                ..Default::default()
            },
        }
    }
}

impl GenerationRequest for TextRequest {
    type Response = TextResponse;

    fn modality(&self) -> Modality {
        Modality::Text
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn set_model_id(&mut self, model_id: String) {
        self.model_id = model_id;
    }

    fn requirements(&self) -> &SelectionRequirements {
        &self.requirements
    }

    fn apply_model_defaults(&mut self, model: &Model) {
        if self.config.is_none() {
            self.config = Some(model.config.clone());
        }
    }

    fn prompt_chars(&self) -> usize {
        let messages: usize = self.messages.iter().map(|m| m.content.chars().count()).sum();
        self.prompt.chars().count()
            + messages
            + self
                .system_prompt
                .as_ref()
                .map_or(0, |s| s.chars().count())
    }

    fn requested_max_tokens(&self) -> Option<u32> {
        self.config.as_ref().map(|c| c.max_tokens)
    }
}

// ============================================================================
// Image
// ============================================================================

/// Image generation request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageRequest {
    /// Model to use (empty = auto-select)
    pub model_id: String,
    /// What to draw
    pub prompt: String,
    /// What not to draw
    pub negative_prompt: Option<String>,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Number of images
    pub count: u32,
    /// Sampling seed
    pub seed: Option<u64>,
    /// Diffusion steps
    pub steps: Option<u32>,
    /// Classifier-free guidance scale
    pub guidance_scale: Option<f32>,
    /// Routing requirements for auto-selection
    #[serde(default)]
    pub requirements: SelectionRequirements,
    /// Caller metadata (does not affect output)
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Default for ImageRequest {
    fn default() -> Self {
        Self {
            model_id: String::new(),
            prompt: String::new(),
            negative_prompt: None,
            width: 1024,
            height: 1024,
            count: 1,
            seed: None,
            steps: None,
            guidance_scale: None,
            requirements: SelectionRequirements::default(),
            metadata: HashMap::new(),
        }
    }
}

impl ImageRequest {
    /// Create a prompt request for a model
    pub fn new(model_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Set output geometry
    #[must_use]
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set seed
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// One generated image
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    /// Encoded image bytes (if returned inline)
    pub data: Vec<u8>,
    /// Hosted URL (if returned by reference)
    pub url: Option<String>,
    /// Encoding ("png", "jpeg", ...)
    pub format: String,
}

/// Image generation response
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageResponse {
    /// Generated images
    pub images: Vec<GeneratedImage>,
    /// Prompt as rewritten by the provider, if any
    pub revised_prompt: Option<String>,
    /// Shared metadata
    pub meta: ResponseMeta,
}

impl GenerationRequest for ImageRequest {
    type Response = ImageResponse;

    fn modality(&self) -> Modality {
        Modality::Image
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn set_model_id(&mut self, model_id: String) {
        self.model_id = model_id;
    }

    fn requirements(&self) -> &SelectionRequirements {
        &self.requirements
    }

    fn apply_model_defaults(&mut self, model: &Model) {
        if self.seed.is_none() {
            self.seed = model.config.seed;
        }
    }

    fn prompt_chars(&self) -> usize {
        self.prompt.chars().count()
    }
}

// ============================================================================
// Audio
// ============================================================================

/// What to do with an audio payload
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioTask {
    /// Speech to text in the source language
    #[default]
    Transcribe,
    /// Speech to English text
    Translate,
    /// Text prompt to speech
    Synthesize,
}

/// Audio processing request
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AudioRequest {
    /// Model to use (empty = auto-select)
    pub model_id: String,
    /// Raw audio bytes
    pub audio: Vec<u8>,
    /// Container/codec ("wav", "mp3", ...)
    pub format: String,
    /// Operation
    pub task: AudioTask,
    /// Language hint
    pub language: Option<String>,
    /// Text prompt (context for transcription, input for synthesis)
    pub prompt: Option<String>,
    /// Routing requirements for auto-selection
    #[serde(default)]
    pub requirements: SelectionRequirements,
    /// Caller metadata (does not affect output)
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl AudioRequest {
    /// Create a request over a payload
    pub fn new(model_id: impl Into<String>, audio: Vec<u8>, format: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            audio,
            format: format.into(),
            ..Default::default()
        }
    }

    /// Set the task
    #[must_use]
    pub fn with_task(mut self, task: AudioTask) -> Self {
        self.task = task;
        self
    }

    /// Set the language hint
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// Audio processing response
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioResponse {
    /// Transcript/translation
    pub text: Option<String>,
    /// Synthesized audio
    pub audio: Option<Vec<u8>>,
    /// Detected language
    pub language: Option<String>,
    /// Duration of the processed audio in seconds
    pub duration_secs: f64,
    /// Shared metadata
    pub meta: ResponseMeta,
}

impl GenerationRequest for AudioRequest {
    type Response = AudioResponse;

    fn modality(&self) -> Modality {
        Modality::Audio
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn set_model_id(&mut self, model_id: String) {
        self.model_id = model_id;
    }

    fn requirements(&self) -> &SelectionRequirements {
        &self.requirements
    }

    fn prompt_chars(&self) -> usize {
        self.prompt.as_ref().map_or(0, |p| p.chars().count())
    }
}

// ============================================================================
// Video
// ============================================================================

/// What to do with a video payload
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoTask {
    /// Describe what happens
    #[default]
    Describe,
    /// Summarize the content
    Summarize,
    /// Transcribe the soundtrack
    Transcribe,
}

/// Video processing request
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VideoRequest {
    /// Model to use (empty = auto-select)
    pub model_id: String,
    /// Raw video bytes
    pub video: Vec<u8>,
    /// Container/codec ("mp4", "webm", ...)
    pub format: String,
    /// Operation
    pub task: VideoTask,
    /// Language hint
    pub language: Option<String>,
    /// Instruction prompt
    pub prompt: Option<String>,
    /// Routing requirements for auto-selection
    #[serde(default)]
    pub requirements: SelectionRequirements,
    /// Caller metadata (does not affect output)
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl VideoRequest {
    /// Create a request over a payload
    pub fn new(model_id: impl Into<String>, video: Vec<u8>, format: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            video,
            format: format.into(),
            ..Default::default()
        }
    }

    /// Set the task
    #[must_use]
    pub fn with_task(mut self, task: VideoTask) -> Self {
        self.task = task;
        self
    }

    /// Set the instruction prompt
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

/// Video processing response
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoResponse {
    /// Description/summary/transcript
    pub text: String,
    /// Frames the provider analyzed
    pub frames_analyzed: u32,
    /// Shared metadata
    pub meta: ResponseMeta,
}

impl GenerationRequest for VideoRequest {
    type Response = VideoResponse;

    fn modality(&self) -> Modality {
        Modality::Video
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn set_model_id(&mut self, model_id: String) {
        self.model_id = model_id;
    }

    fn requirements(&self) -> &SelectionRequirements {
        &self.requirements
    }

    fn prompt_chars(&self) -> usize {
        self.prompt.as_ref().map_or(0, |p| p.chars().count())
    }
}

impl_response_meta!(TextResponse, ImageResponse, AudioResponse, VideoResponse);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_request_builder() {
        let request = TextRequest::new("llama", "Hello")
            .with_system("Be brief")
            .with_message(ChatMessage::new("user", "Hi"))
            .with_metadata("trace", "abc");

        assert_eq!(request.model_id(), "llama");
        assert_eq!(request.modality(), Modality::Text);
        assert_eq!(request.prompt_chars(), "Hello".len() + "Hi".len() + "Be brief".len());
        assert_eq!(request.metadata.get("trace").map(String::as_str), Some("abc"));
        assert!(request.requested_max_tokens().is_none());
    }

    #[test]
    fn test_model_defaults_fill_config() {
        let model = Model::new("m", "p", Modality::Text)
            .with_config(GenerationConfig::default().with_max_tokens(64));
        let mut request = TextRequest::new("m", "x");
        request.apply_model_defaults(&model);
        assert_eq!(request.requested_max_tokens(), Some(64));

        // An explicit config is left alone
        let mut explicit = TextRequest::new("m", "x")
            .with_config(GenerationConfig::default().with_max_tokens(8));
        explicit.apply_model_defaults(&model);
        assert_eq!(explicit.requested_max_tokens(), Some(8));
    }

    #[test]
    fn test_response_meta_access() {
        let mut response = TextResponse::new(
            "out",
            TokenUsage {
                input_tokens: 3,
                output_tokens: 4,
            },
        );
        response.meta_mut().provider = "mock".to_string();
        assert_eq!(response.meta().usage.total(), 7);
        assert_eq!(response.meta().provider, "mock");
    }
}
