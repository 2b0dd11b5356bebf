//! Generation Providers
//!
//! The narrow contract through which the registry reaches text, image, audio
//! and video backends, plus the request/response shapes exposed to callers.
//!
//! # Usage
//!
//! ```ignore
//! use model_conductor::provider::{ModelProvider, TextRequest};
//!
//! let response = provider.generate_text(&TextRequest::new("llama3", "Hello!"))?;
//! ```

mod request;
mod traits;

pub use request::{
    AudioRequest, AudioResponse, AudioTask, ChatMessage, FinishReason, GeneratedImage,
    GenerationRequest, GenerationResponse, ImageRequest, ImageResponse, ResponseMeta, TextRequest,
    TextResponse, TokenUsage, VideoRequest, VideoResponse, VideoTask,
};
pub use traits::{ModelProvider, ProviderError, ProviderHealth, ProviderUsage};
