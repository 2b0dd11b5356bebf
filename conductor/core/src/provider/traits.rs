//! Provider Capability Contract
//!
//! The registry talks to generation backends only through [`ModelProvider`].
//! Implementations handle transport, auth and API formats; none of that is
//! visible here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::request::{
    AudioRequest, AudioResponse, ImageRequest, ImageResponse, TextRequest, TextResponse,
    VideoRequest, VideoResponse,
};

/// Errors returned by a provider
///
/// The registry records these in the monitor and propagates them verbatim.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ProviderError {
    /// Could not reach the backend
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Backend rejected or failed the request
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// Backend does not know the model
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Backend is rate limiting
    #[error("Rate limited{}", .retry_after_ms.map(|ms| format!(", retry after {ms}ms")).unwrap_or_default())]
    RateLimited {
        /// Suggested wait before retrying
        retry_after_ms: Option<u64>,
    },

    /// Backend timed out
    #[error("Request timed out")]
    Timeout,

    /// Credentials rejected
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Provider reports itself unavailable
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// Provider does not implement the capability
    #[error("Provider {provider} does not support {capability}")]
    Unsupported {
        /// Provider name
        provider: String,
        /// Capability name
        capability: &'static str,
    },

    /// Output blocked by the provider's content filter
    #[error("Content filtered: {0}")]
    ContentFiltered(String),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Usage counters reported by a provider
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderUsage {
    /// Requests served
    pub requests: u64,
    /// Tokens consumed
    pub tokens: u64,
    /// Accumulated cost
    pub cost: f64,
    /// Failed requests
    pub errors: u64,
}

/// Health report from a provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    /// Whether the backend answered its health probe
    pub healthy: bool,
    /// Probe latency, if measured
    pub latency_ms: Option<u64>,
    /// Free-form detail
    pub message: Option<String>,
    /// When the report was produced
    pub checked_at: DateTime<Utc>,
}

impl ProviderHealth {
    /// A healthy report stamped now
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            latency_ms: None,
            message: None,
            checked_at: Utc::now(),
        }
    }

    /// An unhealthy report stamped now
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            latency_ms: None,
            message: Some(message.into()),
            checked_at: Utc::now(),
        }
    }
}

/// A named generation backend
///
/// Every generation capability defaults to [`ProviderError::Unsupported`], so a
/// text-only provider implements just [`ModelProvider::generate_text`].
/// Calls are synchronous; the registry never holds a lock while one runs.
pub trait ModelProvider: Send + Sync {
    /// Binding name models refer to
    fn name(&self) -> &str;

    /// Model IDs this provider can serve
    fn supported_models(&self) -> Vec<String>;

    /// Whether the provider is currently accepting requests
    fn is_available(&self) -> bool {
        true
    }

    /// Generate text
    fn generate_text(&self, request: &TextRequest) -> Result<TextResponse, ProviderError> {
        let _ = request;
        Err(self.unsupported("generate_text"))
    }

    /// Generate images
    fn generate_image(&self, request: &ImageRequest) -> Result<ImageResponse, ProviderError> {
        let _ = request;
        Err(self.unsupported("generate_image"))
    }

    /// Process audio
    fn process_audio(&self, request: &AudioRequest) -> Result<AudioResponse, ProviderError> {
        let _ = request;
        Err(self.unsupported("process_audio"))
    }

    /// Process video
    fn process_video(&self, request: &VideoRequest) -> Result<VideoResponse, ProviderError> {
        let _ = request;
        Err(self.unsupported("process_video"))
    }

    /// Usage counters
    fn usage(&self) -> ProviderUsage {
        ProviderUsage::default()
    }

    /// Health report
    fn health(&self) -> ProviderHealth {
        if self.is_available() {
            ProviderHealth::healthy()
        } else {
            ProviderHealth::unhealthy("provider unavailable")
        }
    }

    #[doc(hidden)]
    fn unsupported(&self, capability: &'static str) -> ProviderError {
        ProviderError::Unsupported {
            provider: self.name().to_string(),
            capability,
        }
    }
}
