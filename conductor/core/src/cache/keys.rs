//! Cache Key Derivation
//!
//! A key is the SHA-256 digest of every request field that can change the
//! generated output. Structured fields are hashed as their JSON encoding,
//! binary payloads are hashed as raw bytes. Each field is framed by its name
//! and length so adjacent fields cannot bleed into each other.
//!
//! Fields that do not affect output (caller metadata, selection requirements)
//! are left out, so two callers asking the same question share an entry.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::models::{GenerationConfig, Modality};
use crate::provider::{
    AudioRequest, AudioResponse, ImageRequest, ImageResponse, TextRequest, TextResponse,
    VideoRequest, VideoResponse,
};

/// Hex-encoded SHA-256 digest identifying one cacheable request
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incremental, field-framed digest builder
pub struct KeyBuilder {
    hasher: Sha256,
    failed: bool,
}

impl KeyBuilder {
    #[must_use]
    pub fn new(keyspace: Modality) -> Self {
        let mut builder = Self {
            hasher: Sha256::new(),
            failed: false,
        };
        builder.bytes("keyspace", keyspace.as_str().as_bytes());
        builder
    }

    /// Hash a structured field via its JSON encoding
    #[must_use]
    pub fn field<T: Serialize + ?Sized>(mut self, name: &str, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(encoded) => self.bytes(name, &encoded),
            Err(e) => {
                warn!(field = name, error = %e, "Cache key field did not serialize");
                self.failed = true;
            }
        }
        self
    }

    /// Refuse to key the request unless `ok` holds
    ///
    /// JSON encodes NaN and infinities as `null`, so requests carrying them
    /// would share a key with requests that leave the field unset.
    #[must_use]
    pub fn require(mut self, name: &str, ok: bool) -> Self {
        if !ok {
            debug!(field = name, "Non-finite value, bypassing cache");
            self.failed = true;
        }
        self
    }

    /// Hash a binary payload as-is
    #[must_use]
    pub fn payload(mut self, name: &str, data: &[u8]) -> Self {
        self.bytes(name, data);
        self
    }

    fn bytes(&mut self, name: &str, data: &[u8]) {
        self.hasher.update((name.len() as u64).to_le_bytes());
        self.hasher.update(name.as_bytes());
        self.hasher.update((data.len() as u64).to_le_bytes());
        self.hasher.update(data);
    }

    /// The finished key, or `None` if any field could not be encoded
    #[must_use]
    pub fn finish(self) -> Option<CacheKey> {
        if self.failed {
            return None;
        }
        Some(CacheKey(hex::encode(self.hasher.finalize())))
    }
}

// ============================================================================
// Cached responses
// ============================================================================

/// A stored response, tagged by keyspace
#[derive(Clone, Debug, PartialEq)]
pub enum CachedResponse {
    Text(TextResponse),
    Image(ImageResponse),
    Audio(AudioResponse),
    Video(VideoResponse),
}

impl CachedResponse {
    #[must_use]
    pub fn modality(&self) -> Modality {
        match self {
            Self::Text(_) => Modality::Text,
            Self::Image(_) => Modality::Image,
            Self::Audio(_) => Modality::Audio,
            Self::Video(_) => Modality::Video,
        }
    }
}

/// A request whose response can be cached
pub trait CacheableRequest {
    /// Response type stored for this request
    type Cached: Clone;

    /// Keyspace the request's entries live in
    fn keyspace(&self) -> Modality;

    /// Digest over every output-affecting field
    ///
    /// `None` means the request cannot be keyed and must bypass the cache.
    fn cache_key(&self) -> Option<CacheKey>;

    /// Tag a response for storage
    fn wrap(response: Self::Cached) -> CachedResponse;

    /// Recover a response from storage
    fn unwrap_cached(cached: &CachedResponse) -> Option<Self::Cached>;
}

macro_rules! cached_variant {
    ($variant:ident, $response:ty) => {
        type Cached = $response;

        fn keyspace(&self) -> Modality {
            Modality::$variant
        }

        fn wrap(response: $response) -> CachedResponse {
            CachedResponse::$variant(response)
        }

        fn unwrap_cached(cached: &CachedResponse) -> Option<$response> {
            match cached {
                CachedResponse::$variant(response) => Some(response.clone()),
                _ => None,
            }
        }
    };
}

impl CacheableRequest for TextRequest {
    cached_variant!(Text, TextResponse);

    fn cache_key(&self) -> Option<CacheKey> {
        KeyBuilder::new(Modality::Text)
            .field("model_id", &self.model_id)
            .field("prompt", &self.prompt)
            .field("messages", &self.messages)
            .field("system_prompt", &self.system_prompt)
            .field("config", &self.config)
            .require(
                "config",
                self.config.as_ref().map_or(true, GenerationConfig::is_finite),
            )
            .finish()
    }
}

impl CacheableRequest for ImageRequest {
    cached_variant!(Image, ImageResponse);

    fn cache_key(&self) -> Option<CacheKey> {
        KeyBuilder::new(Modality::Image)
            .field("model_id", &self.model_id)
            .field("prompt", &self.prompt)
            .field("negative_prompt", &self.negative_prompt)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("count", &self.count)
            .field("seed", &self.seed)
            .field("steps", &self.steps)
            .field("guidance_scale", &self.guidance_scale)
            .require(
                "guidance_scale",
                self.guidance_scale.map_or(true, f32::is_finite),
            )
            .finish()
    }
}

impl CacheableRequest for AudioRequest {
    cached_variant!(Audio, AudioResponse);

    fn cache_key(&self) -> Option<CacheKey> {
        KeyBuilder::new(Modality::Audio)
            .field("model_id", &self.model_id)
            .payload("audio", &self.audio)
            .field("format", &self.format)
            .field("task", &self.task)
            .field("language", &self.language)
            .field("prompt", &self.prompt)
            .finish()
    }
}

impl CacheableRequest for VideoRequest {
    cached_variant!(Video, VideoResponse);

    fn cache_key(&self) -> Option<CacheKey> {
        KeyBuilder::new(Modality::Video)
            .field("model_id", &self.model_id)
            .payload("video", &self.video)
            .field("format", &self.format)
            .field("task", &self.task)
            .field("language", &self.language)
            .field("prompt", &self.prompt)
            .finish()
    }
}
