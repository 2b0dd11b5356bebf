//! Model Conductor Core - Model-Serving Orchestration
//!
//! This crate sits between callers and generation providers. It decides which
//! model serves a request, answers repeated requests from a content-addressed
//! cache, and tracks per-model health so selection can route around trouble.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Callers                                │
//! │        generate_text / generate_image / process_audio / ...       │
//! └────────────────────────────────┬─────────────────────────────────┘
//!                                  │
//! ┌────────────────────────────────┼─────────────────────────────────┐
//! │                       MODEL CONDUCTOR CORE                        │
//! │  ┌─────────────────────────────┴──────────────────────────────┐  │
//! │  │                       ModelRegistry                         │  │
//! │  │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐  │  │
//! │  │  │ LoadBalancer │  │ResponseCache │  │   ModelMonitor   │  │  │
//! │  │  │ (strategies) │  │ (4 keyspaces)│  │ metrics + alerts │  │  │
//! │  │  └──────────────┘  └──────────────┘  └──────────────────┘  │  │
//! │  └─────────────────────────────┬──────────────────────────────┘  │
//! └────────────────────────────────┼─────────────────────────────────┘
//!                                  │  ModelProvider (no locks held)
//!              ┌───────────────────┼───────────────────┐
//!              v                   v                   v
//!         ┌─────────┐         ┌─────────┐         ┌─────────┐
//!         │  Text   │         │  Image  │         │ Audio / │
//!         │ backend │         │ backend │         │  Video  │
//!         └─────────┘         └─────────┘         └─────────┘
//! ```
//!
//! All core operations are synchronous and safe to call from many threads.
//! Only the [`maintenance`] timers need a tokio runtime.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use model_conductor::{ModelRegistry, ServingConfig, Model, Modality, TextRequest};
//!
//! let (registry, mut alerts) = ModelRegistry::from_config(&ServingConfig::default())?;
//! registry.bind_provider(Arc::new(my_provider));
//! registry.register(Model::new("llama3", "ollama", Modality::Text));
//!
//! // Empty model ID: the load balancer picks one
//! let response = registry.generate_text(TextRequest::new("", "Hello!"))?;
//! ```
//!
//! # Module Overview
//!
//! - [`models`]: Model records, modalities, generation config, pricing
//! - [`provider`]: Provider capability contract and request/response shapes
//! - [`routing`]: Selection strategies and the load balancer
//! - [`cache`]: Content-addressed response cache
//! - [`monitor`]: Per-model metrics, health, alerting and history
//! - [`registry`]: Model table and the generation request path
//! - [`template`]: Prompt template rendering contract
//! - [`maintenance`]: Periodic cleanup, health sweep and snapshot tasks
//! - [`config`]: TOML configuration

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod maintenance;
pub mod models;
pub mod monitor;
pub mod provider;
pub mod registry;
pub mod routing;
pub mod template;

// Core exports
pub use models::{GenerationConfig, Modality, Model, ModelStatus, Pricing, UsageLimits};
pub use registry::{Dispatch, ModelRegistry, RegistryError};

// Provider exports
pub use provider::{
    AudioRequest, AudioResponse, ChatMessage, ImageRequest, ImageResponse, ModelProvider,
    ProviderError, ProviderHealth, ProviderUsage, TextRequest, TextResponse, TokenUsage,
    VideoRequest, VideoResponse,
};

// Routing exports
pub use routing::{BalancerError, LoadBalancer, SelectionRequirements, Strategy};

// Cache exports
pub use cache::{CacheStats, ResponseCache};

// Monitor exports
pub use monitor::{
    Alert, AlertRule, Comparison, HealthStatus, MetricName, ModelMetrics, ModelMonitor, Severity,
};

// Template exports
pub use template::{PromptRenderer, PromptTemplate, TemplateError, TemplateLibrary};

// Maintenance exports
pub use maintenance::{spawn_maintenance, MaintenanceHandle};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigSource,
    ServingConfig,
};
