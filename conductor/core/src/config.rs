//! Serving Configuration
//!
//! TOML-backed configuration for the cache, monitor and load balancer, plus the
//! models and alert rules to install at startup.
//!
//! ```toml
//! [cache]
//! capacity = 5000
//! ttl_secs = 600
//!
//! [balancer]
//! default_strategy = "least_connections"
//!
//! [[models]]
//! id = "llama3"
//! provider = "ollama"
//! modality = "text"
//!
//! [[alert_rules]]
//! model_id = "*"
//! metric = "error_rate"
//! comparison = ">"
//! threshold = 0.1
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::Model;
use crate::monitor::AlertRule;
use crate::routing::strategies::PERFORMANCE_BASED;

/// Environment variable overriding `cache.capacity`
pub const ENV_CACHE_CAPACITY: &str = "MODEL_CONDUCTOR_CACHE_CAPACITY";
/// Environment variable overriding `cache.ttl_secs`
pub const ENV_CACHE_TTL_SECS: &str = "MODEL_CONDUCTOR_CACHE_TTL_SECS";
/// Environment variable overriding `balancer.default_strategy`
pub const ENV_DEFAULT_STRATEGY: &str = "MODEL_CONDUCTOR_DEFAULT_STRATEGY";

// ============================================================================
// Sections
// ============================================================================

/// Response cache settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry ceiling shared by all keyspaces
    pub capacity: usize,
    /// Entry lifetime
    pub ttl_secs: u64,
    /// Expiry sweep interval
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            ttl_secs: 3600,
            cleanup_interval_secs: 300,
        }
    }
}

impl CacheConfig {
    /// Entry lifetime as a Duration
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Sweep interval as a Duration
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

/// Monitor and alerting settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// In-flight requests at which the health score's load term reaches zero
    pub max_load: u64,
    /// Inactivity after which a model is forced unhealthy
    pub staleness_secs: u64,
    /// Staleness sweep interval
    pub health_check_interval_secs: u64,
    /// Snapshot interval
    pub snapshot_interval_secs: u64,
    /// Snapshots kept per model
    pub history_capacity: usize,
    /// Undelivered alerts held before dropping
    pub alert_channel_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_load: 100,
            staleness_secs: 300,
            health_check_interval_secs: 30,
            snapshot_interval_secs: 60,
            history_capacity: 1000,
            alert_channel_capacity: 100,
        }
    }
}

impl MonitorConfig {
    /// Staleness window as a Duration
    #[must_use]
    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }

    /// Health sweep interval as a Duration
    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }

    /// Snapshot interval as a Duration
    #[must_use]
    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs.max(1))
    }
}

/// Load balancer settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Strategy used when a request names none
    pub default_strategy: String,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            default_strategy: PERFORMANCE_BASED.to_string(),
        }
    }
}

// ============================================================================
// Full configuration
// ============================================================================

/// Complete serving configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    /// Response cache
    pub cache: CacheConfig,
    /// Monitor and alerting
    pub monitor: MonitorConfig,
    /// Load balancer
    pub balancer: BalancerConfig,
    /// Models registered at startup
    pub models: Vec<Model>,
    /// Alert rules installed at startup
    pub alert_rules: Vec<AlertRule>,
}

impl ServingConfig {
    /// Parse from TOML text
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` on malformed TOML and
    /// `ConfigError::Invalid` if validation fails.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: None,
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MODEL_CONDUCTOR_*` environment overrides
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var(ENV_CACHE_CAPACITY) {
            match raw.parse() {
                Ok(capacity) => self.cache.capacity = capacity,
                Err(_) => warn!(var = ENV_CACHE_CAPACITY, value = %raw, "Ignoring invalid override"),
            }
        }
        if let Ok(raw) = std::env::var(ENV_CACHE_TTL_SECS) {
            match raw.parse() {
                Ok(ttl) => self.cache.ttl_secs = ttl,
                Err(_) => warn!(var = ENV_CACHE_TTL_SECS, value = %raw, "Ignoring invalid override"),
            }
        }
        if let Ok(strategy) = std::env::var(ENV_DEFAULT_STRATEGY) {
            if !strategy.trim().is_empty() {
                self.balancer.default_strategy = strategy.trim().to_string();
            }
        }
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.capacity == 0 {
            return Err(ConfigError::Invalid("cache.capacity must be > 0".into()));
        }
        if self.balancer.default_strategy.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "balancer.default_strategy must not be empty".into(),
            ));
        }
        if let Some(model) = self.models.iter().find(|m| m.id.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "model with provider '{}' has an empty id",
                model.provider
            )));
        }
        if let Some(model) = self.models.iter().find(|m| m.provider.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "model '{}' has an empty provider",
                model.id
            )));
        }
        Ok(())
    }
}

/// Where a loaded configuration came from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    /// Parsed from this file
    File(PathBuf),
    /// No file found; built-in defaults
    Defaults,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("Failed to read config {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// TOML did not parse
    #[error("Failed to parse config{}: {message}", .path.as_ref().map(|p| format!(" {}", p.display())).unwrap_or_default())]
    Parse {
        /// File path, when parsing a file
        path: Option<PathBuf>,
        /// Parser message
        message: String,
    },

    /// Values parsed but violate a constraint
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Default config file location (`$XDG_CONFIG_HOME/model-conductor/config.toml`)
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("model-conductor").join("config.toml"))
}

/// Load and validate a config file
///
/// # Errors
///
/// Returns `ConfigError` if the file is unreadable, malformed or invalid.
pub fn load_config_from_path(path: &Path) -> Result<ServingConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: ServingConfig = toml::from_str(&text).map_err(|e| ConfigError::Parse {
        path: Some(path.to_path_buf()),
        message: e.to_string(),
    })?;
    config.validate()?;
    info!(path = %path.display(), models = config.models.len(), rules = config.alert_rules.len(), "Loaded config");
    Ok(config)
}

/// Load the default config file if present, otherwise defaults, then apply
/// environment overrides
///
/// # Errors
///
/// Returns `ConfigError` if a present file is unreadable, malformed or invalid.
pub fn load_config() -> Result<(ServingConfig, ConfigSource), ConfigError> {
    let (mut config, source) = match default_config_path() {
        Some(path) if path.exists() => (load_config_from_path(&path)?, ConfigSource::File(path)),
        _ => (ServingConfig::default(), ConfigSource::Defaults),
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok((config, source))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;
    use tempfile::NamedTempFile;

    use super::*;
    use crate::models::Modality;

    #[test]
    fn test_defaults() {
        let config = ServingConfig::default();
        assert_eq!(config.cache.capacity, 1000);
        assert_eq!(config.cache.ttl(), Duration::from_secs(3600));
        assert_eq!(config.monitor.staleness(), Duration::from_secs(300));
        assert_eq!(config.monitor.history_capacity, 1000);
        assert_eq!(config.balancer.default_strategy, PERFORMANCE_BASED);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[cache]
capacity = 50
ttl_secs = 10

[monitor]
staleness_secs = 60

[balancer]
default_strategy = "round_robin"

[[models]]
id = "llama3"
provider = "ollama"
modality = "text"
capabilities = ["chat"]

[[models]]
id = "sdxl"
provider = "stability"
modality = "image"
status = "inactive"

[[alert_rules]]
model_id = "*"
metric = "error_rate"
comparison = ">"
threshold = 0.1
"#
        )
        .unwrap();

        let config = load_config_from_path(file.path()).unwrap();
        assert_eq!(config.cache.capacity, 50);
        assert_eq!(config.cache.cleanup_interval_secs, 300);
        assert_eq!(config.monitor.staleness_secs, 60);
        assert_eq!(config.monitor.max_load, 100);
        assert_eq!(config.balancer.default_strategy, "round_robin");
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.models[1].modality, Modality::Image);
        assert!(!config.models[1].is_active());
        assert_eq!(config.alert_rules.len(), 1);
    }

    #[test]
    fn test_invalid_configs() {
        assert!(matches!(
            ServingConfig::from_toml("[cache]\ncapacity = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ServingConfig::from_toml("[cache\ncapacity = 1"),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            ServingConfig::from_toml("[[models]]\nid = \"\"\nprovider = \"p\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            load_config_from_path(Path::new("/definitely/not/here.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
