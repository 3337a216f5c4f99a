//! Layered configuration for the resilient execution layer
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. An optional TOML/JSON/YAML file
//! 3. Environment variables, e.g. `RESILIENCE__RETRY__MAX_ATTEMPTS=5`
use crate::error::alerting::AlertConfig;
use crate::error::circuit_breaker::CircuitBreakerConfig;
use crate::error::retry::RetryConfig;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "RESILIENCE";

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("failed to encode default configuration: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("invalid operation pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub retry: RetryConfig,

    pub circuit_breaker: CircuitBreakerConfig,

    pub alerting: AlertConfig,
}

impl ResilienceConfig {
    /// Load defaults, then `path` if given, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let defaults = serde_json::to_string(&ResilienceConfig::default())?;
        let mut builder =
            Config::builder().add_source(File::from_str(&defaults, FileFormat::Json));

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.to_path_buf()));
            }
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: ResilienceConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        tracing::debug!(
            path = ?path,
            max_attempts = config.retry.max_attempts,
            failure_threshold = config.circuit_breaker.failure_threshold,
            "Loaded resilience configuration"
        );

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        self.alerting.validate()
    }
}
