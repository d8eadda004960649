//! Configuration for the ingestion engine.
//!
//! Loaded from the `[engine]` section of `graphsync.toml` or from
//! `GRAPHSYNC__ENGINE__*` environment variables. Every field has a default,
//! so an absent section yields [`EngineConfig::default`].

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, SchemaError};

/// Engine-wide settings shared by every load and cleanup call.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Records per write transaction when the caller does not pick one.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Rows removed per cleanup statement execution.
    #[serde(default = "default_cleanup_batch_size")]
    pub cleanup_batch_size: usize,

    /// Retry policy for network and transient failures.
    #[serde(default = "RetryConfig::network")]
    pub network_retry: RetryConfig,

    /// Retry policy for EntityNotFound races between concurrent writers.
    #[serde(default = "RetryConfig::entity_not_found")]
    pub entity_retry: RetryConfig,

    /// Retry policy for index creation (network failures only).
    #[serde(default = "RetryConfig::network")]
    pub index_retry: RetryConfig,
}

/// Exponential backoff parameters for one failure class.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: f64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_delay")]
    pub max_delay_secs: f64,

    /// Sleep a uniformly random fraction of each computed delay.
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl RetryConfig {
    /// Defaults for network and transient server failures.
    pub fn network() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_secs: default_initial_delay(),
            multiplier: default_multiplier(),
            max_delay_secs: default_max_delay(),
            jitter: true,
        }
    }

    /// Defaults for EntityNotFound: same attempt count, shorter waits.
    pub fn entity_not_found() -> Self {
        Self {
            initial_delay_secs: 0.5,
            max_delay_secs: 8.0,
            ..Self::network()
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_secs: 0.0,
            multiplier: 1.0,
            max_delay_secs: 0.0,
            jitter: false,
        }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.initial_delay_secs).unwrap_or_default()
    }

    pub fn max_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.max_delay_secs).unwrap_or_default()
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(SchemaError::Config(format!(
                "{name}.max_attempts must be at least 1"
            )));
        }
        let finite_non_negative = |v: f64| v.is_finite() && v >= 0.0;
        if !finite_non_negative(self.initial_delay_secs) || !finite_non_negative(self.max_delay_secs) {
            return Err(SchemaError::Config(format!(
                "{name} delays must be finite and non-negative"
            )));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(SchemaError::Config(format!(
                "{name}.multiplier must be at least 1.0"
            )));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::network()
    }
}

fn default_batch_size() -> usize {
    10_000
}

fn default_cleanup_batch_size() -> usize {
    100
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> f64 {
    1.0
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay() -> f64 {
    60.0
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            cleanup_batch_size: default_cleanup_batch_size(),
            network_retry: RetryConfig::network(),
            entity_retry: RetryConfig::entity_not_found(),
            index_retry: RetryConfig::network(),
        }
    }
}

impl EngineConfig {
    /// Load from `<file_prefix>.toml` (optional) and `GRAPHSYNC__ENGINE__*`.
    pub fn load(file_prefix: &str) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("GRAPHSYNC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| SchemaError::Config(e.to_string()))?;

        let engine = match cfg.get::<EngineConfig>("engine") {
            Ok(c) => c,
            Err(config::ConfigError::NotFound(_)) => EngineConfig::default(),
            Err(e) => return Err(SchemaError::Config(e.to_string())),
        };
        engine.validate()?;
        Ok(engine)
    }

    /// A config that never sleeps between retries.
    pub fn without_delays() -> Self {
        Self {
            network_retry: RetryConfig::immediate(default_max_attempts()),
            entity_retry: RetryConfig::immediate(default_max_attempts()),
            index_retry: RetryConfig::immediate(default_max_attempts()),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SchemaError::Config("engine.batch_size must be positive".into()));
        }
        if self.cleanup_batch_size == 0 {
            return Err(SchemaError::Config(
                "engine.cleanup_batch_size must be positive".into(),
            ));
        }
        self.network_retry.validate("engine.network_retry")?;
        self.entity_retry.validate("engine.entity_retry")?;
        self.index_retry.validate("engine.index_retry")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.batch_size, 10_000);
        assert_eq!(config.cleanup_batch_size, 100);
        assert_eq!(config.network_retry.max_attempts, 5);
        assert_eq!(config.entity_retry.max_attempts, 5);
        assert!(config.entity_retry.max_delay() < config.network_retry.max_delay());
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"batch_size": 500, "network_retry": {"max_attempts": 3}}"#)
                .unwrap();
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.cleanup_batch_size, 100);
        assert_eq!(config.network_retry.max_attempts, 3);
        assert_eq!(config.network_retry.initial_delay(), Duration::from_secs(1));
        assert_eq!(config.entity_retry, RetryConfig::entity_not_found());
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = EngineConfig::load("graphsync-config-that-does-not-exist").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let config = EngineConfig {
            batch_size: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(SchemaError::Config(_))));
    }

    #[test]
    fn test_bad_retry_policy_is_rejected() {
        let mut config = EngineConfig::default();
        config.entity_retry.multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.network_retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
