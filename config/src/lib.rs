//! # Configuration Management for stampede-guard
//!
//! This crate provides centralized configuration structures for all stampede-guard
//! components: the Redis connection, the distributed lock and the coordinator itself.
//!
//! ## Quick Start
//!
//! ### Programmatic Configuration
//! ```rust
//! use config::{CoordinatorConfig, LockConfig, RedisConfig};
//!
//! let redis = RedisConfig::new("redis://localhost:6379".to_string());
//! let lock = LockConfig::default();
//! let coordinator = CoordinatorConfig::default().with_key_prefix("my-api-cache");
//! ```
//!
//! ### TOML File Configuration
//! ```toml
//! [redis]
//! url = "redis://localhost:6379"
//! connection_timeout_ms = 3000
//!
//! [lock]
//! nodes = []
//! drift_factor = 0.01
//! retry_count = 0
//! retry_delay_ms = 100
//! retry_jitter_ms = 200
//!
//! [coordinator]
//! callback_retry_count = 4
//! callback_retry_interval_ms = 200
//! key_prefix = "tmc-apig-cache"
//! debug = false
//! lock_ttl_ms = 10000
//! poll_timeout_ms = 4000
//! ```
//!
//! Load configuration:
//! ```rust,no_run
//! use config::AppConfig;
//!
//! // Load from STAMPEDE_CONFIG, ./stampede.toml or the environment
//! let config = AppConfig::load()?;
//!
//! // Or load from custom path
//! let config = AppConfig::from_file("config/production.toml")?;
//! # Ok::<(), config::ConfigError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::{env, path::Path, time::Duration};
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "./stampede.toml";
const CONFIG_PATH_ENV: &str = "STAMPEDE_CONFIG";

pub const DEFAULT_KEY_PREFIX: &str = "tmc-apig-cache";
pub const DEFAULT_REDIS_PORT: u16 = 6379;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Dotenvy error: {0}")]
    Dotenvy(#[from] dotenvy::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
}

/// Redis connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis connection string (redis://localhost:6379)
    pub url: String,
    /// Connection timeout in milliseconds
    pub connection_timeout_ms: u64,
}

/// Distributed lock (Redlock) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Independent Redis nodes voting on the lock. Empty means the main Redis URL.
    pub nodes: Vec<String>,
    /// Clock drift allowance, as a fraction of the lock TTL
    pub drift_factor: f64,
    /// Extra acquisition rounds after the first one fails
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub retry_jitter_ms: u64,
}

/// Process-wide coordinator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Maximum generator attempts per lock holder
    pub callback_retry_count: u32,
    /// Linear backoff step between generator attempts, in milliseconds
    pub callback_retry_interval_ms: u64,
    /// Global prefix for every key written by the coordinator
    pub key_prefix: String,
    pub debug: bool,
    /// Lifetime ceiling of a generation lock, in milliseconds
    pub lock_ttl_ms: u64,
    /// How long a waiter listens for the unlock event before re-checking the cache
    pub poll_timeout_ms: u64,
}

impl AppConfig {
    /// Load configuration from the TOML file named in .env / the environment, the
    /// default path, or fall back to defaults with the environment overlaid
    pub fn load() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => {}
            Err(e) if e.not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let mut config = if let Ok(config_path) = env::var(CONFIG_PATH_ENV) {
            Self::from_file(&config_path)?
        } else if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::from_file(DEFAULT_CONFIG_PATH)?
        } else {
            Self::default()
        };

        config.redis.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Redis URLs taking part in lock quorum
    pub fn lock_nodes(&self) -> Vec<String> {
        if self.lock.nodes.is_empty() {
            vec![self.redis.url.clone()]
        } else {
            self.lock.nodes.clone()
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Redis validations
        if self.redis.url.is_empty() {
            return Err(ConfigError::Invalid(
                "Redis URL cannot be empty".to_string(),
            ));
        }
        if self.lock.nodes.iter().any(|node| node.is_empty()) {
            return Err(ConfigError::Invalid(
                "Lock node URLs cannot be empty".to_string(),
            ));
        }

        // Lock validations
        if !(0.0..1.0).contains(&self.lock.drift_factor) {
            return Err(ConfigError::Invalid(
                "Lock drift_factor must be within [0, 1)".to_string(),
            ));
        }

        self.coordinator.validate()
    }
}

impl RedisConfig {
    /// Create a new Redis configuration
    pub fn new(url: String) -> Self {
        Self {
            url,
            ..Self::default()
        }
    }

    /// Build a Redis URL from host, port and optional password
    ///
    /// The password is percent-encoded so reserved URL characters survive.
    pub fn from_parts(host: &str, port: u16, password: Option<&str>) -> Self {
        let url = match password {
            Some(password) if !password.is_empty() => {
                format!("redis://:{}@{}:{}", urlencoding::encode(password), host, port)
            }
            _ => format!("redis://{}:{}", host, port),
        };
        Self::new(url)
    }

    /// Overlay REDIS_URL, or REDIS_ENDPOINT_PATH / _PORT / _PASSWORD, onto this config
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = env::var("REDIS_URL") {
            self.url = url;
            return Ok(());
        }

        let Ok(host) = env::var("REDIS_ENDPOINT_PATH") else {
            return Ok(());
        };
        let port = match env::var("REDIS_ENDPOINT_PORT") {
            Ok(port) => port.parse::<u16>().map_err(|_| {
                ConfigError::Invalid(format!("REDIS_ENDPOINT_PORT is not a valid port: {}", port))
            })?,
            Err(_) => DEFAULT_REDIS_PORT,
        };
        let password = env::var("REDIS_ENDPOINT_PASSWORD").ok();

        let connection_timeout_ms = self.connection_timeout_ms;
        *self = Self::from_parts(&host, port, password.as_deref());
        self.connection_timeout_ms = connection_timeout_ms;
        Ok(())
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: format!("redis://127.0.0.1:{}", DEFAULT_REDIS_PORT),
            connection_timeout_ms: 3000,
        }
    }
}

impl LockConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn retry_jitter(&self) -> Duration {
        Duration::from_millis(self.retry_jitter_ms)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            drift_factor: 0.01,
            retry_count: 0,
            retry_delay_ms: 100,
            retry_jitter_ms: 200,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_key_prefix(mut self, key_prefix: &str) -> Self {
        self.key_prefix = key_prefix.to_string();
        self
    }

    pub fn with_retry_policy(mut self, retry_count: u32, retry_interval_ms: u64) -> Self {
        self.callback_retry_count = retry_count;
        self.callback_retry_interval_ms = retry_interval_ms;
        self
    }

    pub fn with_poll_timeout(mut self, timeout_ms: u64) -> Self {
        self.poll_timeout_ms = timeout_ms;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.callback_retry_interval_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.callback_retry_count == 0 {
            return Err(ConfigError::Invalid(
                "Coordinator callback_retry_count must be greater than 0".to_string(),
            ));
        }
        if self.key_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "Coordinator key_prefix cannot be empty".to_string(),
            ));
        }
        if self.lock_ttl_ms == 0 {
            return Err(ConfigError::Invalid(
                "Coordinator lock_ttl_ms must be greater than 0".to_string(),
            ));
        }
        if self.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "Coordinator poll_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            callback_retry_count: 4,
            callback_retry_interval_ms: 200,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            debug: false,
            lock_ttl_ms: 10_000,
            poll_timeout_ms: 4_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = AppConfig::default();

        assert_eq!(config.coordinator.callback_retry_count, 4);
        assert_eq!(config.coordinator.callback_retry_interval_ms, 200);
        assert_eq!(config.coordinator.key_prefix, "tmc-apig-cache");
        assert!(!config.coordinator.debug);
        assert_eq!(config.coordinator.lock_ttl(), Duration::from_secs(10));
        assert_eq!(config.coordinator.poll_timeout(), Duration::from_secs(4));
        assert_eq!(config.lock.retry_count, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [redis]
            url = "redis://cache.internal:6380"

            [coordinator]
            key_prefix = "orders"
            "#,
        )
        .unwrap();

        assert_eq!(config.redis.url, "redis://cache.internal:6380");
        assert_eq!(config.coordinator.key_prefix, "orders");
        assert_eq!(config.coordinator.callback_retry_count, 4);
        assert_eq!(config.lock.drift_factor, 0.01);
    }

    #[test]
    fn test_lock_nodes_fall_back_to_main_url() {
        let mut config = AppConfig::default();
        assert_eq!(config.lock_nodes(), vec![config.redis.url.clone()]);

        config.lock.nodes = vec!["redis://a:6379".into(), "redis://b:6379".into()];
        assert_eq!(config.lock_nodes().len(), 2);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let result = AppConfig::from_toml_str(
            r#"
            [coordinator]
            callback_retry_count = 0
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = AppConfig::from_toml_str(
            r#"
            [lock]
            drift_factor = 1.5
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let config = CoordinatorConfig::default().with_key_prefix("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redis_url_from_parts() {
        let plain = RedisConfig::from_parts("10.0.0.5", 6379, None);
        assert_eq!(plain.url, "redis://10.0.0.5:6379");

        let blank = RedisConfig::from_parts("10.0.0.5", 6379, Some(""));
        assert_eq!(blank.url, "redis://10.0.0.5:6379");

        let secured = RedisConfig::from_parts("10.0.0.5", 6380, Some("s3cret"));
        assert_eq!(secured.url, "redis://:s3cret@10.0.0.5:6380");
    }

    #[test]
    fn test_reserved_password_characters_are_encoded() {
        let config = RedisConfig::from_parts("cache.internal", 6379, Some("p@ss/word"));
        assert_eq!(config.url, "redis://:p%40ss%2Fword@cache.internal:6379");

        let config = RedisConfig::from_parts("cache.internal", 6379, Some("a#b?c:d"));
        assert_eq!(config.url, "redis://:a%23b%3Fc%3Ad@cache.internal:6379");
    }
}
