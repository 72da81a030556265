//! # Configuration Module
//!
//! Configuration structures for the dispatch gateway and the mechanisms to load them.
//!
//! ## Key Features
//! - YAML/JSON configuration parsing with serde, every section optional
//! - Durations in humantime form (`30s`, `1m`)
//! - Environment variable overrides (`GATEWAY_<SECTION>_<FIELD>`)
//! - Validation that reports every problem at once

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::core::circuit_breaker::CircuitBreakerConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::DEFAULT_HEARTBEAT_INTERVAL_MS;
use crate::dispatch::{DispatcherConfig, LivenessConfig};
use crate::load_balancing::BalancingStrategy;
use crate::observability::config::{LogFormat, ObservabilityConfig};
use crate::registry::{RedisRegistryConfig, RegistryBackend};

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "GATEWAY_CONFIG_PATH";

/// Config file used when `GATEWAY_CONFIG_PATH` is unset
pub const DEFAULT_CONFIG_PATH: &str = "config/gateway.yaml";

/// Main gateway configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener settings
    pub server: ServerConfig,

    /// Worker registry backend and heartbeat contract
    pub registry: RegistryConfig,

    pub load_balancing: LoadBalancingConfig,

    pub circuit_breaker: CircuitBreakerConfig,

    /// Forward timeouts and HTTP client settings
    pub dispatch: DispatcherConfig,

    /// Heartbeat timeout sweep
    pub liveness: LivenessConfig,

    /// Logging and metrics
    pub observability: ObservabilityConfig,
}

impl GatewayConfig {
    /// Load configuration from a YAML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: GatewayConfig = serde_yaml::from_str(&content)
            .map_err(|e| GatewayError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from JSON
    pub async fn load_from_json<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: GatewayConfig = serde_json::from_str(&content)
            .map_err(|e| GatewayError::config(format!("Failed to parse JSON config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or from defaults plus env overrides when the file does not exist
    ///
    /// Files ending in `.json` are parsed as JSON, everything else as YAML.
    pub async fn load<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let path = path.as_ref();

        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            info!(path = %path.display(), "Config file not found, using defaults");
            let mut config = GatewayConfig::default();
            config.apply_env_overrides()?;
            config.validate()?;
            return Ok(config);
        }

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let config = if is_json {
            Self::load_from_json(path).await?
        } else {
            Self::load_from_file(path).await?
        };
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Load from `GATEWAY_CONFIG_PATH`, defaulting to `config/gateway.yaml`
    pub async fn load_from_env() -> GatewayResult<Self> {
        let path = env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(path).await
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Environment variables follow the pattern: GATEWAY_<SECTION>_<FIELD>
    /// For example: GATEWAY_SERVER_HTTP_PORT=8080
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from any key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> GatewayResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server configuration overrides
        if let Some(addr) = lookup("GATEWAY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Some(port) = lookup("GATEWAY_SERVER_HTTP_PORT") {
            self.server.http_port = port
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_SERVER_HTTP_PORT: {}", e)))?;
        }

        // Registry overrides
        if let Some(backend) = lookup("GATEWAY_REGISTRY_BACKEND") {
            self.registry.backend = match backend.to_lowercase().as_str() {
                "memory" => RegistryBackend::Memory,
                "redis" => RegistryBackend::Redis,
                other => {
                    return Err(GatewayError::config(format!(
                        "Invalid GATEWAY_REGISTRY_BACKEND: {}",
                        other
                    )))
                }
            };
        }

        if let Some(url) = lookup("GATEWAY_REDIS_URL") {
            self.registry.redis.url = url;
        }

        if let Some(interval) = lookup("GATEWAY_REGISTRY_HEARTBEAT_INTERVAL") {
            self.registry.heartbeat_interval = humantime::parse_duration(&interval).map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_REGISTRY_HEARTBEAT_INTERVAL: {}", e))
            })?;
        }

        // Balancing and breaker overrides
        if let Some(strategy) = lookup("GATEWAY_LOAD_BALANCING_STRATEGY") {
            self.load_balancing.strategy = strategy;
        }

        if let Some(threshold) = lookup("GATEWAY_CIRCUIT_BREAKER_FAILURE_THRESHOLD") {
            self.circuit_breaker.failure_threshold = threshold.parse().map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_CIRCUIT_BREAKER_FAILURE_THRESHOLD: {}", e))
            })?;
        }

        if let Some(timeout) = lookup("GATEWAY_CIRCUIT_BREAKER_TIMEOUT") {
            self.circuit_breaker.timeout = humantime::parse_duration(&timeout)
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_CIRCUIT_BREAKER_TIMEOUT: {}", e)))?;
        }

        // Dispatch and liveness overrides
        if let Some(timeout) = lookup("GATEWAY_DISPATCH_DEFAULT_TIMEOUT") {
            self.dispatch.default_timeout = humantime::parse_duration(&timeout)
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_DISPATCH_DEFAULT_TIMEOUT: {}", e)))?;
        }

        if let Some(timeout) = lookup("GATEWAY_LIVENESS_HEARTBEAT_TIMEOUT") {
            self.liveness.heartbeat_timeout = humantime::parse_duration(&timeout).map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_LIVENESS_HEARTBEAT_TIMEOUT: {}", e))
            })?;
        }

        // Logging configuration overrides
        if let Some(level) = lookup("GATEWAY_LOG_LEVEL") {
            self.observability.logging.level = level;
        }

        if let Some(format) = lookup("GATEWAY_LOG_FORMAT") {
            self.observability.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => return Err(GatewayError::config(format!("Invalid GATEWAY_LOG_FORMAT: {}", other))),
            };
        }

        // Metrics configuration overrides
        if let Some(enabled) = lookup("GATEWAY_METRICS_ENABLED") {
            self.observability.metrics.prometheus_enabled = enabled
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_METRICS_ENABLED: {}", e)))?;
        }

        Ok(())
    }

    /// Configuration validation with every problem in one error
    pub fn validate(&self) -> GatewayResult<()> {
        let mut errors = Vec::new();

        if self.server.bind_address.is_empty() {
            errors.push("bind_address cannot be empty".to_string());
        }

        if self.server.max_request_size == 0 {
            errors.push("max_request_size must be greater than 0".to_string());
        }

        if self.registry.heartbeat_interval.is_zero() {
            errors.push("registry.heartbeat_interval must be greater than 0".to_string());
        }

        if self.registry.backend == RegistryBackend::Redis && self.registry.redis.url.is_empty() {
            errors.push("registry.redis.url is required for the redis backend".to_string());
        }

        if self.circuit_breaker.failure_threshold == 0 {
            errors.push("circuit_breaker.failure_threshold must be greater than 0".to_string());
        }

        if self.circuit_breaker.timeout.is_zero() {
            errors.push("circuit_breaker.timeout must be greater than 0".to_string());
        }

        if self.dispatch.default_timeout.is_zero() {
            errors.push("dispatch.default_timeout must be greater than 0".to_string());
        }

        if self.liveness.interval.is_zero() {
            errors.push("liveness.interval must be greater than 0".to_string());
        }

        if self.liveness.heartbeat_timeout <= self.registry.heartbeat_interval {
            errors.push(format!(
                "liveness.heartbeat_timeout ({}) must exceed registry.heartbeat_interval ({})",
                humantime::format_duration(self.liveness.heartbeat_timeout),
                humantime::format_duration(self.registry.heartbeat_interval)
            ));
        }

        match self.observability.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => errors.push(format!("Invalid log level: {}", self.observability.logging.level)),
        }

        if !errors.is_empty() {
            return Err(GatewayError::config(format!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            )));
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: String,

    pub http_port: u16,

    /// Maximum request body size
    pub max_request_size: usize,

    /// How long in-flight requests may take to drain on shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: 8080,
            max_request_size: 10 * 1024 * 1024, // 10MB
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.http_port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub backend: RegistryBackend,

    /// Used when `backend` is `redis`
    pub redis: RedisRegistryConfig,

    /// Heartbeat interval recommended to workers on registration
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::Memory,
            redis: RedisRegistryConfig::default(),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancingConfig {
    /// Strategy name used at startup; unknown names fall back to weighted round robin
    pub strategy: String,
}

impl Default for LoadBalancingConfig {
    fn default() -> Self {
        Self {
            strategy: BalancingStrategy::default().name().to_string(),
        }
    }
}

impl LoadBalancingConfig {
    pub fn strategy(&self) -> BalancingStrategy {
        BalancingStrategy::from_name(&self.strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;
    use tokio::fs;

    #[test]
    fn test_default_config_validation() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.load_balancing.strategy(), BalancingStrategy::WeightedRoundRobin);
        assert_eq!(config.registry.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.liveness.interval, Duration::from_secs(10));
        assert_eq!(config.liveness.heartbeat_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_config_serialization_yaml() {
        let config = GatewayConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let deserialized: GatewayConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.server.http_port, deserialized.server.http_port);
        assert_eq!(config.circuit_breaker.timeout, deserialized.circuit_breaker.timeout);
        assert_eq!(
            config.dispatch.service_timeouts.combo,
            deserialized.dispatch.service_timeouts.combo
        );
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
load_balancing:
  strategy: least_connections
circuit_breaker:
  failure_threshold: 3
  timeout: 2m
"#;
        let config: GatewayConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.load_balancing.strategy(), BalancingStrategy::LeastConnections);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.timeout, Duration::from_secs(120));
        assert_eq!(config.server.http_port, 8080);
        assert_eq!(config.dispatch.default_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_load_config_from_yaml_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("gateway.yaml");

        let config_content = r#"
server:
  bind_address: 127.0.0.1
  http_port: 9080
registry:
  backend: memory
  heartbeat_interval: 15s
dispatch:
  default_timeout: 10s
  service_timeouts:
    combo: 45s
liveness:
  interval: 5s
  heartbeat_timeout: 40s
observability:
  logging:
    level: debug
    format: text
  metrics:
    prometheus_enabled: false
"#;
        fs::write(&config_path, config_content).await.unwrap();

        let config = GatewayConfig::load(&config_path).await.unwrap();
        assert_eq!(config.server.socket_address(), "127.0.0.1:9080");
        assert_eq!(config.registry.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.dispatch.timeout_for(crate::core::types::ServiceType::Combo), Duration::from_secs(45));
        assert_eq!(config.liveness.heartbeat_timeout, Duration::from_secs(40));
        assert_eq!(config.observability.logging.format, LogFormat::Text);
        assert!(!config.observability.metrics.prometheus_enabled);
    }

    #[tokio::test]
    async fn test_load_config_from_json_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("gateway.json");
        fs::write(&config_path, r#"{ "load_balancing": { "strategy": "response_time" } }"#)
            .await
            .unwrap();

        let config = GatewayConfig::load(&config_path).await.unwrap();
        assert_eq!(config.load_balancing.strategy(), BalancingStrategy::ResponseTime);
    }

    #[tokio::test]
    async fn test_missing_file_falls_back_to_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = GatewayConfig::load(temp_dir.path().join("absent.yaml")).await.unwrap();
        assert_eq!(config.server.http_port, GatewayConfig::default().server.http_port);
    }

    #[tokio::test]
    async fn test_malformed_file_is_a_configuration_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("gateway.yaml");
        fs::write(&config_path, "server: [not, a, map]").await.unwrap();

        let err = GatewayConfig::load(&config_path).await.unwrap_err();
        assert_eq!(err.error_type(), "configuration_error");
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("GATEWAY_SERVER_HTTP_PORT", "7000"),
            ("GATEWAY_LOAD_BALANCING_STRATEGY", "round_robin"),
            ("GATEWAY_CIRCUIT_BREAKER_TIMEOUT", "90s"),
            ("GATEWAY_REGISTRY_BACKEND", "redis"),
            ("GATEWAY_LOG_FORMAT", "text"),
        ]
        .into_iter()
        .collect();

        let mut config = GatewayConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.http_port, 7000);
        assert_eq!(config.load_balancing.strategy(), BalancingStrategy::RoundRobin);
        assert_eq!(config.circuit_breaker.timeout, Duration::from_secs(90));
        assert_eq!(config.registry.backend, RegistryBackend::Redis);
        assert_eq!(config.observability.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_unknown_strategy_falls_back_to_weighted_round_robin() {
        let mut config = GatewayConfig::default();
        config.load_balancing.strategy = "fastest".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(config.load_balancing.strategy(), BalancingStrategy::WeightedRoundRobin);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let mut config = GatewayConfig::default();
        let err = config
            .apply_overrides(|key| (key == "GATEWAY_SERVER_HTTP_PORT").then(|| "not-a-port".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("GATEWAY_SERVER_HTTP_PORT"));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = GatewayConfig::default();
        config.server.bind_address = String::new();
        config.circuit_breaker.failure_threshold = 0;
        config.liveness.heartbeat_timeout = Duration::from_secs(5);

        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("bind_address"));
        assert!(message.contains("failure_threshold"));
        assert!(message.contains("heartbeat_timeout"));
    }
}
