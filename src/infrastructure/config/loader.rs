use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;
use crate::domain::models::ProviderKind;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid pool_size: {0}. Must be at least 1")]
    InvalidPoolSize(usize),

    #[error("Invalid health interval: {0}s. Must be at least 1")]
    InvalidHealthInterval(u64),

    #[error("Invalid cost ceiling: {0}. Must be positive")]
    InvalidCostCeiling(f64),

    #[error("Invalid cost weight: {0}. Must be between 0 and 1")]
    InvalidCostWeight(f64),

    #[error("Unknown provider in router credentials: {0}")]
    UnknownProvider(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .maestro/config.yaml (project config)
    /// 3. .maestro/local.yaml (project local overrides, optional)
    /// 4. Environment variables (MAESTRO_* prefix, `__` separates sections)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".maestro/config.yaml"))
            .merge(Yaml::file(".maestro/local.yaml"))
            .merge(Env::prefixed("MAESTRO_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honoring environment overrides
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("MAESTRO_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.pool.pool_size == 0 {
            return Err(ConfigError::InvalidPoolSize(config.pool.pool_size));
        }

        if config.health.interval_secs == 0 {
            return Err(ConfigError::InvalidHealthInterval(config.health.interval_secs));
        }
        if config.health.retry_secs == 0 {
            return Err(ConfigError::InvalidHealthInterval(config.health.retry_secs));
        }

        if config.router.cost_ceiling_per_1k <= 0.0 {
            return Err(ConfigError::InvalidCostCeiling(config.router.cost_ceiling_per_1k));
        }
        if !(0.0..=1.0).contains(&config.router.cost_weight) {
            return Err(ConfigError::InvalidCostWeight(config.router.cost_weight));
        }

        if let Some(unknown) = config
            .router
            .credentials
            .keys()
            .find(|name| ProviderKind::from_str(name).is_none())
        {
            return Err(ConfigError::UnknownProvider(unknown.clone()));
        }

        for (primary, fallbacks) in &config.router.fallbacks {
            if fallbacks.iter().any(|fallback| fallback == primary) {
                return Err(ConfigError::ValidationFailed(format!(
                    "model '{primary}' lists itself as a fallback"
                )));
            }
        }

        for (agent_id, metadata) in &config.agents {
            if agent_id.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "agent id cannot be empty".to_string(),
                ));
            }
            if let Some(declared) = metadata.get("agent_id").and_then(|v| v.as_str()) {
                if declared != agent_id {
                    return Err(ConfigError::ValidationFailed(format!(
                        "agent '{agent_id}' declares mismatching agent_id '{declared}'"
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::RoutingStrategy;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pool.pool_size, 5);
        assert_eq!(config.health.interval_secs, 300);
        assert_eq!(config.health.retry_secs, 60);
        assert_eq!(config.router.default_strategy, RoutingStrategy::Balanced);
        assert!(config.models.include_defaults);
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
logging:
  level: debug
  format: json
agents:
  n8n:
    webhook_url: http://localhost:5678/webhook/agent
    retry_count: 2
router:
  default_strategy: cost_optimized
  credentials:
    openai:
      api_key: sk-test
  fallbacks:
    openai:gpt-4:
      - anthropic:claude-3-sonnet-20240229
pool:
  pool_size: 2
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.router.default_strategy, RoutingStrategy::CostOptimized);
        assert_eq!(config.pool.pool_size, 2);
        assert_eq!(
            config.agents["n8n"]["webhook_url"],
            "http://localhost:5678/webhook/agent"
        );
        assert_eq!(
            config.router.fallbacks["openai:gpt-4"],
            vec!["anthropic:claude-3-sonnet-20240229".to_string()]
        );
        ConfigLoader::validate(&config).expect("parsed config should be valid");
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(_))
        ));

        let mut config = Config::default();
        config.pool.pool_size = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidPoolSize(0))
        ));

        let mut config = Config::default();
        config
            .router
            .credentials
            .insert("skynet".to_string(), Default::default());
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::UnknownProvider(_))
        ));

        let mut config = Config::default();
        config.router.fallbacks.insert(
            "openai:gpt-4".to_string(),
            vec!["openai:gpt-4".to_string()],
        );
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::ValidationFailed(_))
        ));
    }
}
