use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::agent_config::ConfigMap;
use super::model::{ModelConfig, ModelInfo};
use super::routing::{RankingTable, RoutingStrategy};

/// Main configuration structure for maestro
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Registry metadata per agent id (e.g. `n8n.webhook_url`)
    #[serde(default)]
    pub agents: BTreeMap<String, ConfigMap>,

    /// Model catalog seeding
    #[serde(default)]
    pub models: ModelsConfig,

    /// Model routing configuration
    #[serde(default)]
    pub router: RouterSettings,

    /// Agent pooling configuration
    #[serde(default)]
    pub pool: PoolConfig,

    /// Model health monitoring configuration
    #[serde(default)]
    pub health: HealthConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Rotation for file output: daily, hourly, never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Model catalog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ModelsConfig {
    /// Seed the registry with the built-in OpenAI and Anthropic models
    #[serde(default = "default_true")]
    pub include_defaults: bool,

    /// Additional catalog entries
    #[serde(default)]
    pub catalog: Vec<ModelInfo>,
}

const fn default_true() -> bool {
    true
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            include_defaults: true,
            catalog: Vec::new(),
        }
    }
}

/// Credentials and endpoint for one provider family
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProviderCredentials {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
}

impl ProviderCredentials {
    /// Fill the unset connection fields of `config`. A missing API key falls
    /// back to the provider's conventional environment variable.
    pub fn apply_to(&self, config: &mut ModelConfig) {
        if config.api_key.is_none() {
            config.api_key = self.api_key.clone().or_else(|| {
                config
                    .provider
                    .api_key_env_var()
                    .and_then(|var| std::env::var(var).ok())
                    .filter(|key| !key.is_empty())
            });
        }
        if config.api_base.is_none() {
            config.api_base.clone_from(&self.api_base);
        }
        if config.organization_id.is_none() {
            config.organization_id.clone_from(&self.organization_id);
        }
    }
}

/// Apply the credentials configured for `config.provider`, if any, then the
/// environment fallback.
pub fn apply_credentials(
    credentials: &BTreeMap<String, ProviderCredentials>,
    config: &mut ModelConfig,
) {
    credentials
        .get(config.provider.as_str())
        .cloned()
        .unwrap_or_default()
        .apply_to(config);
}

/// Router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RouterSettings {
    /// Strategy used when a request does not name one
    #[serde(default)]
    pub default_strategy: RoutingStrategy,

    /// Credentials keyed by provider name (`openai`, `anthropic`, ...)
    #[serde(default)]
    pub credentials: BTreeMap<String, ProviderCredentials>,

    /// Ordered fallback model ids keyed by primary model id
    #[serde(default)]
    pub fallbacks: BTreeMap<String, Vec<String>>,

    /// Average price per 1k tokens at which the balanced cost term saturates
    #[serde(default = "default_cost_ceiling")]
    pub cost_ceiling_per_1k: f64,

    /// Weight of the cost term in the balanced score; quality gets the rest
    #[serde(default = "default_cost_weight")]
    pub cost_weight: f64,

    /// Speed tiers (lower is faster)
    #[serde(default = "default_speed_tiers")]
    pub speed_tiers: RankingTable<u32>,

    /// Quality tiers (lower is better)
    #[serde(default = "default_quality_tiers")]
    pub quality_tiers: RankingTable<u32>,
}

const fn default_cost_ceiling() -> f64 {
    0.10
}

const fn default_cost_weight() -> f64 {
    0.4
}

fn default_speed_tiers() -> RankingTable<u32> {
    RankingTable::<u32>::speed_tiers()
}

fn default_quality_tiers() -> RankingTable<u32> {
    RankingTable::<u32>::quality_tiers()
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            default_strategy: RoutingStrategy::default(),
            credentials: BTreeMap::new(),
            fallbacks: BTreeMap::new(),
            cost_ceiling_per_1k: default_cost_ceiling(),
            cost_weight: default_cost_weight(),
            speed_tiers: default_speed_tiers(),
            quality_tiers: default_quality_tiers(),
        }
    }
}

/// Agent pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PoolConfig {
    /// Maximum idle instances kept per agent id
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Agent ids to pre-create on startup, with instance counts
    #[serde(default)]
    pub warm_up: BTreeMap<String, usize>,
}

const fn default_pool_size() -> usize {
    5
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            warm_up: BTreeMap::new(),
        }
    }
}

/// Model health monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthConfig {
    /// Start background monitoring with the application
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between health check cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Seconds to wait after a cycle fails unexpectedly
    #[serde(default = "default_retry_secs")]
    pub retry_secs: u64,
}

const fn default_interval_secs() -> u64 {
    300
}

const fn default_retry_secs() -> u64 {
    60
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            retry_secs: default_retry_secs(),
        }
    }
}
