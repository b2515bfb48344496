//! Per-instance agent configuration.
//!
//! Configuration travels as a JSON object so each layer (factory defaults,
//! registry metadata, caller overrides) can be merged shallowly before the
//! result is parsed into an [`AgentConfig`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::errors::{DomainError, DomainResult};

/// Untyped configuration layer.
pub type ConfigMap = Map<String, Value>;

/// Default priority for agents that do not declare one. Lower wins.
pub const DEFAULT_PRIORITY: i64 = 999;

/// Configuration of one agent instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: String,
    pub name: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_priority")]
    pub priority: i64,
    /// Adapter-specific keys (`webhook_url`, `model`, `tools`, ...)
    #[serde(flatten)]
    pub extra: ConfigMap,
}

const fn default_enabled() -> bool {
    true
}

const fn default_priority() -> i64 {
    DEFAULT_PRIORITY
}

impl AgentConfig {
    pub fn new(agent_id: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        Self {
            name: agent_id.clone(),
            agent_id,
            agent_type: None,
            enabled: true,
            priority: DEFAULT_PRIORITY,
            extra: ConfigMap::new(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Parse a merged configuration map.
    pub fn from_map(map: ConfigMap) -> DomainResult<Self> {
        serde_json::from_value(Value::Object(map))
            .map_err(|e| DomainError::config(format!("malformed agent configuration: {e}")))
    }

    /// Deserialize the adapter-specific keys into a typed settings struct.
    pub fn settings<T: DeserializeOwned>(&self) -> DomainResult<T> {
        serde_json::from_value(Value::Object(self.extra.clone())).map_err(|e| {
            DomainError::config(format!("invalid settings for agent '{}': {e}", self.agent_id))
        })
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

/// Shallow merge: keys from `overlay` replace keys in `base`.
pub fn merge_layers(base: &mut ConfigMap, overlay: &ConfigMap) {
    for (key, value) in overlay {
        base.insert(key.clone(), value.clone());
    }
}
