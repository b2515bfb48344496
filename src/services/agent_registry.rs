//! Agent registry.
//!
//! The [`AgentRegistry`] maps agent ids to blueprints and their registry
//! metadata (type, capabilities, enabled flag, priority, adapter settings).
//! It is constructed explicitly and shared through an `Arc`; every
//! check-then-act happens under one write lock.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::adapters::agents::AdapterCatalog;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AgentCapabilities, AgentType, ConfigMap, DEFAULT_PRIORITY};
use crate::domain::ports::AgentBlueprint;

/// Registry counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStatistics {
    pub total_agents: usize,
    pub enabled_agents: usize,
    /// Agent count per adapter type
    pub agent_types: BTreeMap<String, usize>,
    /// Agent count per enabled capability flag
    pub capabilities: BTreeMap<String, usize>,
}

#[derive(Debug, Clone)]
struct RegisteredAgent {
    blueprint: AgentBlueprint,
    capabilities: AgentCapabilities,
    metadata: ConfigMap,
}

impl RegisteredAgent {
    fn enabled(&self) -> bool {
        self.metadata
            .get("enabled")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    fn priority(&self) -> i64 {
        self.metadata
            .get("priority")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_PRIORITY)
    }
}

#[derive(Default)]
struct RegistryState {
    agents: BTreeMap<String, RegisteredAgent>,
    initialized: bool,
}

/// Central table of registered agent blueprints.
#[derive(Default)]
pub struct AgentRegistry {
    state: RwLock<RegistryState>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `blueprint` under `agent_id`.
    ///
    /// The metadata is completed with the blueprint's `type` and capability
    /// snapshot when it does not declare them. A declared `type` that
    /// differs from the blueprint's adapter type is rejected.
    pub async fn register(
        &self,
        agent_id: &str,
        blueprint: AgentBlueprint,
        metadata: Option<ConfigMap>,
        override_existing: bool,
    ) -> DomainResult<()> {
        let mut metadata = metadata.unwrap_or_default();

        match metadata.get("type") {
            Some(Value::String(declared)) => {
                if AgentType::from_str(declared) != Some(blueprint.agent_type) {
                    return Err(DomainError::TypeMismatch {
                        id: agent_id.to_string(),
                        declared: declared.clone(),
                        actual: blueprint.agent_type.as_str().to_string(),
                    });
                }
            }
            Some(other) => {
                return Err(DomainError::config(format!(
                    "type of agent '{agent_id}' must be a string, got {other}"
                )));
            }
            None => {
                metadata.insert("type".into(), json!(blueprint.agent_type.as_str()));
            }
        }

        let capabilities = match metadata.get("capabilities") {
            Some(declared) => serde_json::from_value(declared.clone()).map_err(|e| {
                DomainError::config(format!("invalid capabilities for agent '{agent_id}': {e}"))
            })?,
            None => {
                metadata.insert("capabilities".into(), serde_json::to_value(&blueprint.capabilities)?);
                blueprint.capabilities.clone()
            }
        };

        let mut state = self.state.write().await;
        if state.agents.contains_key(agent_id) && !override_existing {
            return Err(DomainError::DuplicateRegistration {
                kind: "Agent",
                id: agent_id.to_string(),
            });
        }

        tracing::info!(
            agent_id = %agent_id,
            agent_type = blueprint.agent_type.as_str(),
            replaced = state.agents.contains_key(agent_id),
            "registered agent"
        );
        state.agents.insert(
            agent_id.to_string(),
            RegisteredAgent {
                blueprint,
                capabilities,
                metadata,
            },
        );
        Ok(())
    }

    /// Remove a registration. Returns whether it existed.
    pub async fn unregister(&self, agent_id: &str) -> bool {
        let removed = self.state.write().await.agents.remove(agent_id).is_some();
        if removed {
            tracing::info!(agent_id = %agent_id, "unregistered agent");
        }
        removed
    }

    pub async fn exists(&self, agent_id: &str) -> bool {
        self.state.read().await.agents.contains_key(agent_id)
    }

    pub async fn get(&self, agent_id: &str) -> Option<AgentBlueprint> {
        self.state
            .read()
            .await
            .agents
            .get(agent_id)
            .map(|agent| agent.blueprint.clone())
    }

    pub async fn get_metadata(&self, agent_id: &str) -> Option<ConfigMap> {
        self.state
            .read()
            .await
            .agents
            .get(agent_id)
            .map(|agent| agent.metadata.clone())
    }

    pub async fn get_all_metadata(&self) -> BTreeMap<String, ConfigMap> {
        self.state
            .read()
            .await
            .agents
            .iter()
            .map(|(id, agent)| (id.clone(), agent.metadata.clone()))
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.state.read().await.agents.len()
    }

    /// Registered ids in ascending order, optionally only enabled ones.
    pub async fn list_agents(&self, enabled_only: bool) -> Vec<String> {
        self.state
            .read()
            .await
            .agents
            .iter()
            .filter(|(_, agent)| !enabled_only || agent.enabled())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Ids of agents whose capability snapshot has `capability` set.
    pub async fn get_by_capability(&self, capability: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .agents
            .iter()
            .filter(|(_, agent)| agent.capabilities.has(capability))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn get_by_type(&self, agent_type: AgentType) -> Vec<String> {
        self.state
            .read()
            .await
            .agents
            .iter()
            .filter(|(_, agent)| agent.blueprint.agent_type == agent_type)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Enabled agent with every required capability and the lowest
    /// priority value. Ties go to the smallest id.
    pub async fn find_best_agent(&self, required_capabilities: &[String]) -> Option<String> {
        let state = self.state.read().await;
        state
            .agents
            .iter()
            .filter(|(_, agent)| agent.enabled())
            .filter(|(_, agent)| {
                required_capabilities
                    .iter()
                    .all(|capability| agent.capabilities.has(capability))
            })
            .min_by_key(|(_, agent)| agent.priority())
            .map(|(id, _)| id.clone())
    }

    pub async fn statistics(&self) -> RegistryStatistics {
        let state = self.state.read().await;
        let mut stats = RegistryStatistics {
            total_agents: state.agents.len(),
            ..RegistryStatistics::default()
        };

        for agent in state.agents.values() {
            if agent.enabled() {
                stats.enabled_agents += 1;
            }
            *stats
                .agent_types
                .entry(agent.blueprint.agent_type.as_str().to_string())
                .or_default() += 1;
            for flag in agent.capabilities.enabled_flags() {
                *stats.capabilities.entry(flag.to_string()).or_default() += 1;
            }
        }
        stats
    }

    /// Register the catalog adapters plus any configured agent that names a
    /// catalog adapter through its `type` key.
    ///
    /// Entries whose blueprint cannot be built, and ids that are already
    /// registered, are skipped. Only the first call has any effect.
    pub async fn initialize(&self, catalog: &AdapterCatalog, configured: &BTreeMap<String, ConfigMap>) {
        {
            let mut state = self.state.write().await;
            if state.initialized {
                tracing::warn!("agent registry already initialized");
                return;
            }
            state.initialized = true;
        }

        let by_type: HashMap<AgentType, _> = catalog
            .entries()
            .iter()
            .map(|entry| (entry.agent_type, *entry))
            .collect();

        let mut plan: Vec<(String, _)> = catalog
            .entries()
            .iter()
            .map(|entry| (entry.agent_id.to_string(), *entry))
            .collect();
        for (agent_id, metadata) in configured {
            if plan.iter().any(|(id, _)| id == agent_id) {
                continue;
            }
            let entry = metadata
                .get("type")
                .and_then(Value::as_str)
                .and_then(AgentType::from_str)
                .and_then(|agent_type| by_type.get(&agent_type));
            match entry {
                Some(entry) => plan.push((agent_id.clone(), *entry)),
                None => tracing::warn!(
                    agent_id = %agent_id,
                    "configured agent does not name a known adapter type, skipping"
                ),
            }
        }

        for (agent_id, entry) in plan {
            if self.exists(&agent_id).await {
                tracing::debug!(agent_id = %agent_id, "already registered, skipping catalog entry");
                continue;
            }
            let metadata = configured.get(&agent_id).cloned().unwrap_or_default();
            let blueprint = match catalog.build(&entry, &metadata) {
                Ok(blueprint) => blueprint,
                Err(e) => {
                    tracing::warn!(agent_id = %agent_id, error = %e, "adapter unavailable, skipping");
                    continue;
                }
            };
            if let Err(e) = self.register(&agent_id, blueprint, Some(metadata), false).await {
                tracing::error!(agent_id = %agent_id, error = %e, "failed to register agent");
            }
        }

        let stats = self.statistics().await;
        tracing::info!(
            total_agents = stats.total_agents,
            enabled_agents = stats.enabled_agents,
            "agent registry initialized"
        );
    }

    #[cfg(test)]
    pub(crate) async fn clear(&self) {
        let mut state = self.state.write().await;
        state.agents.clear();
        state.initialized = false;
    }
}
