//! Agent factory.
//!
//! Turns registry blueprints into live, health-checked agent instances and
//! keeps the bookkeeping of every instance it handed out until the instance
//! is destroyed.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{merge_layers, AgentConfig, ConfigMap, DEFAULT_PRIORITY};
use crate::domain::ports::Agent;
use crate::services::agent_registry::AgentRegistry;

/// Steps `create_agent` performs besides construction and the health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateOptions {
    /// Reject configurations without a matching `agent_id` and a `name`
    pub validate: bool,
    /// Run the agent's `initialize` hook
    pub initialize: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            validate: true,
            initialize: true,
        }
    }
}

/// A live agent instance handed out by the factory.
#[derive(Clone)]
pub struct AgentHandle {
    pool_key: String,
    agent_id: String,
    instance_id: Uuid,
    agent: Arc<dyn Agent>,
}

impl AgentHandle {
    /// `"<agent_id>_<instance uuid>"`
    pub fn pool_key(&self) -> &str {
        &self.pool_key
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("pool_key", &self.pool_key)
            .field("agent_id", &self.agent_id)
            .finish_non_exhaustive()
    }
}

/// Snapshot of one tracked instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceInfo {
    pub pool_key: String,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
    /// Outcome of the latest health check, if any ran since creation
    pub healthy: Option<bool>,
}

/// Factory-wide instance counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolStatistics {
    pub total_instances: usize,
    pub healthy_instances: usize,
    pub unhealthy_instances: usize,
    /// Instance count per agent id
    pub instances_by_agent: BTreeMap<String, usize>,
    pub oldest_instance_age_secs: Option<f64>,
    pub average_instance_age_secs: Option<f64>,
}

struct TrackedInstance {
    handle: AgentHandle,
    created_at: DateTime<Utc>,
    healthy: Option<bool>,
}

/// Creates agent instances from the registry and tracks them.
pub struct AgentFactory {
    registry: Arc<AgentRegistry>,
    instances: RwLock<HashMap<String, TrackedInstance>>,
}

impl AgentFactory {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self {
            registry,
            instances: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Create, optionally validate and initialize, and health-check a new
    /// instance of `agent_id`.
    ///
    /// Configuration layers merge shallowly, later layers winning: built-in
    /// defaults, registry metadata, then `config`.
    pub async fn create_agent(
        &self,
        agent_id: &str,
        config: Option<&ConfigMap>,
        options: CreateOptions,
    ) -> DomainResult<AgentHandle> {
        let blueprint = self
            .registry
            .get(agent_id)
            .await
            .ok_or_else(|| DomainError::agent_not_found(agent_id))?;

        let mut merged = default_layer(agent_id);
        if let Some(metadata) = self.registry.get_metadata(agent_id).await {
            merge_layers(&mut merged, &metadata);
        }
        if let Some(config) = config {
            merge_layers(&mut merged, config);
        }

        if options.validate {
            validate_config(agent_id, &merged)?;
        }
        let agent_config = AgentConfig::from_map(merged)?;
        let agent = blueprint.construct(&agent_config)?;

        if options.initialize {
            if let Err(e) = agent.initialize().await {
                tracing::error!(agent_id = %agent_id, error = %e, "agent initialization failed");
                agent.cleanup().await;
                return Err(e);
            }
        }

        let health = agent.health_check().await;
        if !health.healthy {
            let message = health.message_or_default().to_string();
            tracing::warn!(agent_id = %agent_id, message = %message, "new agent instance is unhealthy");
            agent.cleanup().await;
            return Err(DomainError::HealthCheckFailed {
                id: agent_id.to_string(),
                message,
            });
        }

        let instance_id = Uuid::new_v4();
        let handle = AgentHandle {
            pool_key: format!("{agent_id}_{instance_id}"),
            agent_id: agent_id.to_string(),
            instance_id,
            agent,
        };
        self.instances.write().await.insert(
            handle.pool_key.clone(),
            TrackedInstance {
                handle: handle.clone(),
                created_at: Utc::now(),
                healthy: Some(true),
            },
        );

        tracing::info!(agent_id = %agent_id, pool_key = %handle.pool_key, "created agent instance");
        Ok(handle)
    }

    /// Reuse a healthy tracked instance of `agent_id`, destroying unhealthy
    /// ones on the way, or create a new one.
    pub async fn get_or_create_agent(
        &self,
        agent_id: &str,
        config: Option<&ConfigMap>,
    ) -> DomainResult<AgentHandle> {
        let candidates: Vec<AgentHandle> = {
            let instances = self.instances.read().await;
            let mut candidates: Vec<_> = instances
                .values()
                .filter(|tracked| tracked.handle.agent_id == agent_id)
                .map(|tracked| (tracked.created_at, tracked.handle.clone()))
                .collect();
            candidates.sort_by_key(|(created_at, _)| *created_at);
            candidates.into_iter().map(|(_, handle)| handle).collect()
        };

        for handle in candidates {
            if probe(&handle).await {
                self.record_health(&handle.pool_key, true).await;
                tracing::debug!(pool_key = %handle.pool_key, "reusing agent instance");
                return Ok(handle);
            }
            tracing::info!(pool_key = %handle.pool_key, "destroying unhealthy agent instance");
            self.destroy_agent(&handle).await;
        }

        self.create_agent(agent_id, config, CreateOptions::default())
            .await
    }

    /// Stop tracking the instance and run its cleanup hook.
    ///
    /// Returns `false` without side effects when the instance is not tracked,
    /// so destroying twice cleans up once.
    pub async fn destroy_agent(&self, handle: &AgentHandle) -> bool {
        let removed = self.instances.write().await.remove(&handle.pool_key);
        match removed {
            Some(tracked) => {
                tracked.handle.agent.cleanup().await;
                tracing::info!(pool_key = %handle.pool_key, "destroyed agent instance");
                true
            }
            None => false,
        }
    }

    /// Destroy every tracked instance. Returns how many were destroyed.
    pub async fn destroy_all_agents(&self) -> usize {
        let drained: Vec<TrackedInstance> = self.instances.write().await.drain().map(|(_, t)| t).collect();
        let count = drained.len();
        for tracked in drained {
            tracked.handle.agent.cleanup().await;
        }
        if count > 0 {
            tracing::info!(count, "destroyed all agent instances");
        }
        count
    }

    /// Health-check every tracked instance, keyed by pool key.
    ///
    /// A probe that panics counts as unhealthy; the batch continues.
    pub async fn health_check_all(&self) -> BTreeMap<String, bool> {
        let handles: Vec<AgentHandle> = self
            .instances
            .read()
            .await
            .values()
            .map(|tracked| tracked.handle.clone())
            .collect();

        let mut results = BTreeMap::new();
        for handle in handles {
            let healthy = probe(&handle).await;
            self.record_health(&handle.pool_key, healthy).await;
            results.insert(handle.pool_key, healthy);
        }
        results
    }

    /// Destroy every instance that fails its health check. Returns how many
    /// were destroyed.
    pub async fn cleanup_unhealthy_agents(&self) -> usize {
        let results = self.health_check_all().await;
        let unhealthy: Vec<AgentHandle> = {
            let instances = self.instances.read().await;
            results
                .iter()
                .filter(|(_, healthy)| !**healthy)
                .filter_map(|(key, _)| instances.get(key).map(|t| t.handle.clone()))
                .collect()
        };

        let mut destroyed = 0;
        for handle in unhealthy {
            if self.destroy_agent(&handle).await {
                destroyed += 1;
            }
        }
        if destroyed > 0 {
            tracing::info!(destroyed, "removed unhealthy agent instances");
        }
        destroyed
    }

    pub async fn list_instances(&self) -> Vec<InstanceInfo> {
        let mut infos: Vec<InstanceInfo> = self
            .instances
            .read()
            .await
            .values()
            .map(|tracked| InstanceInfo {
                pool_key: tracked.handle.pool_key.clone(),
                agent_id: tracked.handle.agent_id.clone(),
                created_at: tracked.created_at,
                healthy: tracked.healthy,
            })
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    pub async fn pool_statistics(&self) -> PoolStatistics {
        let instances = self.instances.read().await;
        let now = Utc::now();
        let mut stats = PoolStatistics {
            total_instances: instances.len(),
            ..PoolStatistics::default()
        };

        let mut ages = Vec::with_capacity(instances.len());
        for tracked in instances.values() {
            match tracked.healthy {
                Some(true) => stats.healthy_instances += 1,
                Some(false) => stats.unhealthy_instances += 1,
                None => {}
            }
            *stats
                .instances_by_agent
                .entry(tracked.handle.agent_id.clone())
                .or_default() += 1;
            ages.push((now - tracked.created_at).num_milliseconds() as f64 / 1_000.0);
        }

        if !ages.is_empty() {
            stats.oldest_instance_age_secs = ages.iter().copied().reduce(f64::max);
            stats.average_instance_age_secs = Some(ages.iter().sum::<f64>() / ages.len() as f64);
        }
        stats
    }

    async fn record_health(&self, pool_key: &str, healthy: bool) {
        if let Some(tracked) = self.instances.write().await.get_mut(pool_key) {
            tracked.healthy = Some(healthy);
        }
    }
}

fn default_layer(agent_id: &str) -> ConfigMap {
    let mut layer = ConfigMap::new();
    layer.insert("agent_id".into(), json!(agent_id));
    layer.insert("name".into(), json!(agent_id));
    layer.insert("enabled".into(), json!(true));
    layer.insert("priority".into(), json!(DEFAULT_PRIORITY));
    layer
}

fn validate_config(agent_id: &str, merged: &ConfigMap) -> DomainResult<()> {
    for field in ["agent_id", "name"] {
        let present = merged
            .get(field)
            .and_then(Value::as_str)
            .is_some_and(|value| !value.trim().is_empty());
        if !present {
            return Err(DomainError::config(format!(
                "missing required field '{field}' for agent '{agent_id}'"
            )));
        }
    }
    match merged.get("agent_id").and_then(Value::as_str) {
        Some(configured) if configured == agent_id => Ok(()),
        Some(configured) => Err(DomainError::config(format!(
            "agent_id mismatch: expected '{agent_id}', configuration says '{configured}'"
        ))),
        None => Err(DomainError::config(format!("missing agent_id for '{agent_id}'"))),
    }
}

/// Run one health probe, treating a panic as unhealthy.
async fn probe(handle: &AgentHandle) -> bool {
    match AssertUnwindSafe(handle.agent.health_check()).catch_unwind().await {
        Ok(status) => status.healthy,
        Err(_) => {
            tracing::error!(pool_key = %handle.pool_key, "health check panicked");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::agents::{mock_blueprint_with_state, MockState};
    use crate::domain::models::{
        AgentCapabilities, AgentContext, AgentResponse, AgentType, HealthStatus,
    };
    use crate::domain::ports::{AgentBlueprint, AgentDescriptor, AgentStream};
    use async_trait::async_trait;

    async fn factory_with(state: Arc<MockState>) -> AgentFactory {
        let registry = Arc::new(AgentRegistry::new());
        registry
            .register("mock", mock_blueprint_with_state(state), None, false)
            .await
            .unwrap();
        AgentFactory::new(registry)
    }

    #[tokio::test]
    async fn test_unregistered_id_is_not_found() {
        let factory = factory_with(MockState::new()).await;
        let err = factory
            .create_agent("ghost", None, CreateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_create_merges_layers_and_tracks_instance() {
        let factory = factory_with(MockState::new()).await;
        let config = json!({"name": "Custom", "answer": "merged"}).as_object().cloned().unwrap();

        let handle = factory
            .create_agent("mock", Some(&config), CreateOptions::default())
            .await
            .unwrap();
        assert!(handle.pool_key().starts_with("mock_"));
        assert_eq!(handle.agent().descriptor().name, "Custom");
        assert_eq!(handle.agent().descriptor().priority, DEFAULT_PRIORITY);

        let response = handle
            .agent()
            .execute("q", &AgentContext::new("t", "u", "s"))
            .await;
        assert_eq!(response.answer, "merged");
        assert_eq!(factory.pool_statistics().await.total_instances, 1);
    }

    #[tokio::test]
    async fn test_validation_rejects_mismatched_id() {
        let factory = factory_with(MockState::new()).await;
        let config = json!({"agent_id": "other"}).as_object().cloned().unwrap();

        let err = factory
            .create_agent("mock", Some(&config), CreateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidConfiguration(_)));

        let relaxed = CreateOptions {
            validate: false,
            initialize: true,
        };
        assert!(factory.create_agent("mock", Some(&config), relaxed).await.is_ok());
    }

    #[tokio::test]
    async fn test_unhealthy_new_instance_is_cleaned_up() {
        let state = MockState::new();
        state.set_healthy(false);
        let factory = factory_with(state.clone()).await;

        let err = factory
            .create_agent("mock", None, CreateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::HealthCheckFailed { .. }));
        assert_eq!(state.cleanups(), 1);
        assert_eq!(factory.pool_statistics().await.total_instances, 0);
    }

    #[tokio::test]
    async fn test_failed_initialize_propagates() {
        let factory = factory_with(MockState::new()).await;
        let config = json!({"initialize_error": "no credentials"}).as_object().cloned().unwrap();
        let err = factory
            .create_agent("mock", Some(&config), CreateOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no credentials"));
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_healthy_and_replaces_unhealthy() {
        let state = MockState::new();
        let factory = factory_with(state.clone()).await;

        let first = factory.get_or_create_agent("mock", None).await.unwrap();
        let again = factory.get_or_create_agent("mock", None).await.unwrap();
        assert_eq!(first.pool_key(), again.pool_key());

        state.set_healthy(false);
        assert!(factory.get_or_create_agent("mock", None).await.is_err());
        assert_eq!(state.cleanups(), 2);
        assert_eq!(factory.pool_statistics().await.total_instances, 0);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let state = MockState::new();
        let factory = factory_with(state.clone()).await;
        let handle = factory
            .create_agent("mock", None, CreateOptions::default())
            .await
            .unwrap();

        assert!(factory.destroy_agent(&handle).await);
        assert!(!factory.destroy_agent(&handle).await);
        assert_eq!(state.cleanups(), 1);
    }

    struct PanickingProbe {
        descriptor: AgentDescriptor,
        armed: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Agent for PanickingProbe {
        fn descriptor(&self) -> &AgentDescriptor {
            &self.descriptor
        }

        async fn execute(&self, _query: &str, _context: &AgentContext) -> AgentResponse {
            AgentResponse::completed(&self.descriptor.agent_id, AgentType::Mock, "", Utc::now())
        }

        fn execute_streaming(&self, _query: &str, _context: &AgentContext) -> AgentStream {
            AgentStream::failed("unsupported")
        }

        fn capabilities(&self) -> AgentCapabilities {
            AgentCapabilities::default()
        }

        async fn health_check(&self) -> HealthStatus {
            if self.armed.swap(true, std::sync::atomic::Ordering::SeqCst) {
                panic!("probe exploded");
            }
            HealthStatus::healthy("ok")
        }
    }

    #[tokio::test]
    async fn test_panicking_probe_counts_as_unhealthy() {
        let registry = Arc::new(AgentRegistry::new());
        registry
            .register(
                "fragile",
                AgentBlueprint::new(AgentType::Mock, AgentCapabilities::default(), |config| {
                    Ok(Arc::new(PanickingProbe {
                        descriptor: AgentDescriptor::from_config(config, AgentType::Mock),
                        armed: std::sync::atomic::AtomicBool::new(false),
                    }) as Arc<dyn Agent>)
                }),
                None,
                false,
            )
            .await
            .unwrap();
        registry
            .register("mock", mock_blueprint_with_state(MockState::new()), None, false)
            .await
            .unwrap();
        let factory = AgentFactory::new(registry);

        let fragile = factory
            .create_agent("fragile", None, CreateOptions::default())
            .await
            .unwrap();
        let steady = factory
            .create_agent("mock", None, CreateOptions::default())
            .await
            .unwrap();

        let results = factory.health_check_all().await;
        assert!(!results[fragile.pool_key()]);
        assert!(results[steady.pool_key()]);

        let stats = factory.pool_statistics().await;
        assert_eq!(stats.healthy_instances, 1);
        assert_eq!(stats.unhealthy_instances, 1);

        assert_eq!(factory.cleanup_unhealthy_agents().await, 1);
        assert_eq!(factory.list_instances().await.len(), 1);
    }
}
