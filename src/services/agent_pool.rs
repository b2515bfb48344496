//! Agent pool manager.
//!
//! Keeps up to `pool_size` idle instances per agent id on top of the
//! [`AgentFactory`], handing them out and taking them back.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::domain::errors::DomainResult;
use crate::domain::models::ConfigMap;
use crate::services::agent_factory::{AgentFactory, AgentHandle, CreateOptions};

/// Default number of idle instances kept per agent id.
pub const DEFAULT_POOL_SIZE: usize = 5;

/// Per-id free lists of ready agent instances.
pub struct AgentPoolManager {
    factory: Arc<AgentFactory>,
    pool_size: usize,
    pools: Mutex<HashMap<String, VecDeque<AgentHandle>>>,
}

impl AgentPoolManager {
    pub fn new(factory: Arc<AgentFactory>, pool_size: usize) -> Self {
        Self {
            factory,
            pool_size,
            pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_size(factory: Arc<AgentFactory>) -> Self {
        Self::new(factory, DEFAULT_POOL_SIZE)
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn factory(&self) -> &Arc<AgentFactory> {
        &self.factory
    }

    /// Take an idle instance of `agent_id`, or create one.
    ///
    /// The popped instance is health-checked after it left the pool; an
    /// unhealthy one is destroyed and replaced by a fresh instance.
    pub async fn get_agent(&self, agent_id: &str, config: Option<&ConfigMap>) -> DomainResult<AgentHandle> {
        let pooled = self
            .pools
            .lock()
            .await
            .get_mut(agent_id)
            .and_then(VecDeque::pop_front);

        if let Some(handle) = pooled {
            if handle.agent().health_check().await.healthy {
                tracing::debug!(pool_key = %handle.pool_key(), "handing out pooled agent");
                return Ok(handle);
            }
            tracing::info!(pool_key = %handle.pool_key(), "pooled agent unhealthy, replacing");
            self.factory.destroy_agent(&handle).await;
        }

        self.factory
            .create_agent(agent_id, config, CreateOptions::default())
            .await
    }

    /// Give an instance back. Returns `false` when the pool for its id is
    /// full and the instance was destroyed instead.
    pub async fn return_agent(&self, handle: AgentHandle) -> bool {
        {
            let mut pools = self.pools.lock().await;
            let pool = pools.entry(handle.agent_id().to_string()).or_default();
            if pool.len() < self.pool_size {
                pool.push_back(handle);
                return true;
            }
        }

        tracing::debug!(pool_key = %handle.pool_key(), "pool full, destroying returned agent");
        self.factory.destroy_agent(&handle).await;
        false
    }

    /// Pre-create `count` instances of `agent_id` into the pool.
    ///
    /// Failures are logged and skipped. Returns how many instances were
    /// pooled.
    pub async fn warm_up(&self, agent_id: &str, count: usize) -> usize {
        let mut pooled = 0;
        for _ in 0..count {
            match self
                .factory
                .create_agent(agent_id, None, CreateOptions::default())
                .await
            {
                Ok(handle) => {
                    if self.return_agent(handle).await {
                        pooled += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(agent_id = %agent_id, error = %e, "warm-up instance failed");
                }
            }
        }
        tracing::info!(agent_id = %agent_id, requested = count, pooled, "pool warmed up");
        pooled
    }

    /// Idle instance count per agent id.
    pub async fn pooled_counts(&self) -> BTreeMap<String, usize> {
        self.pools
            .lock()
            .await
            .iter()
            .map(|(id, pool)| (id.clone(), pool.len()))
            .collect()
    }

    /// Destroy every pooled instance. Returns how many were destroyed.
    pub async fn cleanup(&self) -> usize {
        let drained: Vec<AgentHandle> = self
            .pools
            .lock()
            .await
            .drain()
            .flat_map(|(_, pool)| pool)
            .collect();

        let mut destroyed = 0;
        for handle in drained {
            if self.factory.destroy_agent(&handle).await {
                destroyed += 1;
            }
        }
        tracing::info!(destroyed, "agent pool cleaned up");
        destroyed
    }
}
