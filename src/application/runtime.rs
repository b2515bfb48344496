//! Application runtime
//!
//! Wires the agent and model services from a loaded [`Config`] and owns
//! their start/stop lifecycle.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::adapters::agents::{AdapterCatalog, AdapterDeps};
use crate::domain::models::Config;
use crate::services::{
    AgentFactory, AgentPoolManager, AgentRegistry, ModelRegistry, ModelRouter,
};

/// Runtime lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Stopped,
    Running,
}

/// The assembled orchestration services.
///
/// # Example
///
/// ```rust,no_run
/// use maestro::application::Maestro;
/// use maestro::domain::models::Config;
///
/// # async fn example() -> anyhow::Result<()> {
/// let maestro = Maestro::new(Config::default())?;
/// maestro.start().await?;
///
/// let handle = maestro.pool().get_agent("mock", None).await?;
/// maestro.pool().return_agent(handle).await;
///
/// maestro.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct Maestro {
    config: Config,
    catalog: AdapterCatalog,
    agent_registry: Arc<AgentRegistry>,
    factory: Arc<AgentFactory>,
    pool: Arc<AgentPoolManager>,
    model_registry: Arc<ModelRegistry>,
    router: Arc<ModelRouter>,
    state: RwLock<RuntimeState>,
}

impl Maestro {
    /// Build the services with HTTP-backed providers.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_deps(config, AdapterDeps::default())
    }

    /// Build the services around caller-supplied adapter dependencies.
    ///
    /// Router credentials are layered under any credentials already present
    /// in `deps`.
    pub fn with_deps(config: Config, deps: AdapterDeps) -> Result<Self> {
        crate::infrastructure::config::ConfigLoader::validate(&config)
            .context("Invalid maestro configuration")?;

        let mut credentials = config.router.credentials.clone();
        credentials.extend(deps.credentials.clone());
        let providers = Arc::clone(&deps.providers);
        let catalog = AdapterCatalog::builtin(deps.with_credentials(credentials));

        let agent_registry = Arc::new(AgentRegistry::new());
        let factory = Arc::new(AgentFactory::new(Arc::clone(&agent_registry)));
        let pool = Arc::new(AgentPoolManager::new(Arc::clone(&factory), config.pool.pool_size));

        let models = if config.models.include_defaults {
            ModelRegistry::with_default_catalog()
        } else {
            ModelRegistry::new()
        };
        let model_registry = Arc::new(
            models
                .with_models(config.models.catalog.clone())
                .with_speed_tiers(config.router.speed_tiers.clone())
                .with_health_config(&config.health),
        );
        let router = Arc::new(ModelRouter::new(
            Arc::clone(&model_registry),
            providers,
            config.router.clone(),
        ));

        Ok(Self {
            config,
            catalog,
            agent_registry,
            factory,
            pool,
            model_registry,
            router,
            state: RwLock::new(RuntimeState::Stopped),
        })
    }

    /// Register the adapters, warm up the configured pools and start model
    /// health monitoring. Does nothing when already running.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if *state == RuntimeState::Running {
            return Ok(());
        }

        info!("Starting maestro");

        self.agent_registry
            .initialize(&self.catalog, &self.config.agents)
            .await;

        for (agent_id, count) in &self.config.pool.warm_up {
            let pooled = self.pool.warm_up(agent_id, *count).await;
            if pooled < *count {
                warn!(agent_id = %agent_id, requested = count, pooled, "pool warm-up incomplete");
            }
        }

        if self.config.health.enabled {
            self.model_registry.start_health_monitoring().await;
        }

        *state = RuntimeState::Running;
        info!(
            agents = self.agent_registry.count().await,
            models = self.model_registry.count().await,
            "Maestro started"
        );
        Ok(())
    }

    /// Stop monitoring and release every agent instance.
    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        if *state == RuntimeState::Stopped {
            return;
        }

        info!("Stopping maestro");
        self.model_registry.stop_health_monitoring().await;
        let pooled = self.pool.cleanup().await;
        let remaining = self.factory.destroy_all_agents().await;

        *state = RuntimeState::Stopped;
        info!(pooled, remaining, "Maestro stopped");
    }

    pub async fn state(&self) -> RuntimeState {
        *self.state.read().await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn agent_registry(&self) -> &Arc<AgentRegistry> {
        &self.agent_registry
    }

    pub fn factory(&self) -> &Arc<AgentFactory> {
        &self.factory
    }

    pub fn pool(&self) -> &Arc<AgentPoolManager> {
        &self.pool
    }

    pub fn model_registry(&self) -> &Arc<ModelRegistry> {
        &self.model_registry
    }

    pub fn router(&self) -> &Arc<ModelRouter> {
        &self.router
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::providers::MockProviderFactory;
    use crate::domain::models::HealthConfig;

    fn deps() -> AdapterDeps {
        AdapterDeps::new(reqwest::Client::new(), Arc::new(MockProviderFactory::new()))
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.health = HealthConfig {
            enabled: false,
            ..HealthConfig::default()
        };
        config
    }

    #[tokio::test]
    async fn test_start_registers_catalog_and_warms_pool() {
        let mut config = config();
        config.pool.warm_up.insert("mock".to_string(), 2);

        let maestro = Maestro::with_deps(config, deps()).unwrap();
        maestro.start().await.unwrap();

        assert_eq!(maestro.state().await, RuntimeState::Running);
        assert!(maestro.agent_registry().exists("mock").await);
        assert!(maestro.agent_registry().exists("langchain").await);
        // no graph workflow supplied
        assert!(!maestro.agent_registry().exists("langgraph").await);
        assert_eq!(maestro.pool().pooled_counts().await["mock"], 2);
        assert_eq!(maestro.model_registry().count().await, 6);

        maestro.stop().await;
        assert_eq!(maestro.state().await, RuntimeState::Stopped);
        assert_eq!(maestro.factory().pool_statistics().await.total_instances, 0);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = config();
        config.pool.pool_size = 0;
        assert!(Maestro::with_deps(config, deps()).is_err());
    }

    #[tokio::test]
    async fn test_catalog_without_defaults() {
        let mut config = config();
        config.models.include_defaults = false;
        let maestro = Maestro::with_deps(config, deps()).unwrap();
        assert_eq!(maestro.model_registry().count().await, 0);
    }
}
