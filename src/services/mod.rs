pub mod agent_factory;
pub mod agent_pool;
pub mod agent_registry;
pub mod health_monitor;
pub mod model_registry;
pub mod model_router;

pub use agent_factory::{AgentFactory, AgentHandle, CreateOptions, InstanceInfo, PoolStatistics};
pub use agent_pool::{AgentPoolManager, DEFAULT_POOL_SIZE};
pub use agent_registry::{AgentRegistry, RegistryStatistics};
pub use health_monitor::HealthMonitor;
pub use model_registry::{
    default_catalog, HealthSummary, ModelFilter, ModelRegistry, ModelRegistryStats, ProviderStats,
};
pub use model_router::{ModelRouter, RoutingStats};
