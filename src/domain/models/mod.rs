pub mod agent;
pub mod agent_config;
pub mod config;
pub mod model;
pub mod routing;

pub use agent::{
    AgentCapabilities, AgentContext, AgentResponse, AgentStatus, AgentStreamChunk, AgentThought,
    AgentType, ChunkType, Citation, ConversationTurn, HealthStatus, ERROR_ANSWER_PREFIX,
};
pub use agent_config::{merge_layers, AgentConfig, ConfigMap, DEFAULT_PRIORITY};
pub use config::{
    apply_credentials, Config, HealthConfig, LoggingConfig, ModelsConfig, PoolConfig, ProviderCredentials,
    RouterSettings,
};
pub use model::{
    model_id, ChatMessage, GenerationParams, ModelCapabilities, ModelCapability, ModelConfig,
    ModelInfo, ModelResponse, ProviderKind, RetryConfig, Role, StreamChunk, TokenUsage, ToolCall,
    ToolSpec, UNAVAILABLE_AFTER_FAILURES,
};
pub use routing::{RankingTable, RoutingContext, RoutingStrategy};
