pub mod agent;
pub mod graph_workflow;
pub mod model_provider;

pub use agent::{
    Agent, AgentBlueprint, AgentConstructor, AgentDescriptor, AgentStream, ChunkSink, STREAM_BUFFER,
};
pub use graph_workflow::{GraphWorkflow, WorkflowInput, WorkflowState};
pub use model_provider::{approximate_tokens, ModelProvider, ModelStream, ProviderFactory};
