//! Graph workflow port - narrow interface to an externally owned
//! multi-step reasoning graph (analyze, retrieve, rerank, respond).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::domain::errors::DomainResult;
use crate::domain::models::ConversationTurn;

/// Snapshot of the graph state: keys such as `final_response`,
/// `current_step`, `citations`, `agent_thoughts`, `error`.
pub type WorkflowState = Map<String, Value>;

/// Input handed to a graph run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInput {
    pub query: String,
    pub tenant_id: String,
    pub user_id: String,
    pub session_id: String,
    pub conversation_history: Vec<ConversationTurn>,
    pub document_ids: Option<Vec<String>>,
    pub model: String,
    pub temperature: f32,
    pub max_iterations: u32,
}

#[async_trait]
pub trait GraphWorkflow: Send + Sync {
    /// Run the graph to its terminal state.
    async fn run(&self, input: WorkflowInput) -> DomainResult<WorkflowState>;

    /// Run the graph, yielding the state after each step.
    async fn stream(
        &self,
        input: WorkflowInput,
    ) -> DomainResult<mpsc::Receiver<DomainResult<WorkflowState>>>;

    /// Whether the graph is compiled and ready to run.
    fn is_ready(&self) -> bool {
        true
    }
}
