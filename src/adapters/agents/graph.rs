//! Graph agent adapter.
//!
//! Wraps an externally owned [`GraphWorkflow`] and translates its state
//! snapshots into agent responses and stream chunks.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    AgentCapabilities, AgentConfig, AgentContext, AgentResponse, AgentStatus, AgentStreamChunk,
    AgentThought, AgentType, Citation, HealthStatus,
};
use crate::domain::ports::{
    Agent, AgentDescriptor, AgentStream, ChunkSink, GraphWorkflow, WorkflowInput, WorkflowState,
};
use crate::infrastructure::logging::scrub_secrets;

const NO_RESPONSE: &str = "No response generated";

/// Adapter-specific configuration keys.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphSettings {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_model() -> String {
    "gpt-4-turbo-preview".to_string()
}

const fn default_temperature() -> f32 {
    0.7
}

const fn default_max_iterations() -> u32 {
    10
}

struct GraphInner {
    descriptor: AgentDescriptor,
    settings: GraphSettings,
    workflow: Arc<dyn GraphWorkflow>,
}

/// Agent backed by a multi-step reasoning graph.
#[derive(Clone)]
pub struct GraphAgent {
    inner: Arc<GraphInner>,
}

impl GraphAgent {
    pub fn new(config: &AgentConfig, workflow: Arc<dyn GraphWorkflow>) -> DomainResult<Self> {
        let settings: GraphSettings = config.settings()?;
        tracing::info!(agent_id = %config.agent_id, model = %settings.model, "initialized graph agent");
        Ok(Self {
            inner: Arc::new(GraphInner {
                descriptor: AgentDescriptor::from_config(config, AgentType::Langgraph),
                settings,
                workflow,
            }),
        })
    }

    pub fn static_capabilities() -> AgentCapabilities {
        AgentCapabilities {
            supports_streaming: true,
            supports_tools: true,
            supports_memory: true,
            supports_multimodal: false,
            supports_rag: true,
            supports_code_execution: false,
            max_context_length: 8000,
            supported_file_types: ["pdf", "docx", "txt", "md"].map(String::from).to_vec(),
            ..AgentCapabilities::default()
        }
    }

    fn workflow_input(&self, query: &str, context: &AgentContext) -> WorkflowInput {
        let settings = &self.inner.settings;
        WorkflowInput {
            query: query.to_string(),
            tenant_id: context.tenant_id.clone(),
            user_id: context.user_id.clone(),
            session_id: context.session_id.clone(),
            conversation_history: context.conversation_history.clone(),
            document_ids: context.document_ids.clone(),
            model: settings.model.clone(),
            temperature: context.temperature.unwrap_or(settings.temperature),
            max_iterations: settings.max_iterations,
        }
    }

    fn to_response(&self, state: &WorkflowState, started_at: DateTime<Utc>) -> AgentResponse {
        let error = non_empty_str(state, "error");
        let current_step = state.get("current_step").and_then(Value::as_str);
        let status = if error.is_some() {
            AgentStatus::Failed
        } else if current_step == Some("timeout") {
            AgentStatus::Timeout
        } else {
            AgentStatus::Completed
        };

        let answer = non_empty_str(state, "final_response").unwrap_or(NO_RESPONSE);
        let citations = state
            .get("citations")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(citation_from).collect())
            .unwrap_or_default();
        let thoughts = string_list(state, "agent_thoughts")
            .into_iter()
            .map(|thought| AgentThought::new("reasoning", thought))
            .collect();

        let documents_retrieved = state
            .get("retrieved_documents")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        let reranked = state
            .get("reranked_documents")
            .is_some_and(|docs| !docs.is_null());

        let mut metadata = Map::new();
        metadata.insert(
            "query_intent".into(),
            state.get("query_intent").cloned().unwrap_or(Value::Null),
        );
        metadata.insert("documents_retrieved".into(), json!(documents_retrieved));
        metadata.insert("reranked".into(), json!(reranked));
        metadata.insert(
            "retry_count".into(),
            state.get("retry_count").cloned().unwrap_or(json!(0)),
        );
        metadata.insert("current_step".into(), json!(current_step));

        AgentResponse::completed(
            &self.inner.descriptor.agent_id,
            AgentType::Langgraph,
            answer,
            started_at,
        )
        .with_status(status)
        .with_citations(citations)
        .with_thoughts(thoughts)
        .with_tools_used(string_list(state, "tools_used"))
        .with_visualization(state.get("visualization_data").filter(|v| !v.is_null()).cloned())
        .with_metadata(metadata)
        .with_error(error.map(str::to_string))
    }

    async fn produce_stream(self, sink: ChunkSink, query: String, context: AgentContext) -> DomainResult<()> {
        let input = self.workflow_input(&query, &context);
        let mut states = self.inner.workflow.stream(input).await?;

        loop {
            let state = tokio::select! {
                state = states.recv() => state,
                () = sink.closed() => return Ok(()),
            };
            let Some(state) = state else { break };
            if let Some(chunk) = chunk_for_state(&state?) {
                if !sink.emit(chunk).await {
                    return Ok(());
                }
            }
            if sink.is_terminated() {
                return Ok(());
            }
        }

        sink.emit(AgentStreamChunk::completion().with_metadata("status", json!("completed")))
            .await;
        Ok(())
    }
}

/// Translate one graph state snapshot into a stream chunk.
///
/// An error wins over the step; steps without anything to show are skipped.
pub fn chunk_for_state(state: &WorkflowState) -> Option<AgentStreamChunk> {
    let step = state.get("current_step").and_then(Value::as_str).unwrap_or_default();

    let chunk = if let Some(error) = non_empty_str(state, "error") {
        AgentStreamChunk::error(error)
    } else {
        match step {
            "analyze" => AgentStreamChunk::thought("Analyzing query intent..."),
            "retrieve" => AgentStreamChunk::thought("Retrieving relevant documents..."),
            "rerank" => AgentStreamChunk::thought("Reranking documents for relevance..."),
            "respond" => match non_empty_str(state, "final_response")
                .or_else(|| non_empty_str(state, "draft_response"))
            {
                Some(text) => AgentStreamChunk::text(text),
                None => AgentStreamChunk::status("Processing: respond"),
            },
            "" => return None,
            other => AgentStreamChunk::status(format!("Processing: {other}")),
        }
    };

    Some(chunk.with_metadata("step", json!(step)))
}

fn non_empty_str<'a>(state: &'a WorkflowState, key: &str) -> Option<&'a str> {
    state
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn string_list(state: &WorkflowState, key: &str) -> Vec<String> {
    state
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn citation_from(value: &Value) -> Option<Citation> {
    let object = value.as_object()?;
    let text = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);
    Some(Citation {
        source: text("source").unwrap_or_else(|| "unknown".to_string()),
        content: text("content").unwrap_or_default(),
        relevance_score: object.get("relevance_score").and_then(Value::as_f64),
        metadata: object
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
    })
}

#[async_trait]
impl Agent for GraphAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.inner.descriptor
    }

    async fn execute(&self, query: &str, context: &AgentContext) -> AgentResponse {
        let started_at = Utc::now();
        let agent_id = &self.inner.descriptor.agent_id;
        tracing::info!(agent_id = %agent_id, tenant_id = %context.tenant_id, "executing graph agent");

        match self.inner.workflow.run(self.workflow_input(query, context)).await {
            Ok(state) => {
                let response = self.to_response(&state, started_at);
                tracing::info!(
                    agent_id = %agent_id,
                    status = response.status.as_str(),
                    execution_time = response.execution_time,
                    "graph run finished"
                );
                response
            }
            Err(e) => {
                let message = scrub_secrets(&e.to_string());
                tracing::error!(agent_id = %agent_id, error = %message, "graph run failed");
                AgentResponse::failed(agent_id, AgentType::Langgraph, message, started_at)
            }
        }
    }

    fn execute_streaming(&self, query: &str, context: &AgentContext) -> AgentStream {
        let agent = self.clone();
        let query = query.to_string();
        let context = context.clone();
        AgentStream::spawn(move |sink| agent.produce_stream(sink, query, context))
    }

    fn capabilities(&self) -> AgentCapabilities {
        Self::static_capabilities()
    }

    async fn health_check(&self) -> HealthStatus {
        if !self.inner.workflow.is_ready() {
            return HealthStatus::unhealthy("Agent graph not initialized");
        }
        HealthStatus::healthy("Graph agent is healthy")
            .with_detail("agent_id", json!(self.inner.descriptor.agent_id))
            .with_detail("model", json!(self.inner.settings.model))
            .with_detail("graph_initialized", json!(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::DomainError;
    use crate::domain::models::ChunkType;
    use tokio::sync::mpsc;

    struct ScriptedWorkflow {
        states: Vec<WorkflowState>,
        ready: bool,
    }

    fn state(value: Value) -> WorkflowState {
        match value {
            Value::Object(map) => map,
            _ => WorkflowState::new(),
        }
    }

    #[async_trait]
    impl GraphWorkflow for ScriptedWorkflow {
        async fn run(&self, _input: WorkflowInput) -> DomainResult<WorkflowState> {
            self.states
                .last()
                .cloned()
                .ok_or_else(|| DomainError::backend("graph produced no state"))
        }

        async fn stream(
            &self,
            _input: WorkflowInput,
        ) -> DomainResult<mpsc::Receiver<DomainResult<WorkflowState>>> {
            let (tx, rx) = mpsc::channel(8);
            let states = self.states.clone();
            tokio::spawn(async move {
                for state in states {
                    if tx.send(Ok(state)).await.is_err() {
                        return;
                    }
                }
            });
            Ok(rx)
        }

        fn is_ready(&self) -> bool {
            self.ready
        }
    }

    fn agent(states: Vec<WorkflowState>, ready: bool) -> GraphAgent {
        GraphAgent::new(
            &AgentConfig::new("langgraph"),
            Arc::new(ScriptedWorkflow { states, ready }),
        )
        .unwrap()
    }

    fn context() -> AgentContext {
        AgentContext::new("tenant", "user", "session")
    }

    #[tokio::test]
    async fn test_terminal_state_maps_to_response() {
        let terminal = state(json!({
            "final_response": "AI is ...",
            "current_step": "respond",
            "citations": [{"source": "doc.pdf", "content": "excerpt", "relevance_score": 0.9}],
            "agent_thoughts": ["look up docs"],
            "tools_used": ["retriever"],
            "retrieved_documents": [{}, {}, {}],
            "reranked_documents": [{}],
            "query_intent": "definition",
            "retry_count": 1
        }));
        let response = agent(vec![terminal], true).execute("What is AI?", &context()).await;

        assert_eq!(response.status, AgentStatus::Completed);
        assert_eq!(response.answer, "AI is ...");
        assert_eq!(response.citations[0].source, "doc.pdf");
        assert_eq!(response.thoughts[0].step, "reasoning");
        assert_eq!(response.tools_used, vec!["retriever"]);
        assert_eq!(response.metadata["documents_retrieved"], 3);
        assert_eq!(response.metadata["reranked"], true);
        assert_eq!(response.metadata["query_intent"], "definition");
    }

    #[tokio::test]
    async fn test_error_takes_precedence_over_timeout() {
        let terminal = state(json!({"error": "retrieval failed", "current_step": "timeout"}));
        let response = agent(vec![terminal], true).execute("q", &context()).await;
        assert_eq!(response.status, AgentStatus::Failed);
        assert_eq!(response.error.as_deref(), Some("retrieval failed"));
        assert_eq!(response.answer, NO_RESPONSE);

        let timed_out = state(json!({"current_step": "timeout"}));
        let response = agent(vec![timed_out], true).execute("q", &context()).await;
        assert_eq!(response.status, AgentStatus::Timeout);
    }

    #[tokio::test]
    async fn test_run_failure_becomes_failed_response() {
        let response = agent(Vec::new(), true).execute("q", &context()).await;
        assert_eq!(response.status, AgentStatus::Failed);
        assert!(response.error.unwrap().contains("graph produced no state"));
    }

    #[tokio::test]
    async fn test_stream_translates_steps() {
        let states = vec![
            state(json!({"current_step": "analyze"})),
            state(json!({"current_step": "retrieve"})),
            state(json!({"current_step": "rerank"})),
            state(json!({"current_step": "grade"})),
            state(json!({"current_step": "respond", "draft_response": "draft"})),
        ];
        let chunks = agent(states, true)
            .execute_streaming("q", &context())
            .collect_chunks()
            .await;

        let kinds: Vec<_> = chunks.iter().map(|c| c.chunk_type).collect();
        assert_eq!(
            kinds,
            vec![
                ChunkType::Thought,
                ChunkType::Thought,
                ChunkType::Thought,
                ChunkType::Status,
                ChunkType::Text,
                ChunkType::Completion,
            ]
        );
        assert_eq!(chunks[3].content, "Processing: grade");
        assert_eq!(chunks[4].content, "draft");
    }

    #[tokio::test]
    async fn test_stream_error_state_terminates() {
        let states = vec![
            state(json!({"current_step": "analyze"})),
            state(json!({"current_step": "retrieve", "error": "index offline"})),
            state(json!({"current_step": "respond", "final_response": "never"})),
        ];
        let chunks = agent(states, true)
            .execute_streaming("q", &context())
            .collect_chunks()
            .await;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].chunk_type, ChunkType::Error);
        assert_eq!(chunks[1].content, "index offline");
    }

    #[test]
    fn test_state_without_step_is_skipped() {
        assert!(chunk_for_state(&WorkflowState::new()).is_none());
    }

    #[tokio::test]
    async fn test_health_follows_readiness() {
        assert!(agent(Vec::new(), true).health_check().await.healthy);
        assert!(!agent(Vec::new(), false).health_check().await.healthy);
    }
}
