//! Executor agent adapter.
//!
//! Runs a tool-calling loop against a model provider: the model either
//! answers directly or requests built-in tools, whose observations are fed
//! back until it produces a final answer.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map};

use super::tools::BuiltinTool;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    apply_credentials, AgentCapabilities, AgentConfig, AgentContext, AgentResponse,
    AgentStreamChunk, AgentThought, AgentType, ChatMessage, GenerationParams, HealthStatus,
    ModelCapabilities, ModelConfig, ProviderCredentials, ProviderKind,
};
use crate::domain::ports::{Agent, AgentDescriptor, AgentStream, ChunkSink, ModelProvider, ProviderFactory};
use crate::infrastructure::logging::scrub_secrets;

const SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant. Use the available tools to answer questions accurately.";
const ITERATION_LIMIT_ANSWER: &str = "Agent stopped due to iteration limit or time limit.";

/// Adapter-specific configuration keys.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSettings {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_provider() -> String {
    "openai".to_string()
}

const fn default_temperature() -> f32 {
    0.7
}

const fn default_max_tokens() -> u32 {
    2000
}

const fn default_max_iterations() -> u32 {
    10
}

/// Result of one agent run before it is mapped onto a response.
struct RunOutcome {
    answer: String,
    thoughts: Vec<AgentThought>,
    tools_used: Vec<String>,
    tokens_used: Option<u64>,
}

struct ExecutorInner {
    descriptor: AgentDescriptor,
    settings: ExecutorSettings,
    tools: Vec<BuiltinTool>,
    provider: Arc<dyn ModelProvider>,
}

/// Agent that drives a model directly, optionally with tools.
#[derive(Clone)]
pub struct ExecutorAgent {
    inner: Arc<ExecutorInner>,
}

impl ExecutorAgent {
    pub fn new(
        config: &AgentConfig,
        providers: &dyn ProviderFactory,
        credentials: &BTreeMap<String, ProviderCredentials>,
    ) -> DomainResult<Self> {
        let settings: ExecutorSettings = config.settings()?;
        let provider_kind = ProviderKind::from_str(&settings.provider).ok_or_else(|| {
            DomainError::config(format!(
                "unknown provider '{}' for agent '{}'",
                settings.provider, config.agent_id
            ))
        })?;
        if settings.max_iterations == 0 {
            return Err(DomainError::config("max_iterations must be at least 1"));
        }
        let tools = BuiltinTool::resolve(&settings.tools);

        let mut model_config = ModelConfig::new(provider_kind, settings.model.clone())
            .with_temperature(settings.temperature)
            .with_max_tokens(settings.max_tokens);
        model_config.api_key.clone_from(&settings.api_key);
        model_config.api_base.clone_from(&settings.api_base);
        apply_credentials(credentials, &mut model_config);

        let model_capabilities = ModelCapabilities {
            supports_function_calling: !tools.is_empty(),
            ..ModelCapabilities::default()
        };
        let provider = providers.create(model_config, model_capabilities)?;

        tracing::info!(
            agent_id = %config.agent_id,
            model = %settings.model,
            tools = tools.len(),
            "initialized executor agent"
        );

        Ok(Self {
            inner: Arc::new(ExecutorInner {
                descriptor: AgentDescriptor::from_config(config, AgentType::Langchain),
                settings,
                tools,
                provider,
            }),
        })
    }

    /// Capability snapshot for an executor configured with or without tools.
    pub fn capabilities_for(has_tools: bool) -> AgentCapabilities {
        AgentCapabilities {
            supports_streaming: true,
            supports_tools: has_tools,
            supports_memory: true,
            supports_multimodal: false,
            supports_rag: false,
            supports_code_execution: false,
            max_context_length: 4096,
            ..AgentCapabilities::default()
        }
    }

    fn params(&self) -> GenerationParams {
        GenerationParams::default()
            .with_temperature(self.inner.settings.temperature)
            .with_max_tokens(self.inner.settings.max_tokens)
    }

    fn build_messages(&self, query: &str, context: &AgentContext, with_system: bool) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(context.conversation_history.len() + 2);
        if with_system {
            messages.push(ChatMessage::system(SYSTEM_PROMPT));
        }
        for turn in &context.conversation_history {
            match turn.role.as_str() {
                "user" => messages.push(ChatMessage::user(turn.content.clone())),
                "assistant" => messages.push(ChatMessage::assistant(turn.content.clone())),
                _ => {}
            }
        }
        messages.push(ChatMessage::user(query));
        messages
    }

    async fn run_direct(&self, query: &str, context: &AgentContext) -> DomainResult<RunOutcome> {
        let messages = self.build_messages(query, context, false);
        let response = self.inner.provider.generate(&messages, &self.params()).await?;
        Ok(RunOutcome {
            answer: response.content,
            thoughts: Vec::new(),
            tools_used: Vec::new(),
            tokens_used: response.usage.map(|u| u.total_tokens),
        })
    }

    async fn run_with_tools(&self, query: &str, context: &AgentContext) -> DomainResult<RunOutcome> {
        let inner = &self.inner;
        let params = self
            .params()
            .with_tools(inner.tools.iter().map(BuiltinTool::spec).collect());
        let mut messages = self.build_messages(query, context, true);
        let mut thoughts = Vec::new();
        let mut tools_used: Vec<String> = Vec::new();
        let mut tokens: Option<u64> = None;

        for _ in 0..inner.settings.max_iterations {
            let response = inner.provider.generate(&messages, &params).await?;
            if let Some(usage) = response.usage {
                *tokens.get_or_insert(0) += usage.total_tokens;
            }

            if response.tool_calls.is_empty() {
                return Ok(RunOutcome {
                    answer: response.content,
                    thoughts,
                    tools_used,
                    tokens_used: tokens,
                });
            }

            messages.push(ChatMessage::assistant_tool_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            for call in response.tool_calls {
                let observation = match BuiltinTool::from_str(&call.name)
                    .filter(|tool| inner.tools.contains(tool))
                {
                    Some(tool) => tool.invoke(&call.arguments),
                    None => format!("Error: {} is not a valid tool", call.name),
                };
                tracing::debug!(tool = %call.name, "tool invoked");

                thoughts.push(AgentThought::new(
                    format!("step_{}", thoughts.len() + 1),
                    format!(
                        "Tool: {}, Input: {}, Result: {observation}",
                        call.name, call.arguments
                    ),
                ));
                if !tools_used.contains(&call.name) {
                    tools_used.push(call.name.clone());
                }
                messages.push(ChatMessage::tool_result(call.id, observation));
            }
        }

        tracing::warn!(
            agent_id = %inner.descriptor.agent_id,
            max_iterations = inner.settings.max_iterations,
            "executor hit its iteration limit"
        );
        Ok(RunOutcome {
            answer: ITERATION_LIMIT_ANSWER.to_string(),
            thoughts,
            tools_used,
            tokens_used: tokens,
        })
    }

    async fn produce_stream(self, sink: ChunkSink, query: String, context: AgentContext) -> DomainResult<()> {
        let messages = self.build_messages(&query, &context, false);
        let mut rx = self
            .inner
            .provider
            .generate_stream(&messages, &self.params())
            .await?;

        loop {
            let chunk = tokio::select! {
                chunk = rx.recv() => chunk,
                () = sink.closed() => return Ok(()),
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;
            if !chunk.content.is_empty() && !sink.emit(AgentStreamChunk::text(chunk.content)).await {
                return Ok(());
            }
        }

        sink.emit(AgentStreamChunk::completion().with_metadata("status", json!("completed")))
            .await;
        Ok(())
    }
}

#[async_trait]
impl Agent for ExecutorAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.inner.descriptor
    }

    async fn execute(&self, query: &str, context: &AgentContext) -> AgentResponse {
        let started_at = Utc::now();
        let inner = &self.inner;
        tracing::info!(
            agent_id = %inner.descriptor.agent_id,
            tenant_id = %context.tenant_id,
            "executing executor agent"
        );

        let outcome = if inner.tools.is_empty() {
            self.run_direct(query, context).await
        } else {
            self.run_with_tools(query, context).await
        };

        match outcome {
            Ok(outcome) => {
                let mut metadata = Map::new();
                metadata.insert("model".into(), json!(inner.settings.model));
                metadata.insert("temperature".into(), json!(inner.settings.temperature));

                AgentResponse::completed(
                    &inner.descriptor.agent_id,
                    AgentType::Langchain,
                    outcome.answer,
                    started_at,
                )
                .with_thoughts(outcome.thoughts)
                .with_tools_used(outcome.tools_used)
                .with_tokens_used(outcome.tokens_used)
                .with_metadata(metadata)
            }
            Err(e) => {
                let message = scrub_secrets(&e.to_string());
                tracing::error!(agent_id = %inner.descriptor.agent_id, error = %message, "executor run failed");
                AgentResponse::failed(&inner.descriptor.agent_id, AgentType::Langchain, message, started_at)
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
        Self::capabilities_for(!self.inner.tools.is_empty())
    }

    async fn health_check(&self) -> HealthStatus {
        let inner = &self.inner;
        let probe = inner
            .provider
            .generate(&[ChatMessage::user("Hello")], &self.params())
            .await;

        match probe {
            Ok(response) if !response.content.is_empty() => {
                HealthStatus::healthy("Executor agent is healthy")
                    .with_detail("agent_id", json!(inner.descriptor.agent_id))
                    .with_detail("model", json!(inner.settings.model))
                    .with_detail("tools_count", json!(inner.tools.len()))
            }
            Ok(_) => HealthStatus::unhealthy("LLM returned empty response"),
            Err(e) => {
                let message = scrub_secrets(&e.to_string());
                tracing::error!(agent_id = %inner.descriptor.agent_id, error = %message, "health check failed");
                HealthStatus::unhealthy(format!("Health check failed: {message}"))
                    .with_detail("error", json!(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::providers::{MockProvider, MockProviderFactory};
    use crate::domain::models::{AgentStatus, ChunkType, ModelResponse, ToolCall};
    use serde_json::Value;

    fn config(extra: Value) -> AgentConfig {
        let mut config = AgentConfig::new("langchain");
        if let Value::Object(map) = extra {
            config.extra = map;
        }
        config
    }

    fn context() -> AgentContext {
        AgentContext::new("tenant", "user", "session")
    }

    fn scripted(extra: Value) -> (ExecutorAgent, Arc<MockProvider>) {
        let factory = MockProviderFactory::new();
        let provider = Arc::new(MockProvider::new(
            ModelConfig::new(ProviderKind::Ollama, "llama3"),
            ModelCapabilities::default(),
        ));
        factory.insert("ollama:llama3", provider.clone());
        let agent = ExecutorAgent::new(&config(extra), &factory, &BTreeMap::new()).unwrap();
        (agent, provider)
    }

    fn tool_call(id: &str, name: &str, arguments: Value) -> ModelResponse {
        let mut response = ModelResponse::new(ProviderKind::Ollama, "llama3", "");
        response.tool_calls = vec![ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }];
        response
    }

    #[test]
    fn test_settings_defaults() {
        let settings: ExecutorSettings = config(json!({})).settings().unwrap();
        assert_eq!(settings.model, "gpt-3.5-turbo");
        assert_eq!(settings.provider, "openai");
        assert_eq!(settings.max_tokens, 2000);
        assert_eq!(settings.max_iterations, 10);
        assert!(settings.tools.is_empty());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let result = ExecutorAgent::new(
            &config(json!({"provider": "acme"})),
            &MockProviderFactory::new(),
            &BTreeMap::new(),
        );
        assert!(matches!(result, Err(DomainError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_direct_invocation_without_tools() {
        let (agent, provider) = scripted(json!({"provider": "ollama", "model": "llama3"}));
        provider.push_text("Paris");

        let response = agent.execute("Capital of France?", &context()).await;
        assert_eq!(response.status, AgentStatus::Completed);
        assert_eq!(response.answer, "Paris");
        assert!(response.thoughts.is_empty());
        assert_eq!(response.metadata["model"], "llama3");
        assert!(!agent.capabilities().supports_tools);
    }

    #[tokio::test]
    async fn test_tool_loop_records_steps_and_dedups_tools() {
        let (agent, provider) = scripted(json!({
            "provider": "ollama",
            "model": "llama3",
            "tools": ["calculator", "search", "unknown"]
        }));
        provider.push_response(tool_call("1", "calculator", json!({"expression": "2+2"})));
        provider.push_response(tool_call("2", "calculator", json!({"expression": "4*10"})));
        provider.push_text("The answer is 40");

        let response = agent.execute("compute", &context()).await;
        assert_eq!(response.answer, "The answer is 40");
        assert_eq!(response.tools_used, vec!["calculator"]);
        assert_eq!(response.thoughts.len(), 2);
        assert_eq!(response.thoughts[0].step, "step_1");
        assert!(response.thoughts[1].thought.contains("Result: 40"));
        assert!(agent.capabilities().supports_tools);
    }

    #[tokio::test]
    async fn test_iteration_limit_stops_loop() {
        let (agent, provider) = scripted(json!({
            "provider": "ollama",
            "model": "llama3",
            "tools": ["search"],
            "max_iterations": 2
        }));
        for id in ["a", "b", "c"] {
            provider.push_response(tool_call(id, "search", json!({"query": "x"})));
        }

        let response = agent.execute("loop", &context()).await;
        assert_eq!(response.answer, ITERATION_LIMIT_ANSWER);
        assert_eq!(response.thoughts.len(), 2);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_provider_error_yields_failed_response() {
        let (agent, provider) = scripted(json!({"provider": "ollama", "model": "llama3"}));
        provider.push_error("model overloaded");

        let response = agent.execute("hi", &context()).await;
        assert_eq!(response.status, AgentStatus::Failed);
        assert!(response.answer.starts_with("I apologize, but I encountered an error: "));
        assert!(response.error.unwrap().contains("model overloaded"));
    }

    #[tokio::test]
    async fn test_streaming_maps_provider_chunks() {
        let (agent, _provider) = scripted(json!({"provider": "ollama", "model": "llama3"}));

        let chunks = agent.execute_streaming("a b", &context()).collect_chunks().await;
        let text: String = chunks
            .iter()
            .filter(|c| c.chunk_type == ChunkType::Text)
            .map(|c| c.content.as_str())
            .collect();
        assert_eq!(text, "[llama3] a b");
        assert_eq!(chunks.last().unwrap().chunk_type, ChunkType::Completion);
    }

    #[tokio::test]
    async fn test_health_reflects_provider() {
        let (agent, provider) = scripted(json!({"provider": "ollama", "model": "llama3"}));
        assert!(agent.health_check().await.healthy);

        provider.push_text("");
        assert!(!agent.health_check().await.healthy);

        provider.push_error("down");
        let status = agent.health_check().await;
        assert!(!status.healthy);
        assert!(status.message.unwrap().contains("down"));
    }
}
