//! OpenAI-compatible chat completions client.
//!
//! Serves OpenAI itself plus every backend that speaks the same wire
//! format (Azure OpenAI, Mistral, Ollama, custom gateways).

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};

use super::http::{self, HttpFailure};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ChatMessage, GenerationParams, ModelCapabilities, ModelConfig, ModelResponse, ProviderKind,
    Role, StreamChunk, TokenUsage, ToolCall,
};
use crate::domain::ports::{ModelProvider, ModelStream};
use crate::infrastructure::RetryPolicy;

/// Default API base per provider family.
pub fn default_api_base(provider: ProviderKind) -> Option<&'static str> {
    match provider {
        ProviderKind::OpenAi => Some("https://api.openai.com/v1"),
        ProviderKind::Mistral => Some("https://api.mistral.ai/v1"),
        ProviderKind::Ollama => Some("http://localhost:11434/v1"),
        _ => None,
    }
}

pub struct OpenAiCompatibleProvider {
    config: ModelConfig,
    capabilities: ModelCapabilities,
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        config: ModelConfig,
        capabilities: ModelCapabilities,
        client: Client,
    ) -> DomainResult<Self> {
        config.validate()?;
        let base_url = config
            .api_base
            .clone()
            .or_else(|| default_api_base(config.provider).map(str::to_string))
            .ok_or_else(|| {
                DomainError::config(format!(
                    "api_base is required for provider {}",
                    config.provider
                ))
            })?;
        let retry = RetryPolicy::from_config(&config.retry);

        Ok(Self {
            config,
            capabilities,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    fn request(&self, body: &Value) -> RequestBuilder {
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(self.config.timeout_duration())
            .header(header::CONTENT_TYPE, "application/json")
            .json(body);

        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = if self.config.provider == ProviderKind::Azure {
                request.header("api-key", key)
            } else {
                request.bearer_auth(key)
            };
        }
        if let Some(org) = &self.config.organization_id {
            request = request.header("OpenAI-Organization", org);
        }
        request
    }

    fn build_body(&self, messages: &[ChatMessage], params: &GenerationParams, stream: bool) -> Value {
        let mut body = json!({
            "model": self.config.model_name,
            "messages": messages.iter().map(wire_message).collect::<Vec<_>>(),
            "temperature": params.temperature.unwrap_or(self.config.temperature),
            "top_p": params.top_p.unwrap_or(self.config.top_p),
            "stream": stream,
        });

        if let Some(max_tokens) = params.max_tokens.or(self.config.max_tokens) {
            body["max_tokens"] = json!(max_tokens);
        }
        if self.config.frequency_penalty != 0.0 {
            body["frequency_penalty"] = json!(self.config.frequency_penalty);
        }
        if self.config.presence_penalty != 0.0 {
            body["presence_penalty"] = json!(self.config.presence_penalty);
        }
        let stop = params.stop.as_ref().unwrap_or(&self.config.stop_sequences);
        if !stop.is_empty() {
            body["stop"] = json!(stop);
        }
        if !params.tools.is_empty() {
            body["tools"] = params
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
        }
        for (key, value) in &self.config.extra_params {
            body[key.as_str()] = value.clone();
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, HttpFailure> {
        self.retry
            .execute_when(|| http::send(self.request(body)), |failure| failure.retryable)
            .await
    }
}

fn wire_message(message: &ChatMessage) -> Value {
    match message.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id,
            "content": message.content,
        }),
        Role::Assistant if !message.tool_calls.is_empty() => json!({
            "role": "assistant",
            "content": message.content,
            "tool_calls": message.tool_calls.iter().map(|call| json!({
                "id": call.id,
                "type": "function",
                "function": { "name": call.name, "arguments": call.arguments.to_string() },
            })).collect::<Vec<_>>(),
        }),
        role => json!({ "role": role.as_str(), "content": message.content }),
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    model: String,
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

fn parse_completion(provider: ProviderKind, completion: ChatCompletion) -> DomainResult<ModelResponse> {
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| DomainError::backend("completion contained no choices"))?;

    let mut response = ModelResponse::new(
        provider,
        completion.model,
        choice.message.content.unwrap_or_default(),
    );
    response.finish_reason = choice.finish_reason;
    response.usage = completion
        .usage
        .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens));
    response.tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|call| ToolCall {
            id: call.id,
            name: call.function.name,
            arguments: serde_json::from_str(&call.function.arguments)
                .unwrap_or(Value::String(call.function.arguments)),
        })
        .collect();
    Ok(response)
}

fn parse_stream_payload(payload: &str) -> Option<DomainResult<StreamChunk>> {
    let chunk: ChatCompletionChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => return Some(Err(DomainError::from(e))),
    };
    let choice = chunk.choices.into_iter().next()?;
    match (choice.delta.content, choice.finish_reason) {
        (Some(content), finish_reason) if !content.is_empty() => Some(Ok(StreamChunk {
            content,
            finish_reason,
            metadata: serde_json::Map::new(),
        })),
        (_, Some(reason)) => Some(Ok(StreamChunk::finished(reason))),
        _ => None,
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn capabilities(&self) -> ModelCapabilities {
        self.capabilities.clone()
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> DomainResult<ModelResponse> {
        let body = self.build_body(messages, params, false);
        let response = self.post(&body).await?;
        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| DomainError::backend(format!("failed to parse completion: {e}")))?;

        let mut parsed = parse_completion(self.config.provider, completion)?;
        if parsed.model.is_empty() {
            parsed.model.clone_from(&self.config.model_name);
        }
        tracing::debug!(
            model = %self.config.model_id(),
            tool_calls = parsed.tool_calls.len(),
            "completion received"
        );
        Ok(parsed)
    }

    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> DomainResult<ModelStream> {
        let body = self.build_body(messages, params, true);
        let response = self.post(&body).await?;
        Ok(http::spawn_sse_stream(response, parse_stream_payload))
    }
}
