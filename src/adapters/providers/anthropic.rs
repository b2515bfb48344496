//! Anthropic Messages API client.

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::http::{self, HttpFailure};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ChatMessage, GenerationParams, ModelCapabilities, ModelConfig, ModelResponse, ProviderKind,
    Role, StreamChunk, TokenUsage, ToolCall,
};
use crate::domain::ports::{ModelProvider, ModelStream};
use crate::infrastructure::RetryPolicy;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Message role in Anthropic API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum MessageRole {
    User,
    Assistant,
}

/// Content block in a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String, input: Value },
    #[serde(rename = "tool_result")]
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: MessageRole,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
struct ToolDefinition<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

/// Request to the Anthropic Messages API.
#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDefinition<'a>>,
}

#[derive(Debug, Clone, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: Usage,
}

/// Streaming event from the API.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum StreamEvent {
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: DeltaBlock },
    #[serde(rename = "message_delta")]
    MessageDelta { delta: MessageDeltaData },
    #[serde(rename = "error")]
    Error { error: ApiError },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct DeltaBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaData {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

pub struct AnthropicProvider {
    config: ModelConfig,
    capabilities: ModelCapabilities,
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl AnthropicProvider {
    pub fn new(
        config: ModelConfig,
        capabilities: ModelCapabilities,
        client: Client,
    ) -> DomainResult<Self> {
        config.validate()?;
        let base_url = config
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let retry = RetryPolicy::from_config(&config.retry);

        Ok(Self {
            config,
            capabilities,
            client,
            base_url,
            retry,
        })
    }

    fn build_request<'a>(
        &'a self,
        messages: &[ChatMessage],
        params: &'a GenerationParams,
        stream: bool,
    ) -> MessagesRequest<'a> {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        MessagesRequest {
            model: &self.config.model_name,
            max_tokens: params
                .max_tokens
                .or(self.config.max_tokens)
                .unwrap_or_else(|| self.capabilities.max_output_tokens.clamp(1, 4096)),
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages: to_wire_messages(messages),
            stream,
            temperature: params.temperature.unwrap_or(self.config.temperature).min(1.0),
            top_p: params.top_p.unwrap_or(self.config.top_p),
            stop_sequences: params
                .stop
                .clone()
                .unwrap_or_else(|| self.config.stop_sequences.clone()),
            tools: params
                .tools
                .iter()
                .map(|tool| ToolDefinition {
                    name: &tool.name,
                    description: &tool.description,
                    input_schema: &tool.parameters,
                })
                .collect(),
        }
    }

    fn request(&self, body: &MessagesRequest<'_>) -> RequestBuilder {
        self.client
            .post(format!("{}/v1/messages", self.base_url))
            .timeout(self.config.timeout_duration())
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-api-key", self.config.api_key.as_deref().unwrap_or_default())
            .header("anthropic-version", API_VERSION)
            .json(body)
    }

    async fn post(&self, body: &MessagesRequest<'_>) -> Result<reqwest::Response, HttpFailure> {
        self.retry
            .execute_when(|| http::send(self.request(body)), |failure| failure.retryable)
            .await
    }
}

/// Convert chat messages to the alternating user/assistant shape the API
/// expects. System messages travel separately; tool results ride on user
/// turns; consecutive turns of the same role are merged.
fn to_wire_messages(messages: &[ChatMessage]) -> Vec<Message> {
    let mut wire: Vec<Message> = Vec::new();

    for message in messages {
        let (role, blocks) = match message.role {
            Role::System => continue,
            Role::User => (
                MessageRole::User,
                vec![ContentBlock::Text {
                    text: message.content.clone(),
                }],
            ),
            Role::Tool => (
                MessageRole::User,
                vec![ContentBlock::ToolResult {
                    tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                    content: message.content.clone(),
                }],
            ),
            Role::Assistant => {
                let mut blocks = Vec::new();
                if !message.content.is_empty() {
                    blocks.push(ContentBlock::Text {
                        text: message.content.clone(),
                    });
                }
                blocks.extend(message.tool_calls.iter().map(|call| ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                }));
                (MessageRole::Assistant, blocks)
            }
        };

        match wire.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => wire.push(Message {
                role,
                content: blocks,
            }),
        }
    }

    wire
}

fn parse_response(response: MessagesResponse) -> ModelResponse {
    let text = response
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut parsed = ModelResponse::new(ProviderKind::Anthropic, response.model, text);
    parsed.finish_reason = response.stop_reason;
    parsed.usage = Some(TokenUsage::new(
        response.usage.input_tokens,
        response.usage.output_tokens,
    ));
    parsed.tool_calls = response
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                id,
                name,
                arguments: input,
            }),
            _ => None,
        })
        .collect();
    parsed
}

fn parse_stream_payload(payload: &str) -> Option<DomainResult<StreamChunk>> {
    let event: StreamEvent = match serde_json::from_str(payload) {
        Ok(event) => event,
        Err(e) => return Some(Err(DomainError::from(e))),
    };
    match event {
        StreamEvent::ContentBlockDelta { delta } if !delta.text.is_empty() => {
            Some(Ok(StreamChunk::delta(delta.text)))
        }
        StreamEvent::MessageDelta { delta } => delta.stop_reason.map(|r| Ok(StreamChunk::finished(r))),
        StreamEvent::Error { error } => Some(Err(DomainError::backend(format!(
            "{}: {}",
            error.error_type, error.message
        )))),
        _ => None,
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
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
        let body = self.build_request(messages, params, false);
        let response = self.post(&body).await?;
        let result: MessagesResponse = response
            .json()
            .await
            .map_err(|e| DomainError::backend(format!("failed to parse response: {e}")))?;
        Ok(parse_response(result))
    }

    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> DomainResult<ModelStream> {
        let body = self.build_request(messages, params, true);
        let response = self.post(&body).await?;
        Ok(http::spawn_sse_stream(response, parse_stream_payload))
    }
}
