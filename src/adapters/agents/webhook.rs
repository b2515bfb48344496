//! Webhook agent adapter.
//!
//! Delegates each query to an external workflow engine (n8n style) over a
//! single HTTP POST and maps the JSON reply onto an [`AgentResponse`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AgentCapabilities, AgentConfig, AgentContext, AgentResponse, AgentStatus, AgentStreamChunk,
    AgentType, ChunkType, Citation, ConversationTurn, HealthStatus,
};
use crate::domain::ports::{Agent, AgentDescriptor, AgentStream, ChunkSink};
use crate::infrastructure::logging::scrub_secrets;
use crate::infrastructure::RetryPolicy;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);
const SENTENCE_SEPARATOR: &str = ". ";

/// Adapter-specific configuration keys.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSettings {
    pub webhook_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Per-attempt timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Total attempts, including the first one
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Delay before the second attempt; doubles after every failure
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

const fn default_timeout() -> u64 {
    120
}

const fn default_retry_count() -> u32 {
    3
}

const fn default_retry_delay_ms() -> u64 {
    1000
}

#[derive(Serialize)]
struct WebhookRequest<'a> {
    query: &'a str,
    context: WebhookContext<'a>,
}

#[derive(Serialize)]
struct WebhookContext<'a> {
    tenant_id: &'a str,
    user_id: &'a str,
    session_id: &'a str,
    conversation_history: &'a [ConversationTurn],
    metadata: &'a Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct WebhookReply {
    answer: String,
    #[serde(default)]
    citations: Vec<WebhookCitation>,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default)]
    execution_id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WebhookCitation {
    #[serde(default = "unknown_source")]
    source: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    relevance_score: Option<f64>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

fn unknown_source() -> String {
    "Unknown".to_string()
}

struct WebhookInner {
    descriptor: AgentDescriptor,
    settings: WebhookSettings,
    url: Url,
    client: Client,
    retry: RetryPolicy,
}

/// Agent backed by a workflow webhook.
#[derive(Clone)]
pub struct WebhookAgent {
    inner: Arc<WebhookInner>,
}

impl WebhookAgent {
    pub fn new(config: &AgentConfig, client: Client) -> DomainResult<Self> {
        let settings: WebhookSettings = config.settings()?;
        let url = Url::parse(&settings.webhook_url).map_err(|e| {
            DomainError::config(format!(
                "invalid webhook_url for agent '{}': {e}",
                config.agent_id
            ))
        })?;
        let retry = RetryPolicy::new(settings.retry_count, Duration::from_millis(settings.retry_delay_ms))
            .with_max_delay(Duration::MAX);

        Ok(Self {
            inner: Arc::new(WebhookInner {
                descriptor: AgentDescriptor::from_config(config, AgentType::N8n),
                settings,
                url,
                client,
                retry,
            }),
        })
    }

    /// Static capability snapshot, also published at registration time.
    pub fn static_capabilities() -> AgentCapabilities {
        AgentCapabilities {
            supports_streaming: false,
            supports_tools: true,
            supports_memory: false,
            supports_multimodal: false,
            supports_rag: false,
            supports_code_execution: true,
            max_context_length: 8000,
            ..AgentCapabilities::default()
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.inner.settings.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn post_once(&self, payload: &WebhookRequest<'_>) -> DomainResult<WebhookReply> {
        let request = self
            .inner
            .client
            .post(self.inner.url.clone())
            .timeout(Duration::from_secs(self.inner.settings.timeout))
            .json(payload);
        let response = self.authorized(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DomainError::backend(format!("webhook returned status {status}")));
        }

        response
            .json::<WebhookReply>()
            .await
            .map_err(|e| DomainError::backend(format!("malformed webhook response: {e}")))
    }

    async fn call_webhook(&self, query: &str, context: &AgentContext) -> DomainResult<WebhookReply> {
        let payload = WebhookRequest {
            query,
            context: WebhookContext {
                tenant_id: &context.tenant_id,
                user_id: &context.user_id,
                session_id: &context.session_id,
                conversation_history: &context.conversation_history,
                metadata: &context.metadata,
            },
        };

        self.inner.retry.execute(|| self.post_once(&payload)).await
    }

    fn to_response(&self, reply: WebhookReply, started_at: DateTime<Utc>) -> AgentResponse {
        let citations = reply
            .citations
            .into_iter()
            .map(|c| Citation {
                source: c.source,
                content: c.content,
                relevance_score: c.relevance_score,
                metadata: c.metadata,
            })
            .collect();

        let tools_used = reply
            .metadata
            .get("tools_used")
            .and_then(Value::as_array)
            .map(|tools| {
                tools
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut metadata = reply.metadata;
        metadata.insert("webhook_url".into(), json!(self.inner.settings.webhook_url));
        metadata.insert(
            "workflow_execution_id".into(),
            reply.execution_id.unwrap_or(Value::Null),
        );

        AgentResponse::completed(
            &self.inner.descriptor.agent_id,
            AgentType::N8n,
            reply.answer,
            started_at,
        )
        .with_citations(citations)
        .with_tools_used(tools_used)
        .with_metadata(metadata)
    }

    async fn produce_stream(self, sink: ChunkSink, query: String, context: AgentContext) -> DomainResult<()> {
        if !sink.emit(AgentStreamChunk::status("Calling workflow...")).await {
            return Ok(());
        }

        let response = tokio::select! {
            response = self.execute(&query, &context) => response,
            () = sink.closed() => {
                tracing::debug!(agent_id = %self.inner.descriptor.agent_id, "stream consumer left, abandoning webhook call");
                return Ok(());
            }
        };

        if response.status == AgentStatus::Failed {
            sink.fail(response.error.unwrap_or_else(|| "webhook call failed".to_string()))
                .await;
            return Ok(());
        }

        for segment in split_sentences(&response.answer) {
            if !sink.emit(AgentStreamChunk::text(segment)).await {
                return Ok(());
            }
        }

        if !response.citations.is_empty() {
            let chunk = AgentStreamChunk::new(ChunkType::Citation, "")
                .with_metadata("citations", serde_json::to_value(&response.citations)?);
            if !sink.emit(chunk).await {
                return Ok(());
            }
        }

        sink.emit(
            AgentStreamChunk::completion()
                .with_metadata("execution_time", json!(response.execution_time))
                .with_metadata("tools_used", json!(response.tools_used)),
        )
        .await;
        Ok(())
    }
}

/// Split an answer at `". "` boundaries. Every segment except the last keeps
/// its separator, so the segments concatenate back to the answer.
pub fn split_sentences(answer: &str) -> Vec<String> {
    let parts: Vec<&str> = answer.split(SENTENCE_SEPARATOR).collect();
    let last = parts.len().saturating_sub(1);
    parts
        .iter()
        .enumerate()
        .filter(|(_, part)| !part.trim().is_empty())
        .map(|(i, part)| {
            if i < last {
                format!("{part}{SENTENCE_SEPARATOR}")
            } else {
                (*part).to_string()
            }
        })
        .collect()
}

#[async_trait]
impl Agent for WebhookAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.inner.descriptor
    }

    async fn execute(&self, query: &str, context: &AgentContext) -> AgentResponse {
        let started_at = Utc::now();
        let agent_id = &self.inner.descriptor.agent_id;

        match self.call_webhook(query, context).await {
            Ok(reply) => {
                tracing::info!(
                    agent_id = %agent_id,
                    session_id = %context.session_id,
                    "webhook workflow completed"
                );
                self.to_response(reply, started_at)
            }
            Err(e) => {
                let message = scrub_secrets(&e.to_string());
                tracing::error!(agent_id = %agent_id, error = %message, "webhook workflow failed");
                AgentResponse::failed(agent_id, AgentType::N8n, message, started_at)
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
        let inner = &self.inner;

        if let Ok(response) = inner
            .client
            .get(inner.url.clone())
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            let status = response.status();
            if status == StatusCode::OK || status == StatusCode::METHOD_NOT_ALLOWED {
                return HealthStatus::healthy("Workflow endpoint is reachable")
                    .with_detail("status_code", json!(status.as_u16()));
            }
        }

        let probe = self.authorized(
            inner
                .client
                .post(inner.url.clone())
                .timeout(HEALTH_TIMEOUT)
                .json(&json!({ "query": "health_check", "context": {} })),
        );

        match probe.send().await {
            Ok(response) if response.status() == StatusCode::OK => {
                HealthStatus::healthy("Workflow is responding")
                    .with_detail("status_code", json!(200))
            }
            Ok(response) => {
                let code = response.status().as_u16();
                HealthStatus::unhealthy(format!("Workflow returned status {code}"))
                    .with_detail("status_code", json!(code))
            }
            Err(e) => HealthStatus::unhealthy(scrub_secrets(&format!("Health check failed: {e}"))),
        }
    }

    async fn cleanup(&self) {
        tracing::debug!(agent_id = %self.inner.descriptor.agent_id, "webhook agent released");
    }
}
