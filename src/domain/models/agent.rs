//! Agent domain models.
//!
//! Shapes shared by every agent adapter: what an agent can do, what it is
//! given, and what it hands back (whole responses or stream chunks).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Answer prefix used whenever an adapter converts a backend failure into a response.
pub const ERROR_ANSWER_PREFIX: &str = "I apologize, but I encountered an error: ";

/// Kind of backend an agent adapter talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Graph-based workflow engine
    Langgraph,
    /// Tool-calling executor
    Langchain,
    /// Webhook-based workflow engine
    N8n,
    /// In-process agent for tests and dry runs
    Mock,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Langgraph => "langgraph",
            Self::Langchain => "langchain",
            Self::N8n => "n8n",
            Self::Mock => "mock",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "langgraph" | "graph" => Some(Self::Langgraph),
            "langchain" | "executor" => Some(Self::Langchain),
            "n8n" | "webhook" => Some(Self::N8n),
            "mock" | "test" => Some(Self::Mock),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution status of an agent response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Processing,
    Completed,
    Failed,
    Timeout,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }
}

/// Static description of what an agent supports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentCapabilities {
    pub supports_streaming: bool,
    pub supports_tools: bool,
    pub supports_memory: bool,
    pub supports_multimodal: bool,
    pub supports_rag: bool,
    pub supports_code_execution: bool,
    pub max_context_length: u32,
    pub supported_languages: Vec<String>,
    pub supported_file_types: Vec<String>,
}

impl Default for AgentCapabilities {
    fn default() -> Self {
        Self {
            supports_streaming: false,
            supports_tools: false,
            supports_memory: false,
            supports_multimodal: false,
            supports_rag: false,
            supports_code_execution: false,
            max_context_length: 4096,
            supported_languages: vec!["en".to_string()],
            supported_file_types: Vec::new(),
        }
    }
}

impl AgentCapabilities {
    /// Names accepted by [`AgentCapabilities::has`].
    pub const FLAG_NAMES: [&'static str; 6] = [
        "supports_streaming",
        "supports_tools",
        "supports_memory",
        "supports_multimodal",
        "supports_rag",
        "supports_code_execution",
    ];

    /// Look up a boolean capability flag by name.
    ///
    /// Accepts both `supports_tools` and the short form `tools`.
    /// Unknown names answer `false`.
    pub fn has(&self, name: &str) -> bool {
        match name.strip_prefix("supports_").unwrap_or(name) {
            "streaming" => self.supports_streaming,
            "tools" => self.supports_tools,
            "memory" => self.supports_memory,
            "multimodal" => self.supports_multimodal,
            "rag" => self.supports_rag,
            "code_execution" => self.supports_code_execution,
            _ => false,
        }
    }

    /// Names of every flag that is set.
    pub fn enabled_flags(&self) -> Vec<&'static str> {
        Self::FLAG_NAMES
            .iter()
            .copied()
            .filter(|name| self.has(name))
            .collect()
    }
}

/// One prior turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Per-request context handed to an agent. Agents only ever borrow it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    pub tenant_id: String,
    pub user_id: String,
    pub session_id: String,
    #[serde(default)]
    pub conversation_history: Vec<ConversationTurn>,
    #[serde(default)]
    pub user_preferences: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub document_ids: Option<Vec<String>>,
    /// Advisory execution limit in seconds
    #[serde(default = "default_max_execution_time")]
    pub max_execution_time: u64,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

const fn default_max_execution_time() -> u64 {
    120
}

impl AgentContext {
    pub fn new(
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            conversation_history: Vec::new(),
            user_preferences: Map::new(),
            metadata: Map::new(),
            document_ids: None,
            max_execution_time: default_max_execution_time(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.conversation_history = history;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_document_ids(mut self, ids: Vec<String>) -> Self {
        self.document_ids = Some(ids);
        self
    }
}

/// Source attribution attached to an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    pub content: String,
    #[serde(default)]
    pub relevance_score: Option<f64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Citation {
    pub fn new(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            content: content.into(),
            relevance_score: None,
            metadata: Map::new(),
        }
    }
}

/// One reasoning step recorded while answering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentThought {
    pub step: String,
    pub thought: String,
    pub timestamp: DateTime<Utc>,
}

impl AgentThought {
    pub fn new(step: impl Into<String>, thought: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            thought: thought.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Result of a single agent execution.
///
/// `execution_time` equals `completed_at - started_at` in seconds unless it
/// was overridden with [`AgentResponse::with_execution_time`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub thoughts: Vec<AgentThought>,
    pub agent_id: String,
    pub agent_type: AgentType,
    pub status: AgentStatus,
    pub execution_time: f64,
    pub tokens_used: Option<u64>,
    pub visualization_data: Option<Value>,
    pub tools_used: Vec<String>,
    pub metadata: Map<String, Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl AgentResponse {
    /// Completed response stamped at the moment of the call.
    pub fn completed(
        agent_id: impl Into<String>,
        agent_type: AgentType,
        answer: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let completed_at = Utc::now();
        Self {
            answer: answer.into(),
            citations: Vec::new(),
            thoughts: Vec::new(),
            agent_id: agent_id.into(),
            agent_type,
            status: AgentStatus::Completed,
            execution_time: elapsed_seconds(started_at, completed_at),
            tokens_used: None,
            visualization_data: None,
            tools_used: Vec::new(),
            metadata: Map::new(),
            error: None,
            started_at,
            completed_at,
        }
    }

    /// Failed response carrying the apology answer and the error text.
    pub fn failed(
        agent_id: impl Into<String>,
        agent_type: AgentType,
        error: impl std::fmt::Display,
        started_at: DateTime<Utc>,
    ) -> Self {
        let error = error.to_string();
        let mut response = Self::completed(
            agent_id,
            agent_type,
            format!("{ERROR_ANSWER_PREFIX}{error}"),
            started_at,
        );
        response.status = AgentStatus::Failed;
        response.error = Some(error);
        response
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.citations = citations;
        self
    }

    pub fn with_thoughts(mut self, thoughts: Vec<AgentThought>) -> Self {
        self.thoughts = thoughts;
        self
    }

    pub fn with_tools_used(mut self, tools_used: Vec<String>) -> Self {
        self.tools_used = tools_used;
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_tokens_used(mut self, tokens: Option<u64>) -> Self {
        self.tokens_used = tokens;
        self
    }

    pub fn with_visualization(mut self, data: Option<Value>) -> Self {
        self.visualization_data = data;
        self
    }

    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }

    /// Replace the derived execution time with an explicit value.
    pub fn with_execution_time(mut self, seconds: f64) -> Self {
        self.execution_time = seconds;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == AgentStatus::Completed
    }
}

fn elapsed_seconds(started_at: DateTime<Utc>, completed_at: DateTime<Utc>) -> f64 {
    let delta = completed_at - started_at;
    delta
        .num_microseconds()
        .map_or_else(|| delta.num_milliseconds() as f64 / 1_000.0, |us| us as f64 / 1_000_000.0)
}

/// Type of a streamed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Text,
    Thought,
    Citation,
    Status,
    Completion,
    Error,
}

impl ChunkType {
    /// Completion and error chunks end a stream.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completion | Self::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Thought => "thought",
            Self::Citation => "citation",
            Self::Status => "status",
            Self::Completion => "completion",
            Self::Error => "error",
        }
    }
}

/// One piece of a streamed agent response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStreamChunk {
    pub chunk_type: ChunkType,
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl AgentStreamChunk {
    pub fn new(chunk_type: ChunkType, content: impl Into<String>) -> Self {
        Self {
            chunk_type,
            content: content.into(),
            metadata: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(ChunkType::Text, content)
    }

    pub fn thought(content: impl Into<String>) -> Self {
        Self::new(ChunkType::Thought, content)
    }

    pub fn status(content: impl Into<String>) -> Self {
        Self::new(ChunkType::Status, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(ChunkType::Error, content)
    }

    pub fn completion() -> Self {
        Self::new(ChunkType::Completion, "")
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub const fn is_terminal(&self) -> bool {
        self.chunk_type.is_terminal()
    }
}

/// Outcome of a live health probe. Never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: Option<String>,
    #[serde(default)]
    pub details: Map<String, Value>,
    pub checked_at: DateTime<Utc>,
}

impl HealthStatus {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            healthy: true,
            message: Some(message.into()),
            details: Map::new(),
            checked_at: Utc::now(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: Some(message.into()),
            details: Map::new(),
            checked_at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    pub fn message_or_default(&self) -> &str {
        self.message.as_deref().unwrap_or("no message")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_execution_time_derived_from_timestamps() {
        let started = Utc::now() - Duration::milliseconds(250);
        let response = AgentResponse::completed("a", AgentType::Mock, "done", started);

        let expected = (response.completed_at - response.started_at)
            .num_microseconds()
            .unwrap() as f64
            / 1_000_000.0;
        assert!((response.execution_time - expected).abs() < f64::EPSILON);
        assert!(response.execution_time >= 0.25);
    }

    #[test]
    fn test_execution_time_override() {
        let response =
            AgentResponse::completed("a", AgentType::Mock, "done", Utc::now()).with_execution_time(9.5);
        assert!((response.execution_time - 9.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_failed_response_shape() {
        let response = AgentResponse::failed("n8n", AgentType::N8n, "connection refused", Utc::now());
        assert_eq!(response.status, AgentStatus::Failed);
        assert_eq!(response.error.as_deref(), Some("connection refused"));
        assert_eq!(
            response.answer,
            "I apologize, but I encountered an error: connection refused"
        );
        assert!(!response.is_success());
    }

    #[test]
    fn test_capability_lookup_by_name() {
        let caps = AgentCapabilities {
            supports_tools: true,
            supports_rag: true,
            ..Default::default()
        };
        assert!(caps.has("supports_tools"));
        assert!(caps.has("rag"));
        assert!(!caps.has("supports_streaming"));
        assert!(!caps.has("teleportation"));
        assert_eq!(caps.enabled_flags(), vec!["supports_tools", "supports_rag"]);
    }

    #[test]
    fn test_capability_defaults() {
        let caps = AgentCapabilities::default();
        assert_eq!(caps.max_context_length, 4096);
        assert_eq!(caps.supported_languages, vec!["en".to_string()]);
    }

    #[test]
    fn test_agent_type_parsing() {
        assert_eq!(AgentType::from_str("N8N"), Some(AgentType::N8n));
        assert_eq!(AgentType::from_str("langgraph"), Some(AgentType::Langgraph));
        assert_eq!(AgentType::from_str("unknown"), None);
        assert_eq!(AgentType::Langchain.to_string(), "langchain");
    }

    #[test]
    fn test_terminal_chunks() {
        assert!(AgentStreamChunk::completion().is_terminal());
        assert!(AgentStreamChunk::error("boom").is_terminal());
        assert!(!AgentStreamChunk::text("hi").is_terminal());
        assert!(!AgentStreamChunk::status("working").is_terminal());
    }

    #[test]
    fn test_context_deserializes_with_defaults() {
        let ctx: AgentContext = serde_json::from_str(
            r#"{"tenant_id":"t","user_id":"u","session_id":"s"}"#,
        )
        .unwrap();
        assert_eq!(ctx.max_execution_time, 120);
        assert!(ctx.conversation_history.is_empty());
        assert!(ctx.document_ids.is_none());
    }
}
