//! Model domain models.
//!
//! Provider-neutral descriptions of LLM models, their configuration, and the
//! unified request/response shapes every provider speaks.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::errors::{DomainError, DomainResult};

/// Consecutive failed health checks after which a model is marked unavailable.
pub const UNAVAILABLE_AFTER_FAILURES: u32 = 3;

/// LLM provider family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Google,
    Cohere,
    Mistral,
    Ollama,
    Azure,
    Bedrock,
    HuggingFace,
    Custom,
}

impl ProviderKind {
    pub const ALL: [Self; 10] = [
        Self::OpenAi,
        Self::Anthropic,
        Self::Google,
        Self::Cohere,
        Self::Mistral,
        Self::Ollama,
        Self::Azure,
        Self::Bedrock,
        Self::HuggingFace,
        Self::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::Cohere => "cohere",
            Self::Mistral => "mistral",
            Self::Ollama => "ollama",
            Self::Azure => "azure",
            Self::Bedrock => "bedrock",
            Self::HuggingFace => "huggingface",
            Self::Custom => "custom",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        let lowered = s.to_lowercase();
        Self::ALL.into_iter().find(|kind| kind.as_str() == lowered)
    }

    /// Environment variable consulted when no API key is configured.
    pub fn api_key_env_var(&self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::Google => Some("GOOGLE_API_KEY"),
            Self::Cohere => Some("COHERE_API_KEY"),
            Self::Mistral => Some("MISTRAL_API_KEY"),
            Self::Azure => Some("AZURE_OPENAI_API_KEY"),
            Self::HuggingFace => Some("HUGGINGFACE_API_KEY"),
            Self::Ollama | Self::Bedrock | Self::Custom => None,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named model capability flag used in lookups and routing constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelCapability {
    Streaming,
    FunctionCalling,
    Vision,
    JsonMode,
    SystemMessages,
}

impl ModelCapability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::FunctionCalling => "function_calling",
            Self::Vision => "vision",
            Self::JsonMode => "json_mode",
            Self::SystemMessages => "system_messages",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().trim_start_matches("supports_") {
            "streaming" => Some(Self::Streaming),
            "function_calling" | "functions" | "tools" => Some(Self::FunctionCalling),
            "vision" => Some(Self::Vision),
            "json_mode" | "json" => Some(Self::JsonMode),
            "system_messages" => Some(Self::SystemMessages),
            _ => None,
        }
    }
}

/// What a model supports and what it costs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCapabilities {
    pub supports_streaming: bool,
    pub supports_function_calling: bool,
    pub supports_vision: bool,
    pub supports_json_mode: bool,
    pub supports_system_messages: bool,
    pub max_context_length: u32,
    pub max_output_tokens: u32,
    pub supports_temperature: bool,
    pub supports_top_p: bool,
    pub supports_stop_sequences: bool,
    /// USD per 1k input tokens
    pub cost_per_1k_input_tokens: f64,
    /// USD per 1k output tokens
    pub cost_per_1k_output_tokens: f64,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            supports_streaming: true,
            supports_function_calling: false,
            supports_vision: false,
            supports_json_mode: false,
            supports_system_messages: true,
            max_context_length: 4096,
            max_output_tokens: 4096,
            supports_temperature: true,
            supports_top_p: true,
            supports_stop_sequences: true,
            cost_per_1k_input_tokens: 0.0,
            cost_per_1k_output_tokens: 0.0,
        }
    }
}

impl ModelCapabilities {
    pub fn supports(&self, capability: ModelCapability) -> bool {
        match capability {
            ModelCapability::Streaming => self.supports_streaming,
            ModelCapability::FunctionCalling => self.supports_function_calling,
            ModelCapability::Vision => self.supports_vision,
            ModelCapability::JsonMode => self.supports_json_mode,
            ModelCapability::SystemMessages => self.supports_system_messages,
        }
    }

    pub fn supports_all(&self, capabilities: &[ModelCapability]) -> bool {
        capabilities.iter().all(|cap| self.supports(*cap))
    }

    /// Mean of input and output price per 1k tokens.
    pub fn average_cost_per_1k(&self) -> f64 {
        (self.cost_per_1k_input_tokens + self.cost_per_1k_output_tokens) / 2.0
    }

    /// Sum of input and output price per 1k tokens.
    pub fn total_cost_per_1k(&self) -> f64 {
        self.cost_per_1k_input_tokens + self.cost_per_1k_output_tokens
    }
}

/// Retry settings for provider calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Seconds before the first retry
    pub initial_delay: f64,
    /// Upper bound in seconds for any single delay
    pub max_delay: f64,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: 1.0,
            max_delay: 60.0,
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

/// Configuration needed to instantiate a provider client for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: ProviderKind,
    pub model_name: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Ordered model ids tried when this model fails
    #[serde(default)]
    pub fallback_models: Vec<String>,
    #[serde(default)]
    pub extra_params: Map<String, Value>,
}

const fn default_temperature() -> f32 {
    0.7
}

const fn default_top_p() -> f32 {
    1.0
}

const fn default_timeout() -> u64 {
    60
}

impl ModelConfig {
    pub fn new(provider: ProviderKind, model_name: impl Into<String>) -> Self {
        Self {
            provider,
            model_name: model_name.into(),
            api_key: None,
            api_base: None,
            organization_id: None,
            temperature: default_temperature(),
            max_tokens: None,
            top_p: default_top_p(),
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop_sequences: Vec::new(),
            timeout: default_timeout(),
            retry: RetryConfig::default(),
            fallback_models: Vec::new(),
            extra_params: Map::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<String>) -> Self {
        self.fallback_models = fallbacks;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub const fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn model_id(&self) -> String {
        model_id(self.provider, &self.model_name)
    }

    /// Check the invariants every provider relies on.
    pub fn validate(&self) -> DomainResult<()> {
        if self.model_name.trim().is_empty() {
            return Err(DomainError::config("model_name must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(DomainError::config(format!(
                "temperature must be between 0 and 2, got {}",
                self.temperature
            )));
        }
        if self.max_tokens == Some(0) {
            return Err(DomainError::config("max_tokens must be at least 1"));
        }
        let has_key = self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty());
        if !has_key && self.provider != ProviderKind::Ollama {
            return Err(DomainError::config(format!(
                "API key is required for provider {}",
                self.provider
            )));
        }
        Ok(())
    }
}

/// `"<provider>:<model_name>"`
pub fn model_id(provider: ProviderKind, model_name: &str) -> String {
    format!("{}:{model_name}", provider.as_str())
}

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// Tool invocation requested by a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Arguments object as produced by the model
    pub arguments: Value,
}

/// One message in a conversation with a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }
}

/// Tool a model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

/// Per-call overrides of the model configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub stop: Option<Vec<String>>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}

impl GenerationParams {
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }
}

/// Token accounting for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub const fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Unified non-streaming model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: String,
    pub model: String,
    pub provider: ProviderKind,
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl ModelResponse {
    pub fn new(provider: ProviderKind, model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            provider,
            finish_reason: None,
            usage: None,
            tool_calls: Vec::new(),
            metadata: Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn annotate(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }
}

/// One increment of a streamed model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub content: String,
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl StreamChunk {
    pub fn delta(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: None,
            metadata: Map::new(),
        }
    }

    pub fn finished(reason: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            finish_reason: Some(reason.into()),
            metadata: Map::new(),
        }
    }
}

/// Catalog entry for one model, including its health state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub provider: ProviderKind,
    pub model_name: String,
    pub display_name: String,
    pub capabilities: ModelCapabilities,
    #[serde(default = "default_available")]
    pub is_available: bool,
    #[serde(default)]
    pub last_health_check: Option<DateTime<Utc>>,
    #[serde(default)]
    pub health_check_failures: u32,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

const fn default_available() -> bool {
    true
}

impl ModelInfo {
    pub fn new(
        provider: ProviderKind,
        model_name: impl Into<String>,
        display_name: impl Into<String>,
        capabilities: ModelCapabilities,
    ) -> Self {
        Self {
            provider,
            model_name: model_name.into(),
            display_name: display_name.into(),
            capabilities,
            is_available: true,
            last_health_check: None,
            health_check_failures: 0,
            tags: BTreeSet::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn id(&self) -> String {
        model_id(self.provider, &self.model_name)
    }

    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|tag| self.tags.contains(tag))
    }

    /// Apply one health probe outcome.
    ///
    /// A success resets the failure counter and restores availability.
    /// The model becomes unavailable once failures reach
    /// [`UNAVAILABLE_AFTER_FAILURES`].
    pub fn record_health_check(&mut self, healthy: bool) {
        self.last_health_check = Some(Utc::now());
        if healthy {
            self.health_check_failures = 0;
            self.is_available = true;
        } else {
            self.health_check_failures += 1;
            if self.health_check_failures >= UNAVAILABLE_AFTER_FAILURES {
                self.is_available = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ModelInfo {
        ModelInfo::new(
            ProviderKind::OpenAi,
            "gpt-4",
            "GPT-4",
            ModelCapabilities::default(),
        )
    }

    #[test]
    fn test_unavailable_exactly_at_third_failure() {
        let mut info = sample();
        info.record_health_check(false);
        info.record_health_check(false);
        assert!(info.is_available);
        assert_eq!(info.health_check_failures, 2);

        info.record_health_check(false);
        assert!(!info.is_available);
        assert_eq!(info.health_check_failures, 3);
    }

    #[test]
    fn test_single_success_restores_availability() {
        let mut info = sample();
        for _ in 0..5 {
            info.record_health_check(false);
        }
        assert!(!info.is_available);

        info.record_health_check(true);
        assert!(info.is_available);
        assert_eq!(info.health_check_failures, 0);
        assert!(info.last_health_check.is_some());
    }

    #[test]
    fn test_model_id_format() {
        assert_eq!(sample().id(), "openai:gpt-4");
    }

    #[test]
    fn test_config_requires_api_key_except_ollama() {
        let err = ModelConfig::new(ProviderKind::OpenAi, "gpt-4").validate().unwrap_err();
        assert!(err.to_string().contains("API key is required"));

        ModelConfig::new(ProviderKind::Ollama, "llama3").validate().unwrap();
        ModelConfig::new(ProviderKind::Anthropic, "claude-3-haiku")
            .with_api_key("sk-test")
            .validate()
            .unwrap();
    }

    #[test]
    fn test_config_rejects_out_of_range_values() {
        let base = ModelConfig::new(ProviderKind::Ollama, "llama3");
        assert!(base.clone().with_temperature(2.5).validate().is_err());
        assert!(base.clone().with_temperature(-0.1).validate().is_err());
        assert!(base.clone().with_max_tokens(0).validate().is_err());
        assert!(base.with_temperature(2.0).with_max_tokens(1).validate().is_ok());
    }

    #[test]
    fn test_cost_helpers() {
        let caps = ModelCapabilities {
            cost_per_1k_input_tokens: 0.01,
            cost_per_1k_output_tokens: 0.03,
            ..Default::default()
        };
        assert!((caps.average_cost_per_1k() - 0.02).abs() < 1e-12);
        assert!((caps.total_cost_per_1k() - 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_provider_and_capability_parsing() {
        assert_eq!(ProviderKind::from_str("OpenAI"), Some(ProviderKind::OpenAi));
        assert_eq!(ProviderKind::from_str("nope"), None);
        assert_eq!(
            ModelCapability::from_str("supports_function_calling"),
            Some(ModelCapability::FunctionCalling)
        );
        assert_eq!(ModelCapability::from_str("vision"), Some(ModelCapability::Vision));
    }
}
