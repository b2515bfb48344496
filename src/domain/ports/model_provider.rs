//! Model provider port - interface for LLM provider clients.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    ChatMessage, GenerationParams, ModelCapabilities, ModelConfig, ModelResponse, ProviderKind,
    StreamChunk, TokenUsage,
};

/// Receiving end of a streamed model response.
pub type ModelStream = mpsc::Receiver<DomainResult<StreamChunk>>;

/// Trait for LLM provider implementations.
///
/// One instance serves one configured model.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Configuration this client was built from.
    fn config(&self) -> &ModelConfig;

    /// Capability snapshot of the configured model.
    fn capabilities(&self) -> ModelCapabilities;

    /// Generate a complete response.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> DomainResult<ModelResponse>;

    /// Generate a response incrementally.
    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> DomainResult<ModelStream>;

    /// Approximate token count of `text`.
    fn count_tokens(&self, text: &str) -> usize {
        approximate_tokens(text)
    }

    /// Probe the configuration with a tiny completion.
    async fn validate_config(&self) -> bool {
        let params = GenerationParams::default().with_max_tokens(5);
        match self.generate(&[ChatMessage::user("Hi")], &params).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(
                    model = %self.config().model_id(),
                    error = %e,
                    "provider configuration probe failed"
                );
                false
            }
        }
    }

    /// Cost in USD of a call with the given token usage.
    fn calculate_cost(&self, usage: &TokenUsage) -> f64 {
        let caps = self.capabilities();
        (usage.prompt_tokens as f64 / 1000.0) * caps.cost_per_1k_input_tokens
            + (usage.completion_tokens as f64 / 1000.0) * caps.cost_per_1k_output_tokens
    }

    fn provider_kind(&self) -> ProviderKind {
        self.config().provider
    }
}

/// Builds provider clients from configuration.
pub trait ProviderFactory: Send + Sync {
    /// Create a client for `config`, failing on unsupported providers or
    /// invalid configuration.
    fn create(
        &self,
        config: ModelConfig,
        capabilities: ModelCapabilities,
    ) -> DomainResult<Arc<dyn ModelProvider>>;

    /// Provider kinds this factory can build.
    fn supported(&self) -> Vec<ProviderKind>;
}

/// Roughly four characters per token.
pub fn approximate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approximate_tokens() {
        assert_eq!(approximate_tokens(""), 0);
        assert_eq!(approximate_tokens("abcd"), 1);
        assert_eq!(approximate_tokens("abcde"), 2);
    }
}
