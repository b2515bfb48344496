//! Model provider adapters.
//!
//! Provides implementations of the `ModelProvider` port:
//! - `OpenAiCompatibleProvider` - `/chat/completions` speakers (OpenAI, Azure, Mistral, Ollama, custom)
//! - `AnthropicProvider` - Anthropic Messages API
//! - `MockProvider` - scripted provider for testing

pub mod anthropic;
pub mod http;
pub mod mock;
pub mod openai;
pub mod sse;

use std::sync::Arc;

use reqwest::Client;

pub use anthropic::AnthropicProvider;
pub use mock::{MockProvider, MockProviderFactory};
pub use openai::OpenAiCompatibleProvider;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ModelCapabilities, ModelConfig, ProviderKind};
use crate::domain::ports::{ModelProvider, ProviderFactory};

/// Builds HTTP-backed provider clients sharing one connection pool.
#[derive(Clone, Default)]
pub struct HttpProviderFactory {
    client: Client,
}

impl HttpProviderFactory {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn create(
        &self,
        config: ModelConfig,
        capabilities: ModelCapabilities,
    ) -> DomainResult<Arc<dyn ModelProvider>> {
        let provider: Arc<dyn ModelProvider> = match config.provider {
            ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(
                config,
                capabilities,
                self.client.clone(),
            )?),
            ProviderKind::OpenAi
            | ProviderKind::Azure
            | ProviderKind::Mistral
            | ProviderKind::Ollama
            | ProviderKind::Custom => Arc::new(OpenAiCompatibleProvider::new(
                config,
                capabilities,
                self.client.clone(),
            )?),
            other => {
                return Err(DomainError::config(format!(
                    "provider {other} is not supported"
                )))
            }
        };
        Ok(provider)
    }

    fn supported(&self) -> Vec<ProviderKind> {
        vec![
            ProviderKind::OpenAi,
            ProviderKind::Anthropic,
            ProviderKind::Azure,
            ProviderKind::Mistral,
            ProviderKind::Ollama,
            ProviderKind::Custom,
        ]
    }
}
