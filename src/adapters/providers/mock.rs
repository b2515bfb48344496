//! Mock model provider for tests and dry runs.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ChatMessage, GenerationParams, ModelCapabilities, ModelConfig, ModelResponse, ProviderKind,
    StreamChunk, TokenUsage,
};
use crate::domain::ports::{approximate_tokens, ModelProvider, ModelStream, ProviderFactory};

/// Provider that answers from a script instead of a network call.
///
/// Scripted responses are consumed in order; once the script is empty the
/// provider either echoes the last user message or keeps failing, depending
/// on how it was built.
pub struct MockProvider {
    config: ModelConfig,
    capabilities: ModelCapabilities,
    script: Mutex<VecDeque<DomainResult<ModelResponse>>>,
    failure: Option<String>,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(config: ModelConfig, capabilities: ModelCapabilities) -> Self {
        Self {
            config,
            capabilities,
            script: Mutex::new(VecDeque::new()),
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Provider whose every call fails with `message`.
    pub fn failing(config: ModelConfig, capabilities: ModelCapabilities, message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new(config, capabilities)
        }
    }

    /// Queue a response to return on a future call.
    pub fn push_response(&self, response: ModelResponse) {
        self.lock_script().push_back(Ok(response));
    }

    /// Queue a plain text response.
    pub fn push_text(&self, content: impl Into<String>) {
        let response = ModelResponse::new(self.config.provider, self.config.model_name.clone(), content);
        self.push_response(response);
    }

    /// Queue a failure.
    pub fn push_error(&self, message: impl Into<String>) {
        self.lock_script()
            .push_back(Err(DomainError::backend(message.into())));
    }

    /// Number of `generate`/`generate_stream` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<DomainResult<ModelResponse>>> {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn next_response(&self, messages: &[ChatMessage]) -> DomainResult<ModelResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.lock_script().pop_front() {
            return scripted;
        }
        if let Some(message) = &self.failure {
            return Err(DomainError::backend(message.clone()));
        }

        let prompt = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
        let content = format!("[{}] {prompt}", self.config.model_name);
        let mut response = ModelResponse::new(self.config.provider, self.config.model_name.clone(), content);
        response.finish_reason = Some("stop".to_string());
        response.usage = Some(TokenUsage::new(
            approximate_tokens(prompt) as u64,
            approximate_tokens(&response.content) as u64,
        ));
        Ok(response)
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn capabilities(&self) -> ModelCapabilities {
        self.capabilities.clone()
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        _params: &GenerationParams,
    ) -> DomainResult<ModelResponse> {
        self.next_response(messages)
    }

    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        _params: &GenerationParams,
    ) -> DomainResult<ModelStream> {
        let response = self.next_response(messages)?;
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for word in response.content.split_inclusive(' ') {
                if tx.send(Ok(StreamChunk::delta(word))).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(Ok(StreamChunk::finished("stop"))).await;
        });
        Ok(rx)
    }
}

/// Factory handing out [`MockProvider`]s.
///
/// Providers registered with [`MockProviderFactory::insert`] are returned
/// for their model id; any other model gets a fresh echoing provider.
#[derive(Default)]
pub struct MockProviderFactory {
    providers: Mutex<HashMap<String, Arc<MockProvider>>>,
    created: AtomicUsize,
}

impl MockProviderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, model_id: impl Into<String>, provider: Arc<MockProvider>) {
        self.providers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(model_id.into(), provider);
    }

    /// Number of successful `create` calls.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ProviderFactory for MockProviderFactory {
    fn create(
        &self,
        config: ModelConfig,
        capabilities: ModelCapabilities,
    ) -> DomainResult<Arc<dyn ModelProvider>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let registered = self
            .providers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&config.model_id())
            .cloned();

        Ok(match registered {
            Some(provider) => provider,
            None => Arc::new(MockProvider::new(config, capabilities)),
        })
    }

    fn supported(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL.to_vec()
    }
}
