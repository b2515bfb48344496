//! Mock agent for tests and dry runs.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AgentCapabilities, AgentConfig, AgentContext, AgentResponse, AgentStreamChunk, AgentType,
    HealthStatus,
};
use crate::domain::ports::{Agent, AgentDescriptor, AgentStream};

/// Adapter-specific configuration keys.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MockSettings {
    /// Fixed answer; defaults to echoing the query
    #[serde(default)]
    pub answer: Option<String>,
    /// Every execution fails with this message
    #[serde(default)]
    pub fail_with: Option<String>,
    /// `initialize` fails with this message
    #[serde(default)]
    pub initialize_error: Option<String>,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default = "default_healthy")]
    pub healthy: bool,
}

const fn default_healthy() -> bool {
    true
}

/// Observable state shared between mock instances and the test that built
/// them.
#[derive(Debug)]
pub struct MockState {
    healthy: AtomicBool,
    executions: AtomicUsize,
    cleanups: AtomicUsize,
    health_checks: AtomicUsize,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            executions: AtomicUsize::new(0),
            cleanups: AtomicUsize::new(0),
            health_checks: AtomicUsize::new(0),
        }
    }
}

impl MockState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }
}

/// Agent that answers without any backend.
pub struct MockAgent {
    descriptor: AgentDescriptor,
    settings: MockSettings,
    state: Arc<MockState>,
}

impl MockAgent {
    pub fn new(config: &AgentConfig) -> DomainResult<Self> {
        Self::with_state(config, MockState::new())
    }

    /// Build an instance reporting into `state`.
    pub fn with_state(config: &AgentConfig, state: Arc<MockState>) -> DomainResult<Self> {
        let settings: MockSettings = config.settings()?;
        if !settings.healthy {
            state.set_healthy(false);
        }
        Ok(Self {
            descriptor: AgentDescriptor::from_config(config, AgentType::Mock),
            settings,
            state,
        })
    }

    pub fn static_capabilities() -> AgentCapabilities {
        AgentCapabilities {
            supports_streaming: true,
            supports_memory: true,
            ..AgentCapabilities::default()
        }
    }

    fn answer_for(&self, query: &str) -> String {
        self.settings
            .answer
            .clone()
            .unwrap_or_else(|| format!("Echo: {query}"))
    }

    async fn pause(&self) {
        if self.settings.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.settings.delay_ms)).await;
        }
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, query: &str, _context: &AgentContext) -> AgentResponse {
        let started_at = Utc::now();
        self.state.executions.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        match &self.settings.fail_with {
            Some(error) => AgentResponse::failed(&self.descriptor.agent_id, AgentType::Mock, error, started_at),
            None => AgentResponse::completed(
                &self.descriptor.agent_id,
                AgentType::Mock,
                self.answer_for(query),
                started_at,
            ),
        }
    }

    fn execute_streaming(&self, query: &str, _context: &AgentContext) -> AgentStream {
        self.state.executions.fetch_add(1, Ordering::SeqCst);
        let answer = self.answer_for(query);
        let failure = self.settings.fail_with.clone();

        AgentStream::spawn(move |sink| async move {
            if let Some(error) = failure {
                return Err(DomainError::backend(error));
            }
            for word in answer.split_inclusive(' ') {
                if !sink.emit(AgentStreamChunk::text(word)).await {
                    break;
                }
            }
            Ok(())
        })
    }

    fn capabilities(&self) -> AgentCapabilities {
        Self::static_capabilities()
    }

    async fn health_check(&self) -> HealthStatus {
        self.state.health_checks.fetch_add(1, Ordering::SeqCst);
        if self.state.healthy.load(Ordering::SeqCst) {
            HealthStatus::healthy("Mock agent is healthy")
                .with_detail("agent_id", json!(self.descriptor.agent_id))
        } else {
            HealthStatus::unhealthy("Mock agent is configured unhealthy")
        }
    }

    async fn initialize(&self) -> DomainResult<()> {
        match &self.settings.initialize_error {
            Some(error) => Err(DomainError::backend(error.clone())),
            None => Ok(()),
        }
    }

    async fn cleanup(&self) {
        self.state.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}
