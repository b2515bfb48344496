//! Common test utilities for integration tests
//!
//! Shared fixtures and helpers used across the integration test files.

use std::sync::Arc;

use maestro::adapters::agents::{AdapterDeps, MockState};
use maestro::adapters::providers::MockProviderFactory;
use maestro::domain::models::{AgentConfig, AgentContext, Config};
use serde_json::json;
use tempfile::TempDir;

/// Create a temporary directory for test isolation
#[allow(dead_code)]
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Setup test logging
///
/// Initializes a tracing subscriber writing to the test output.
#[allow(dead_code)]
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Request context used by most agent tests
#[allow(dead_code)]
pub fn context() -> AgentContext {
    AgentContext::new("tenant-1", "user-1", "session-1")
}

/// Webhook agent config pointing at `url`, with fast retries
#[allow(dead_code)]
pub fn webhook_config(url: &str, retry_count: u32) -> AgentConfig {
    AgentConfig::new("n8n")
        .with_setting("webhook_url", json!(url))
        .with_setting("retry_count", json!(retry_count))
        .with_setting("retry_delay_ms", json!(10))
        .with_setting("timeout", json!(5))
}

/// Adapter dependencies that never leave the process
#[allow(dead_code)]
pub fn mock_deps() -> (AdapterDeps, Arc<MockProviderFactory>) {
    let providers = Arc::new(MockProviderFactory::new());
    let deps = AdapterDeps::new(reqwest::Client::new(), providers.clone());
    (deps, providers)
}

/// Configuration without background monitoring
#[allow(dead_code)]
pub fn quiet_config() -> Config {
    let mut config = Config::default();
    config.health.enabled = false;
    config
}

/// Fresh mock agent state
#[allow(dead_code)]
pub fn mock_state() -> Arc<MockState> {
    MockState::new()
}
