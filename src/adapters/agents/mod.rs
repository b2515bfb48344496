//! Agent backend adapters.
//!
//! Provides implementations of the `Agent` port:
//! - `WebhookAgent` - external workflow engine reached over HTTP (`n8n`)
//! - `ExecutorAgent` - tool-calling loop over a model provider (`langchain`)
//! - `GraphAgent` - multi-step reasoning graph (`langgraph`)
//! - `MockAgent` - backend-free agent for tests and dry runs (`mock`)
//!
//! [`AdapterCatalog`] is the static registration table the agent registry
//! is initialized from.

pub mod executor;
pub mod graph;
pub mod mock;
pub mod tools;
pub mod webhook;

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::Client;
use serde_json::Value;

pub use executor::ExecutorAgent;
pub use graph::GraphAgent;
pub use mock::{MockAgent, MockState};
pub use webhook::WebhookAgent;

use crate::adapters::providers::HttpProviderFactory;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AgentType, ConfigMap, ProviderCredentials};
use crate::domain::ports::{Agent, AgentBlueprint, GraphWorkflow, ProviderFactory};

/// Shared resources handed to adapter constructors.
#[derive(Clone)]
pub struct AdapterDeps {
    pub http: Client,
    pub providers: Arc<dyn ProviderFactory>,
    pub credentials: BTreeMap<String, ProviderCredentials>,
    /// Graph implementation; the graph adapter is unavailable without one
    pub workflow: Option<Arc<dyn GraphWorkflow>>,
}

impl AdapterDeps {
    pub fn new(http: Client, providers: Arc<dyn ProviderFactory>) -> Self {
        Self {
            http,
            providers,
            credentials: BTreeMap::new(),
            workflow: None,
        }
    }

    pub fn with_credentials(mut self, credentials: BTreeMap<String, ProviderCredentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_workflow(mut self, workflow: Arc<dyn GraphWorkflow>) -> Self {
        self.workflow = Some(workflow);
        self
    }
}

impl Default for AdapterDeps {
    fn default() -> Self {
        let http = Client::new();
        let providers = Arc::new(HttpProviderFactory::new(http.clone()));
        Self::new(http, providers)
    }
}

/// Builds the blueprint of one catalog entry from the shared dependencies and
/// the registry metadata configured for it.
pub type BlueprintBuilder = fn(&AdapterDeps, &ConfigMap) -> DomainResult<AgentBlueprint>;

/// One row of the registration table.
#[derive(Clone, Copy)]
pub struct CatalogEntry {
    pub agent_id: &'static str,
    pub agent_type: AgentType,
    pub build: BlueprintBuilder,
}

/// Static table of the adapters shipped with the crate.
#[derive(Clone)]
pub struct AdapterCatalog {
    deps: AdapterDeps,
    entries: Vec<CatalogEntry>,
}

impl AdapterCatalog {
    /// The built-in adapters under their conventional ids.
    pub fn builtin(deps: AdapterDeps) -> Self {
        Self {
            deps,
            entries: vec![
                CatalogEntry {
                    agent_id: "n8n",
                    agent_type: AgentType::N8n,
                    build: webhook_blueprint,
                },
                CatalogEntry {
                    agent_id: "langchain",
                    agent_type: AgentType::Langchain,
                    build: executor_blueprint,
                },
                CatalogEntry {
                    agent_id: "langgraph",
                    agent_type: AgentType::Langgraph,
                    build: graph_blueprint,
                },
                CatalogEntry {
                    agent_id: "mock",
                    agent_type: AgentType::Mock,
                    build: mock_blueprint,
                },
            ],
        }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn deps(&self) -> &AdapterDeps {
        &self.deps
    }

    /// Build the blueprint of `entry`.
    pub fn build(&self, entry: &CatalogEntry, metadata: &ConfigMap) -> DomainResult<AgentBlueprint> {
        (entry.build)(&self.deps, metadata)
    }
}

fn webhook_blueprint(deps: &AdapterDeps, _metadata: &ConfigMap) -> DomainResult<AgentBlueprint> {
    let http = deps.http.clone();
    Ok(AgentBlueprint::new(
        AgentType::N8n,
        WebhookAgent::static_capabilities(),
        move |config| Ok(Arc::new(WebhookAgent::new(config, http.clone())?) as Arc<dyn Agent>),
    ))
}

fn executor_blueprint(deps: &AdapterDeps, metadata: &ConfigMap) -> DomainResult<AgentBlueprint> {
    let has_tools = metadata
        .get("tools")
        .and_then(Value::as_array)
        .is_some_and(|tools| !tools.is_empty());
    let providers = deps.providers.clone();
    let credentials = deps.credentials.clone();
    Ok(AgentBlueprint::new(
        AgentType::Langchain,
        ExecutorAgent::capabilities_for(has_tools),
        move |config| {
            Ok(Arc::new(ExecutorAgent::new(config, providers.as_ref(), &credentials)?) as Arc<dyn Agent>)
        },
    ))
}

fn graph_blueprint(deps: &AdapterDeps, _metadata: &ConfigMap) -> DomainResult<AgentBlueprint> {
    let workflow = deps
        .workflow
        .clone()
        .ok_or_else(|| DomainError::config("no graph workflow is configured"))?;
    Ok(AgentBlueprint::new(
        AgentType::Langgraph,
        GraphAgent::static_capabilities(),
        move |config| Ok(Arc::new(GraphAgent::new(config, workflow.clone())?) as Arc<dyn Agent>),
    ))
}

fn mock_blueprint(_deps: &AdapterDeps, _metadata: &ConfigMap) -> DomainResult<AgentBlueprint> {
    Ok(AgentBlueprint::new(
        AgentType::Mock,
        MockAgent::static_capabilities(),
        |config| Ok(Arc::new(MockAgent::new(config)?) as Arc<dyn Agent>),
    ))
}

/// Blueprint producing mock agents that report into `state`.
pub fn mock_blueprint_with_state(state: Arc<MockState>) -> AgentBlueprint {
    AgentBlueprint::new(AgentType::Mock, MockAgent::static_capabilities(), move |config| {
        Ok(Arc::new(MockAgent::with_state(config, state.clone())?) as Arc<dyn Agent>)
    })
}
