//! Maestro - AI agent orchestration and model routing
//!
//! Maestro puts heterogeneous AI agent backends behind one contract and routes
//! LLM requests across providers by cost, speed or quality, with health
//! monitoring and fallback chains.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Models, ports and errors
//! - **Adapters** (`adapters`): Agent backends and model provider clients
//! - **Service Layer** (`services`): Registries, factory, pool and router
//! - **Application Layer** (`application`): Service wiring and lifecycle
//! - **Infrastructure Layer** (`infrastructure`): Configuration, logging, retry
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```rust,no_run
//! use maestro::application::Maestro;
//! use maestro::domain::models::{ChatMessage, GenerationParams, RoutingContext, RoutingStrategy};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let maestro = Maestro::new(maestro::ConfigLoader::load()?)?;
//!     maestro.start().await?;
//!
//!     let response = maestro
//!         .router()
//!         .route(
//!             &[ChatMessage::user("Summarize the release notes")],
//!             &RoutingContext::new(RoutingStrategy::CostOptimized),
//!             &GenerationParams::default(),
//!         )
//!         .await?;
//!     println!("{}", response.content);
//!
//!     maestro.stop().await;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{Maestro, RuntimeState};
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    AgentConfig, AgentContext, AgentResponse, AgentStreamChunk, AgentType, Config, ModelInfo,
    RoutingContext, RoutingStrategy,
};
pub use domain::ports::{Agent, AgentStream, ModelProvider};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    AgentFactory, AgentPoolManager, AgentRegistry, ModelRegistry, ModelRouter,
};
