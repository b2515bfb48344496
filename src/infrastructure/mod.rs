//! Infrastructure layer module
//!
//! Cross-cutting technical concerns used by adapters and services:
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)
//! - Retry policy for outbound calls

pub mod config;
pub mod logging;
pub mod retry;

pub use retry::RetryPolicy;
