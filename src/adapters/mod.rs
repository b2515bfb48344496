//! Adapters for external systems: agent backends and model providers.

pub mod agents;
pub mod providers;
