//! Domain layer for maestro
//!
//! Core models, ports, and errors shared by adapters and services.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
