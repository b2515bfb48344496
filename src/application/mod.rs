//! Application layer: service wiring and lifecycle.

pub mod runtime;

pub use runtime::{Maestro, RuntimeState};
