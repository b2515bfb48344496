//! CLI command implementations.

pub mod agents;
pub mod models;
pub mod route;

use std::path::Path;

use anyhow::{Context, Result};

use crate::application::Maestro;
use crate::infrastructure::config::ConfigLoader;

/// Load configuration and start the services for a one-shot command.
///
/// Background health monitoring is left off; commands probe on demand.
pub(crate) async fn bootstrap(config_path: Option<&Path>) -> Result<Maestro> {
    let mut config = match config_path {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    config.health.enabled = false;

    let maestro = Maestro::new(config).context("Failed to assemble maestro services")?;
    maestro.start().await?;
    Ok(maestro)
}
