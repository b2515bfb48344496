//! Model catalog CLI commands.

use std::path::Path;

use anyhow::Result;
use clap::{Args, Subcommand};
use comfy_table::Cell;
use serde_json::Value;

use crate::application::Maestro;
use crate::cli::output::{flag_cell, output, table, CommandOutput};
use crate::domain::models::{ModelCapability, ModelInfo, ProviderKind};
use crate::services::ModelFilter;

#[derive(Args, Debug)]
pub struct ModelsArgs {
    #[command(subcommand)]
    pub command: ModelsCommands,
}

#[derive(Subcommand, Debug)]
pub enum ModelsCommands {
    /// List catalog models
    List {
        /// Only models of this provider
        #[arg(short, long)]
        provider: Option<String>,
        /// Only models carrying any of these tags
        #[arg(short, long, value_delimiter = ',')]
        tag: Vec<String>,
        /// Include unavailable models
        #[arg(long)]
        all: bool,
    },
    /// Find available models with a capability, cheapest first
    Find {
        /// Capability (streaming, function_calling, vision, json_mode, system_messages)
        capability: String,
        /// Minimum context window in tokens
        #[arg(long)]
        min_context: Option<u32>,
        /// Maximum average price per 1k tokens
        #[arg(long)]
        max_cost: Option<f64>,
    },
    /// Probe model health through their providers
    Health {
        /// Model id (all models when omitted)
        id: Option<String>,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct ModelRow {
    pub id: String,
    pub display_name: String,
    pub available: bool,
    pub context: u32,
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
    pub tags: Vec<String>,
}

impl From<&ModelInfo> for ModelRow {
    fn from(info: &ModelInfo) -> Self {
        Self {
            id: info.id(),
            display_name: info.display_name.clone(),
            available: info.is_available,
            context: info.capabilities.max_context_length,
            input_cost_per_1k: info.capabilities.cost_per_1k_input_tokens,
            output_cost_per_1k: info.capabilities.cost_per_1k_output_tokens,
            tags: info.tags.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ModelListOutput {
    pub models: Vec<ModelRow>,
    pub total: usize,
}

impl CommandOutput for ModelListOutput {
    fn to_human(&self) -> String {
        if self.models.is_empty() {
            return "No models found.".to_string();
        }

        let mut t = table(&["ID", "NAME", "STATUS", "CONTEXT", "IN $/1K", "OUT $/1K", "TAGS"]);
        for model in &self.models {
            t.add_row(vec![
                Cell::new(&model.id),
                Cell::new(&model.display_name),
                flag_cell(model.available, "available", "unavailable"),
                Cell::new(model.context),
                Cell::new(format!("{:.5}", model.input_cost_per_1k)),
                Cell::new(format!("{:.5}", model.output_cost_per_1k)),
                Cell::new(model.tags.join(",")),
            ]);
        }
        format!("Found {} model(s):\n{t}", self.total)
    }

    fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ModelHealthRow {
    pub id: String,
    pub healthy: bool,
    pub failures: u32,
    pub error: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct ModelHealthOutput {
    pub models: Vec<ModelHealthRow>,
    pub healthy: usize,
    pub total: usize,
}

impl CommandOutput for ModelHealthOutput {
    fn to_human(&self) -> String {
        let mut t = table(&["ID", "STATUS", "FAILURES", "ERROR"]);
        for row in &self.models {
            t.add_row(vec![
                Cell::new(&row.id),
                flag_cell(row.healthy, "healthy", "unhealthy"),
                Cell::new(row.failures),
                Cell::new(row.error.as_deref().unwrap_or("")),
            ]);
        }
        format!("{t}\n{}/{} healthy", self.healthy, self.total)
    }

    fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: ModelsArgs, json_mode: bool, config_path: Option<&Path>) -> Result<()> {
    let maestro = super::bootstrap(config_path).await?;
    let result = run(&maestro, args.command, json_mode).await;
    maestro.stop().await;
    result
}

async fn run(maestro: &Maestro, command: ModelsCommands, json_mode: bool) -> Result<()> {
    let registry = maestro.model_registry();

    match command {
        ModelsCommands::List { provider, tag, all } => {
            let mut filter = if all { ModelFilter::all() } else { ModelFilter::default() };
            if let Some(provider) = provider {
                filter = filter.with_provider(parse_provider(&provider)?);
            }
            filter.tags = tag;

            let models = registry.list_models(&filter).await;
            let out = ModelListOutput {
                total: models.len(),
                models: models.iter().map(ModelRow::from).collect(),
            };
            output(&out, json_mode);
        }

        ModelsCommands::Find {
            capability,
            min_context,
            max_cost,
        } => {
            let capability = ModelCapability::from_str(&capability)
                .ok_or_else(|| anyhow::anyhow!("Invalid capability: {capability}"))?;
            let models = registry
                .find_models_by_capability(capability, min_context, max_cost)
                .await;
            let out = ModelListOutput {
                total: models.len(),
                models: models.iter().map(ModelRow::from).collect(),
            };
            output(&out, json_mode);
        }

        ModelsCommands::Health { id } => {
            let models = match id {
                Some(id) => vec![registry
                    .get_model(&id)
                    .await
                    .ok_or_else(|| anyhow::anyhow!("Model not found: {id}"))?],
                None => registry.list_models(&ModelFilter::all()).await,
            };

            let mut rows = Vec::with_capacity(models.len());
            for model in models {
                let model_id = model.id();
                let row = match maestro.router().provider_for(&model).await {
                    Ok(_) => {
                        let healthy = registry.health_check(&model_id).await;
                        let failures = registry
                            .get_model(&model_id)
                            .await
                            .map_or(0, |m| m.health_check_failures);
                        ModelHealthRow {
                            id: model_id,
                            healthy,
                            failures,
                            error: None,
                        }
                    }
                    Err(e) => ModelHealthRow {
                        id: model_id,
                        healthy: false,
                        failures: model.health_check_failures,
                        error: Some(e.to_string()),
                    },
                };
                rows.push(row);
            }

            let out = ModelHealthOutput {
                healthy: rows.iter().filter(|r| r.healthy).count(),
                total: rows.len(),
                models: rows,
            };
            output(&out, json_mode);
        }
    }

    Ok(())
}

fn parse_provider(name: &str) -> Result<ProviderKind> {
    ProviderKind::from_str(name).ok_or_else(|| anyhow::anyhow!("Invalid provider: {name}"))
}
