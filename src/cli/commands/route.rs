//! Routing CLI commands.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::Value;

use crate::application::Maestro;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{
    ChatMessage, GenerationParams, ModelCapability, ModelResponse, ProviderKind, RoutingContext,
    RoutingStrategy,
};

#[derive(Args, Debug)]
pub struct RouteArgs {
    #[command(subcommand)]
    pub command: RouteCommands,
}

/// Routing constraints shared by every route command.
#[derive(Args, Debug, Default)]
pub struct RoutingOpts {
    /// Strategy (cost, performance, quality, balanced, round_robin, manual)
    #[arg(short, long)]
    pub strategy: Option<String>,
    /// Required capabilities, comma separated
    #[arg(long, value_delimiter = ',')]
    pub require: Vec<String>,
    /// Minimum context window in tokens
    #[arg(long)]
    pub min_context: Option<u32>,
    /// Maximum average price per 1k tokens
    #[arg(long)]
    pub max_cost: Option<f64>,
    /// Preferred providers, comma separated
    #[arg(long, value_delimiter = ',')]
    pub prefer: Vec<String>,
    /// Excluded providers, comma separated
    #[arg(long, value_delimiter = ',')]
    pub exclude: Vec<String>,
    /// Model id for manual routing (implies --strategy manual)
    #[arg(short, long)]
    pub model: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum RouteCommands {
    /// Show which model a request would be routed to
    Select {
        #[command(flatten)]
        opts: RoutingOpts,
    },
    /// Route a prompt and print the completion
    Complete {
        /// Prompt text
        prompt: String,
        /// Optional system prompt
        #[arg(long)]
        system: Option<String>,
        /// Stream the completion
        #[arg(long)]
        stream: bool,
        /// Completion token limit
        #[arg(long)]
        max_tokens: Option<u32>,
        #[command(flatten)]
        opts: RoutingOpts,
    },
    /// Show router statistics
    Stats,
}

impl RoutingOpts {
    /// Build the routing context, starting from `default_strategy`.
    pub fn to_context(&self, default_strategy: RoutingStrategy) -> Result<RoutingContext> {
        let strategy = match (&self.strategy, &self.model) {
            (Some(name), _) => RoutingStrategy::from_str(name)
                .ok_or_else(|| anyhow::anyhow!("Invalid strategy: {name}"))?,
            (None, Some(_)) => RoutingStrategy::Manual,
            (None, None) => default_strategy,
        };

        let mut context = RoutingContext::new(strategy);
        context.manual_model.clone_from(&self.model);
        context.min_context_length = self.min_context;
        context.max_cost_per_1k_tokens = self.max_cost;
        context.required_capabilities = self
            .require
            .iter()
            .map(|name| {
                ModelCapability::from_str(name)
                    .ok_or_else(|| anyhow::anyhow!("Invalid capability: {name}"))
            })
            .collect::<Result<_>>()?;
        context.preferred_providers = parse_providers(&self.prefer)?;
        context.excluded_providers = parse_providers(&self.exclude)?;
        Ok(context)
    }
}

fn parse_providers(names: &[String]) -> Result<Vec<ProviderKind>> {
    names
        .iter()
        .map(|name| {
            ProviderKind::from_str(name).ok_or_else(|| anyhow::anyhow!("Invalid provider: {name}"))
        })
        .collect()
}

#[derive(Debug, serde::Serialize)]
pub struct SelectionOutput {
    pub strategy: String,
    pub model_id: String,
    pub display_name: String,
    pub average_cost_per_1k: f64,
    pub max_context_length: u32,
}

impl CommandOutput for SelectionOutput {
    fn to_human(&self) -> String {
        format!(
            "{} -> {} ({})\n  context: {} tokens\n  avg cost: ${:.5}/1k tokens",
            self.strategy,
            self.model_id,
            self.display_name,
            self.max_context_length,
            self.average_cost_per_1k
        )
    }

    fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct CompletionOutput {
    #[serde(flatten)]
    pub response: ModelResponse,
}

impl CommandOutput for CompletionOutput {
    fn to_human(&self) -> String {
        let r = &self.response;
        let mut lines = vec![r.content.clone(), String::new()];
        let routed = r
            .metadata
            .get("model_id")
            .and_then(Value::as_str)
            .unwrap_or(&r.model);
        lines.push(format!("model: {routed}"));
        if r.metadata.get("is_fallback").and_then(Value::as_bool).unwrap_or(false) {
            lines.push("served by fallback".to_string());
        }
        if let Some(usage) = &r.usage {
            lines.push(format!(
                "tokens: {} prompt + {} completion",
                usage.prompt_tokens, usage.completion_tokens
            ));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> Value {
        serde_json::to_value(&self.response).unwrap_or_default()
    }
}

pub async fn execute(args: RouteArgs, json_mode: bool, config_path: Option<&Path>) -> Result<()> {
    let maestro = super::bootstrap(config_path).await?;
    let result = run(&maestro, args.command, json_mode).await;
    maestro.stop().await;
    result
}

async fn run(maestro: &Maestro, command: RouteCommands, json_mode: bool) -> Result<()> {
    let router = maestro.router();
    let default_strategy = router.settings().default_strategy;

    match command {
        RouteCommands::Select { opts } => {
            let context = opts.to_context(default_strategy)?;
            let model = router.select_model(&context).await?;
            let out = SelectionOutput {
                strategy: context.strategy.as_str().to_string(),
                model_id: model.id(),
                display_name: model.display_name.clone(),
                average_cost_per_1k: model.capabilities.average_cost_per_1k(),
                max_context_length: model.capabilities.max_context_length,
            };
            output(&out, json_mode);
        }

        RouteCommands::Complete {
            prompt,
            system,
            stream,
            max_tokens,
            opts,
        } => {
            let context = opts.to_context(default_strategy)?;
            let mut messages = Vec::new();
            if let Some(system) = system {
                messages.push(ChatMessage::system(system));
            }
            messages.push(ChatMessage::user(prompt));
            let params = GenerationParams {
                max_tokens,
                ..GenerationParams::default()
            };

            if stream {
                let mut chunks = router
                    .route_stream(&messages, &context, &params)
                    .await
                    .context("Failed to start streamed completion")?;
                let mut stdout = std::io::stdout();
                while let Some(chunk) = chunks.recv().await {
                    let chunk = chunk?;
                    write!(stdout, "{}", chunk.content)?;
                    stdout.flush()?;
                }
                writeln!(stdout)?;
            } else {
                let response = router.route(&messages, &context, &params).await?;
                output(&CompletionOutput { response }, json_mode);
            }
        }

        RouteCommands::Stats => {
            let stats = router.routing_stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
