//! Agent CLI commands.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::Value;

use crate::application::Maestro;
use crate::cli::output::{flag_cell, output, table, truncate, CommandOutput};
use crate::domain::models::{
    AgentContext, AgentResponse, AgentType, ChunkType, ConfigMap, DEFAULT_PRIORITY,
};

#[derive(Args, Debug)]
pub struct AgentsArgs {
    #[command(subcommand)]
    pub command: AgentsCommands,
}

#[derive(Subcommand, Debug)]
pub enum AgentsCommands {
    /// List registered agents
    List {
        /// Only agents with this capability flag (e.g. streaming, tools)
        #[arg(long)]
        capability: Option<String>,
        /// Only agents of this adapter type (n8n, langchain, langgraph, mock)
        #[arg(short = 't', long = "type")]
        agent_type: Option<String>,
        /// Include disabled agents
        #[arg(long)]
        all: bool,
    },
    /// Show an agent's registry metadata
    Show {
        /// Agent id
        id: String,
    },
    /// Execute a query against an agent
    Run {
        /// Agent id
        id: String,
        /// Query text
        query: String,
        /// Stream chunks as they arrive
        #[arg(short, long)]
        stream: bool,
        /// Session id for the request context
        #[arg(long, default_value = "cli")]
        session: String,
    },
    /// Probe agent health
    Health {
        /// Agent id (all registered agents when omitted)
        id: Option<String>,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct AgentRow {
    pub id: String,
    pub agent_type: String,
    pub enabled: bool,
    pub priority: i64,
    pub capabilities: Vec<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct AgentListOutput {
    pub agents: Vec<AgentRow>,
    pub total: usize,
}

impl CommandOutput for AgentListOutput {
    fn to_human(&self) -> String {
        if self.agents.is_empty() {
            return "No agents found.".to_string();
        }

        let mut t = table(&["ID", "TYPE", "ENABLED", "PRIORITY", "CAPABILITIES"]);
        for agent in &self.agents {
            t.add_row(vec![
                comfy_table::Cell::new(&agent.id),
                comfy_table::Cell::new(&agent.agent_type),
                flag_cell(agent.enabled, "yes", "no"),
                comfy_table::Cell::new(agent.priority),
                comfy_table::Cell::new(truncate(&agent.capabilities.join(", "), 48)),
            ]);
        }
        format!("Found {} agent(s):\n{t}", self.total)
    }

    fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct AgentDetailOutput {
    pub id: String,
    pub metadata: ConfigMap,
}

impl CommandOutput for AgentDetailOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!("Agent: {}", self.id)];
        for (key, value) in &self.metadata {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            lines.push(format!("  {key}: {}", truncate(&rendered, 80)));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct RunOutput {
    #[serde(flatten)]
    pub response: AgentResponse,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let r = &self.response;
        let mut lines = vec![r.answer.clone()];
        if !r.thoughts.is_empty() {
            lines.push("\nThoughts:".to_string());
            for thought in &r.thoughts {
                lines.push(format!("  [{}] {}", thought.step, truncate(&thought.thought, 100)));
            }
        }
        if !r.citations.is_empty() {
            lines.push("\nCitations:".to_string());
            for citation in &r.citations {
                lines.push(format!("  - {}", citation.source));
            }
        }
        lines.push(format!(
            "\n{} via {} ({}) in {:.2}s",
            r.status.as_str(),
            r.agent_id,
            r.agent_type,
            r.execution_time
        ));
        if let Some(error) = &r.error {
            lines.push(format!("Error: {error}"));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> Value {
        serde_json::to_value(&self.response).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct HealthRow {
    pub id: String,
    pub healthy: bool,
    pub message: String,
}

#[derive(Debug, serde::Serialize)]
pub struct HealthOutput {
    pub agents: Vec<HealthRow>,
    pub healthy: usize,
    pub total: usize,
}

impl CommandOutput for HealthOutput {
    fn to_human(&self) -> String {
        let mut t = table(&["ID", "STATUS", "MESSAGE"]);
        for row in &self.agents {
            t.add_row(vec![
                comfy_table::Cell::new(&row.id),
                flag_cell(row.healthy, "healthy", "unhealthy"),
                comfy_table::Cell::new(truncate(&row.message, 60)),
            ]);
        }
        format!("{t}\n{}/{} healthy", self.healthy, self.total)
    }

    fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: AgentsArgs, json_mode: bool, config_path: Option<&Path>) -> Result<()> {
    let maestro = super::bootstrap(config_path).await?;
    let result = run(&maestro, args.command, json_mode).await;
    maestro.stop().await;
    result
}

async fn run(maestro: &Maestro, command: AgentsCommands, json_mode: bool) -> Result<()> {
    let registry = maestro.agent_registry();

    match command {
        AgentsCommands::List {
            capability,
            agent_type,
            all,
        } => {
            let mut ids = registry.list_agents(!all).await;
            if let Some(capability) = capability {
                let matching = registry.get_by_capability(&capability).await;
                ids.retain(|id| matching.contains(id));
            }
            if let Some(agent_type) = agent_type {
                let agent_type = AgentType::from_str(&agent_type)
                    .ok_or_else(|| anyhow::anyhow!("Invalid agent type: {agent_type}"))?;
                let matching = registry.get_by_type(agent_type).await;
                ids.retain(|id| matching.contains(id));
            }

            let mut agents = Vec::with_capacity(ids.len());
            for id in ids {
                let metadata = registry.get_metadata(&id).await.unwrap_or_default();
                let capabilities = registry
                    .get(&id)
                    .await
                    .map(|b| b.capabilities.enabled_flags().into_iter().map(String::from).collect())
                    .unwrap_or_default();
                agents.push(AgentRow {
                    agent_type: metadata
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string(),
                    enabled: metadata.get("enabled").and_then(Value::as_bool).unwrap_or(true),
                    priority: metadata.get("priority").and_then(Value::as_i64).unwrap_or(DEFAULT_PRIORITY),
                    capabilities,
                    id,
                });
            }

            let out = AgentListOutput {
                total: agents.len(),
                agents,
            };
            output(&out, json_mode);
        }

        AgentsCommands::Show { id } => {
            let metadata = registry
                .get_metadata(&id)
                .await
                .ok_or_else(|| anyhow::anyhow!("Agent not found: {id}"))?;
            output(&AgentDetailOutput { id, metadata }, json_mode);
        }

        AgentsCommands::Run {
            id,
            query,
            stream,
            session,
        } => {
            let handle = maestro
                .pool()
                .get_agent(&id, None)
                .await
                .with_context(|| format!("Failed to obtain agent '{id}'"))?;
            let context = AgentContext::new("cli", whoami(), session);

            if stream && !json_mode {
                let mut chunks = handle.agent().execute_streaming(&query, &context);
                let mut stdout = std::io::stdout();
                while let Some(chunk) = chunks.next_chunk().await {
                    match chunk.chunk_type {
                        ChunkType::Text => write!(stdout, "{}", chunk.content)?,
                        ChunkType::Thought => writeln!(stdout, "\n[thought] {}", chunk.content)?,
                        ChunkType::Status => writeln!(stdout, "\n[status] {}", chunk.content)?,
                        ChunkType::Citation => writeln!(stdout, "\n[source] {}", chunk.content)?,
                        ChunkType::Error => writeln!(stdout, "\n[error] {}", chunk.content)?,
                        ChunkType::Completion => writeln!(stdout)?,
                    }
                    stdout.flush()?;
                }
            } else if stream {
                let chunks = handle.agent().execute_streaming(&query, &context).collect_chunks().await;
                println!("{}", serde_json::to_string_pretty(&chunks)?);
            } else {
                let response = handle.agent().execute(&query, &context).await;
                output(&RunOutput { response }, json_mode);
            }

            maestro.pool().return_agent(handle).await;
        }

        AgentsCommands::Health { id } => {
            let ids = match id {
                Some(id) => vec![id],
                None => registry.list_agents(true).await,
            };

            let mut agents = Vec::with_capacity(ids.len());
            for id in ids {
                let row = match maestro.pool().get_agent(&id, None).await {
                    Ok(handle) => {
                        let status = handle.agent().health_check().await;
                        maestro.pool().return_agent(handle).await;
                        HealthRow {
                            id,
                            healthy: status.healthy,
                            message: status.message_or_default().to_string(),
                        }
                    }
                    Err(e) => HealthRow {
                        id,
                        healthy: false,
                        message: e.to_string(),
                    },
                };
                agents.push(row);
            }

            let out = HealthOutput {
                healthy: agents.iter().filter(|a| a.healthy).count(),
                total: agents.len(),
                agents,
            };
            output(&out, json_mode);
        }
    }

    Ok(())
}

fn whoami() -> String {
    std::env::var("USER").unwrap_or_else(|_| "cli".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn test_list_output_empty() {
        let out = AgentListOutput {
            agents: Vec::new(),
            total: 0,
        };
        assert_eq!(out.to_human(), "No agents found.");
    }

    #[test]
    fn test_health_output_summary_line() {
        let out = HealthOutput {
            agents: vec![HealthRow {
                id: "mock".to_string(),
                healthy: true,
                message: "ok".to_string(),
            }],
            healthy: 1,
            total: 1,
        };
        assert!(out.to_human().ends_with("1/1 healthy"));
        assert_eq!(out.to_json()["agents"][0]["id"], "mock");
    }

    #[test]
    fn test_detail_output_renders_strings_unquoted() {
        let mut metadata = Map::new();
        metadata.insert("type".to_string(), Value::String("n8n".to_string()));
        let out = AgentDetailOutput {
            id: "n8n".to_string(),
            metadata,
        };
        assert!(out.to_human().contains("  type: n8n"));
    }
}
