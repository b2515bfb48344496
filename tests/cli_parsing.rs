use clap::Parser;
use maestro::cli::commands::agents::AgentsCommands;
use maestro::cli::commands::models::ModelsCommands;
use maestro::cli::commands::route::RouteCommands;
use maestro::cli::{Cli, Commands};
use maestro::domain::models::{ModelCapability, RoutingStrategy};

#[test]
fn test_parse_agents_run() {
    let cli = Cli::try_parse_from([
        "maestro", "agents", "run", "n8n", "What changed?", "--stream", "--session", "s-1",
    ])
    .unwrap();

    match cli.command {
        Commands::Agents(args) => match args.command {
            AgentsCommands::Run {
                id,
                query,
                stream,
                session,
            } => {
                assert_eq!(id, "n8n");
                assert_eq!(query, "What changed?");
                assert!(stream);
                assert_eq!(session, "s-1");
            }
            _ => panic!("Wrong agents command"),
        },
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_models_find() {
    let cli = Cli::try_parse_from([
        "maestro", "--json", "models", "find", "vision", "--min-context", "100000",
    ])
    .unwrap();
    assert!(cli.json);

    match cli.command {
        Commands::Models(args) => match args.command {
            ModelsCommands::Find {
                capability,
                min_context,
                max_cost,
            } => {
                assert_eq!(capability, "vision");
                assert_eq!(min_context, Some(100_000));
                assert!(max_cost.is_none());
            }
            _ => panic!("Wrong models command"),
        },
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_route_select_constraints() {
    let cli = Cli::try_parse_from([
        "maestro",
        "route",
        "select",
        "--strategy",
        "quality",
        "--require",
        "vision,streaming",
        "--exclude",
        "openai",
        "--config",
        "/tmp/maestro.yaml",
    ])
    .unwrap();
    assert_eq!(
        cli.config.as_deref(),
        Some(std::path::Path::new("/tmp/maestro.yaml"))
    );

    match cli.command {
        Commands::Route(args) => match args.command {
            RouteCommands::Select { opts } => {
                let context = opts.to_context(RoutingStrategy::Balanced).unwrap();
                assert_eq!(context.strategy, RoutingStrategy::QualityOptimized);
                assert_eq!(
                    context.required_capabilities,
                    vec![ModelCapability::Vision, ModelCapability::Streaming]
                );
                assert_eq!(context.excluded_providers.len(), 1);
            }
            _ => panic!("Wrong route command"),
        },
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_unknown_subcommand_is_rejected() {
    assert!(Cli::try_parse_from(["maestro", "tasks", "list"]).is_err());
}
