//! Maestro CLI entry point.

use clap::Parser;

use maestro::cli::{Cli, Commands};
use maestro::infrastructure::config::ConfigLoader;
use maestro::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logging follows the loaded configuration when it parses; command
    // execution reports configuration errors itself.
    let log_config = match cli.config.as_deref() {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
    .map(|config| LogConfig::from(&config.logging))
    .unwrap_or_default();
    let _logger = match LoggerImpl::init(&log_config) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("Warning: logging disabled: {err:#}");
            None
        }
    };

    let config_path = cli.config.as_deref();
    let result = match cli.command {
        Commands::Agents(args) => {
            maestro::cli::commands::agents::execute(args, cli.json, config_path).await
        }
        Commands::Models(args) => {
            maestro::cli::commands::models::execute(args, cli.json, config_path).await
        }
        Commands::Route(args) => {
            maestro::cli::commands::route::execute(args, cli.json, config_path).await
        }
    };

    if let Err(err) = result {
        maestro::cli::handle_error(err, cli.json);
    }
}
