// src/main.rs

use anyhow::Result;
use clap::Parser;
use converge::config::AgentConfig;
use tracing::debug;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let config = AgentConfig::load(&cli.config)?;
    debug!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Commands::Run => commands::cmd_run(&config),
        Commands::Daemon => commands::cmd_daemon(&config),
        Commands::Plan => commands::cmd_plan(&config),
        Commands::Recipes { json } => commands::cmd_recipes(&config, json),
    }
}
