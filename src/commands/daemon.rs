// src/commands/daemon.rs

//! Long-running service mode

use anyhow::{Context, Result};
use converge::agent::Agent;
use converge::config::AgentConfig;
use converge::daemon::run_daemon;
use tracing::info;

pub fn cmd_daemon(config: &AgentConfig) -> Result<()> {
    let poll_interval = config.poll_interval()?;

    // Built before the runtime starts: the agent owns blocking HTTP clients
    let agent = Agent::from_config(config)?;
    info!("Agent state in {}", config.state_dir.display());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(run_daemon(agent, poll_interval))?;
    Ok(())
}
