// src/commands/run.rs

//! One-shot reconciliation

use anyhow::{Context, Result, bail};
use converge::agent::Agent;
use converge::config::AgentConfig;
use converge::exec::CancelToken;
use std::thread;
use tracing::warn;

/// Reconcile the host once; fails if any part of the run failed
pub fn cmd_run(config: &AgentConfig) -> Result<()> {
    let mut agent = Agent::from_config(config)?;
    let cancel = CancelToken::new();
    cancel_on_interrupt(cancel.clone())?;
    let report = agent.run(&cancel);

    if !report.is_success() {
        // Each error was already logged as it happened
        bail!("{} errors during run", report.errors.len());
    }
    Ok(())
}

/// Commands run in their own process group, so Ctrl-C has to be forwarded
/// as a cancellation
fn cancel_on_interrupt(cancel: CancelToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start signal handler")?;
    thread::spawn(move || {
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling run");
                cancel.cancel();
            }
        })
    });
    Ok(())
}
