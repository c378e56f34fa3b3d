// src/commands/plan.rs

//! Dry-run view of package changes

use anyhow::Result;
use converge::agent::Agent;
use converge::config::AgentConfig;
use converge::exec::CancelToken;

/// Print what a run would install, upgrade and remove per manager
pub fn cmd_plan(config: &AgentConfig) -> Result<()> {
    let agent = Agent::from_config(config)?;
    let plans = agent.plan(&CancelToken::new());

    if plans.is_empty() {
        println!("No supported package managers found.");
        return Ok(());
    }

    let mut failed = 0;
    for (manager, result) in &plans {
        match result {
            Ok(changes) if changes.is_empty() => println!("{}: up to date", manager),
            Ok(changes) => {
                println!("{}:", manager);
                for line in changes.to_string().lines() {
                    println!("  {}", line);
                }
            }
            Err(e) => {
                failed += 1;
                println!("{}: failed to plan: {}", manager, e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} managers could not be planned", failed, plans.len());
    }
    Ok(())
}
