// src/commands/mod.rs
//! Command handlers for the converge CLI

mod daemon;
mod plan;
mod recipes;
mod run;

pub use daemon::cmd_daemon;
pub use plan::cmd_plan;
pub use recipes::cmd_recipes;
pub use run::cmd_run;
