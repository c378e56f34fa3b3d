// src/cli.rs
//! CLI definitions for the converge agent
//!
//! The command implementations live in the `commands` module.

use clap::{Parser, Subcommand};
use converge::config::DEFAULT_CONFIG_PATH;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "converge")]
#[command(version)]
#[command(about = "Reconciles packages, repositories and software recipes to a declared policy", long_about = None)]
pub struct Cli {
    /// Agent configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Reconcile the host once and exit
    Run,

    /// Reconcile every poll interval until interrupted
    Daemon,

    /// Show the package changes a run would make, without applying them
    Plan,

    /// List the recipes recorded in the ledger
    Recipes {
        /// Print the ledger rows as JSON
        #[arg(long)]
        json: bool,
    },
}
