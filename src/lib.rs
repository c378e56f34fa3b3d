// src/lib.rs

//! Converge host agent
//!
//! Keeps a host in line with a declared policy: which packages are present,
//! removed or kept current, which repositories the package managers trust,
//! and which custom software recipes have been installed.
//!
//! # Architecture
//!
//! - Two policy sources: a local file and a remote lookup service, merged
//!   with remote entries taking precedence
//! - One adapter per native package manager (apt, yum, zypper, googet),
//!   driven through the same plan, batch and repair loop
//! - Managed repository files rewritten only when their content changes
//! - Recipes tracked in an on-disk ledger so each version runs once
//! - Every failure collected into a per-run report instead of aborting

pub mod agent;
pub mod atomic;
pub mod client;
pub mod config;
pub mod daemon;
mod error;
pub mod exec;
pub mod executor;
pub mod hash;
pub mod packages;
pub mod plan;
pub mod policy;
pub mod recipe;
pub mod repository;

pub use agent::{Agent, Reconcile, RunReport};
pub use config::AgentConfig;
pub use error::{AggregateError, Error, Result, ScopedError};
pub use exec::{CancelToken, CommandRunner, SystemRunner};
pub use policy::{EffectivePolicy, Manager, PolicyDocument};
