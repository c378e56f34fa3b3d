// src/agent.rs

//! Top-level reconciliation run
//!
//! One run fetches both policy sources, merges them, then drives the policy
//! executor (repositories and packages) and the recipe runner. The two halves
//! are independent: a package failure never keeps recipes from running and
//! the reverse. Every failure ends up in the run's [`RunReport`].

use crate::client::HttpClient;
use crate::config::AgentConfig;
use crate::error::{AggregateError, Error, Result};
use crate::exec::{CancelToken, CommandRunner, SystemRunner};
use crate::executor::{PolicyExecutor, RetryPolicy};
use crate::packages::{HostCapabilities, adapters_for};
use crate::plan::Changes;
use crate::policy::{
    EffectivePolicy, LocalPolicySource, Manager, PolicyDocument, PolicySource, RemotePolicySource,
    merge,
};
use crate::recipe::{RecipeDb, RecipeRunner};
use crate::repository::RepoFiles;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

type LocalSource = Box<dyn PolicySource<Output = PolicyDocument>>;
type RemoteSource = Box<dyn PolicySource<Output = EffectivePolicy>>;

/// Outcome of one reconciliation run
#[derive(Debug, Default)]
pub struct RunReport {
    pub errors: AggregateError,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            write!(f, "run completed in {:.1}s", self.elapsed.as_secs_f64())
        } else {
            write!(
                f,
                "run completed in {:.1}s with {} errors:\n{}",
                self.elapsed.as_secs_f64(),
                self.errors.len(),
                self.errors
            )
        }
    }
}

/// Anything the daemon can ask to reconcile the host
pub trait Reconcile: Send + 'static {
    fn reconcile(&mut self, cancel: &CancelToken) -> RunReport;
}

pub struct Agent {
    local: Option<LocalSource>,
    remote: Option<RemoteSource>,
    executor: PolicyExecutor,
    recipes: RecipeRunner,
    ledger_path: PathBuf,
    ledger: Option<RecipeDb>,
}

impl Agent {
    pub fn new(executor: PolicyExecutor, recipes: RecipeRunner, ledger_path: impl Into<PathBuf>) -> Self {
        Self {
            local: None,
            remote: None,
            executor,
            recipes,
            ledger_path: ledger_path.into(),
            ledger: None,
        }
    }

    pub fn with_local_source(mut self, source: LocalSource) -> Self {
        self.local = Some(source);
        self
    }

    pub fn with_remote_source(mut self, source: RemoteSource) -> Self {
        self.remote = Some(source);
        self
    }

    /// Build an agent for this host from configuration
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        config.validate()?;

        let capabilities = HostCapabilities::detect();
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        let managers = adapters_for(&capabilities, runner.clone(), Some(config.command_timeout()?));
        if managers.is_empty() {
            warn!("No supported package manager found on this host");
        } else {
            let names: Vec<&str> = managers.iter().map(|m| m.manager().as_str()).collect();
            info!("Package managers: {}", names.join(", "));
        }

        let executor = PolicyExecutor::new(
            managers,
            RepoFiles::new(config.repo_files.clone()),
            Box::new(HttpClient::new()?),
            RetryPolicy::from_config(config)?,
        );
        let recipes = RecipeRunner::new(runner, Box::new(HttpClient::new()?), config.work_dir())
            .step_timeout(Some(config.step_timeout()?))
            .keep_run_dirs(config.keep_run_dirs);

        let mut agent = Agent::new(executor, recipes, config.ledger_path())
            .with_local_source(Box::new(LocalPolicySource::new(&config.local_policy_path)));

        if let Some(endpoint) = config.remote.endpoint.as_deref().filter(|e| !e.is_empty()) {
            let instance_id = match &config.remote.instance_id {
                Some(id) => id.clone(),
                None => host_name()?,
            };
            let remote = RemotePolicySource::new(endpoint, &instance_id, config.remote_timeout()?)?;
            agent = agent.with_remote_source(Box::new(remote));
        }
        Ok(agent)
    }

    /// Fetch and merge both sources; a failing source counts as absent
    pub fn effective_policy(&self, cancel: &CancelToken) -> EffectivePolicy {
        let local = self.local.as_ref().and_then(|s| fetch_or_warn(s.as_ref(), cancel));
        let remote = self.remote.as_ref().and_then(|s| fetch_or_warn(s.as_ref(), cancel));
        merge(local, remote)
    }

    /// Changes each manager would make under the current policy
    pub fn plan(&self, cancel: &CancelToken) -> Vec<(Manager, Result<Changes>)> {
        let policy = self.effective_policy(cancel);
        self.executor.plan(cancel, &policy)
    }

    /// One full reconciliation
    pub fn run(&mut self, cancel: &CancelToken) -> RunReport {
        let started = Instant::now();
        let mut errors = AggregateError::new();

        let policy = self.effective_policy(cancel);
        info!(
            "Effective policy: {} packages, {} repositories, {} recipes",
            policy.packages.len(),
            policy.repositories.len(),
            policy.recipes.len()
        );

        if let Err(e) = self.executor.apply(cancel, &policy) {
            errors.extend(e);
        }

        if !policy.recipes.is_empty() {
            if self.ledger.is_none() {
                match RecipeDb::load(&self.ledger_path) {
                    Ok(db) => self.ledger = Some(db),
                    Err(e) => errors.push("recipes", e),
                }
            }
            if let Some(db) = self.ledger.as_mut() {
                if let Err(e) = self.recipes.apply_all(cancel, db, &policy.recipes) {
                    errors.extend(e);
                }
            }
        }

        let report = RunReport {
            errors,
            elapsed: started.elapsed(),
        };
        if report.is_success() {
            info!("{}", report);
        } else {
            warn!("{}", report);
        }
        report
    }
}

impl Reconcile for Agent {
    fn reconcile(&mut self, cancel: &CancelToken) -> RunReport {
        self.run(cancel)
    }
}

fn fetch_or_warn<T>(source: &dyn PolicySource<Output = T>, cancel: &CancelToken) -> Option<T> {
    match source.fetch(cancel) {
        Ok(result) => result,
        Err(e) => {
            warn!("Ignoring {} policy: {}", source.name(), e);
            None
        }
    }
}

fn host_name() -> Result<String> {
    let name = std::fs::read_to_string("/etc/hostname")
        .map_err(|e| Error::Config(format!("remote.instance_id is unset and /etc/hostname is unreadable: {e}")))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Config(
            "remote.instance_id is unset and /etc/hostname is empty".to_string(),
        ));
    }
    Ok(name.to_string())
}
