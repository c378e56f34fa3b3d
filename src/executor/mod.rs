// src/executor/mod.rs

//! Policy executor
//!
//! Applies the package and repository parts of an [`EffectivePolicy`] to
//! every package manager present on the host. Managers are processed one
//! after another and never short-circuit each other: a failure is recorded
//! under the manager and phase it came from and the pass moves on.
//!
//! Per manager:
//!
//! 1. The managed repository file (and apt keyring) is synced.
//! 2. Inventory is taken, [`plan`] computes the changes, and they are applied
//!    in the order install, upgrade, remove. This step is repeated under the
//!    configured [`RetryPolicy`] while it produces errors.

mod batch;
mod retry;

pub use batch::{BatchAction, run_batch};
pub use retry::RetryPolicy;

use crate::error::{AggregateError, Error, Result};
use crate::exec::CancelToken;
use crate::packages::{ActionOptions, PackageManager};
use crate::plan::{Changes, plan};
use crate::policy::{DesiredPackages, EffectivePolicy, Manager};
use crate::repository::{KeyFetcher, RepoFiles};
use tracing::{debug, info, warn};

pub struct PolicyExecutor {
    managers: Vec<Box<dyn PackageManager>>,
    repo_files: RepoFiles,
    keys: Box<dyn KeyFetcher + Send + Sync>,
    retry: RetryPolicy,
}

impl PolicyExecutor {
    pub fn new(
        managers: Vec<Box<dyn PackageManager>>,
        repo_files: RepoFiles,
        keys: Box<dyn KeyFetcher + Send + Sync>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            managers,
            repo_files,
            keys,
            retry,
        }
    }

    /// Managers this executor drives, in processing order
    pub fn managers(&self) -> Vec<Manager> {
        self.managers.iter().map(|pm| pm.manager()).collect()
    }

    /// Converge every manager on the host to `policy`
    pub fn apply(&self, cancel: &CancelToken, policy: &EffectivePolicy) -> std::result::Result<(), AggregateError> {
        let mut errors = AggregateError::new();

        for pm in &self.managers {
            if cancel.is_cancelled() {
                errors.push("packages", Error::Cancelled);
                break;
            }
            let manager = pm.manager();
            info!("Reconciling {}", manager);

            let repos = policy.repositories_for(manager);
            if let Err(e) = self.repo_files.sync(manager, &repos, self.keys.as_ref(), cancel) {
                warn!("{}: repository sync failed: {}", manager, e);
                errors.push(format!("{manager} repositories"), e);
            }

            let desired = policy.packages_for(manager);
            let pkg_errors = self.retry.run(cancel, manager.as_str(), |attempt| {
                if attempt > 1 {
                    info!("{}: package pass attempt {}", manager, attempt);
                }
                reconcile_packages(pm.as_ref(), cancel, &desired)
            });
            errors.extend(pkg_errors);
        }

        errors.into_result()
    }

    /// Compute what `apply` would change for each manager without changing it
    pub fn plan(&self, cancel: &CancelToken, policy: &EffectivePolicy) -> Vec<(Manager, Result<Changes>)> {
        self.managers
            .iter()
            .map(|pm| {
                let desired = policy.packages_for(pm.manager());
                (pm.manager(), compute_changes(pm.as_ref(), cancel, &desired))
            })
            .collect()
    }
}

/// Take inventory and plan the changes for one manager
pub fn compute_changes(
    pm: &dyn PackageManager,
    cancel: &CancelToken,
    desired: &DesiredPackages,
) -> Result<Changes> {
    if desired.is_empty() {
        return Ok(Changes::default());
    }
    let installed = pm.list_installed(cancel)?;
    // Only updates need the upgradable list, and fetching it can refresh
    // the manager's metadata over the network.
    let upgradable = if desired.update.is_empty() {
        Vec::new()
    } else {
        pm.list_upgradable(cancel)?
    };
    Ok(plan(
        &installed,
        &upgradable,
        desired.install.as_slice(),
        desired.remove.as_slice(),
        desired.update.as_slice(),
    ))
}

/// One inventory, plan and apply pass for a manager
fn reconcile_packages(
    pm: &dyn PackageManager,
    cancel: &CancelToken,
    desired: &DesiredPackages,
) -> AggregateError {
    let manager = pm.manager();
    let mut errors = AggregateError::new();

    let changes = match compute_changes(pm, cancel, desired) {
        Ok(changes) => changes,
        Err(e) => {
            warn!("{}: failed to take inventory: {}", manager, e);
            errors.push(format!("{manager} inventory"), e);
            return errors;
        }
    };
    if changes.is_empty() {
        debug!("{}: nothing to do", manager);
        return errors;
    }
    info!("{}: {}", manager, changes);

    run_batch(pm, cancel, BatchAction::Install, &changes.install_list(), &mut errors);

    let upgrade = changes.upgrade_list();
    if !upgrade.is_empty() {
        if let Err(e) = pm.install(cancel, &upgrade, ActionOptions::default()) {
            warn!("{}: upgrade failed: {}", manager, e);
            errors.push(format!("{manager} upgrade"), e);
        }
    }

    run_batch(pm, cancel, BatchAction::Remove, &changes.remove_list(), &mut errors);
    errors
}
