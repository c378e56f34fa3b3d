// src/recipe/runner.rs

//! Recipe executor
//!
//! Decides per recipe whether to install, update or skip, then runs the
//! chosen steps in a fresh run directory and records the version in the
//! ledger once every step has succeeded.
//!
//! ```text
//! ABSENT ──install steps──> INSTALLED(v)
//! INSTALLED(v) ──update steps (UPDATED, v_req > v)──> INSTALLED(v_req)
//! ```

use crate::error::{AggregateError, Error, Result};
use crate::exec::{CancelToken, CommandRunner};
use crate::policy::{DesiredState, Sourced};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::artifact::{Downloader, fetch_artifacts};
use super::format::{SoftwareRecipe, Step, check_identifier};
use super::step::{StepContext, run_step};
use super::store::{Recipe, RecipeDb};
use super::version::{format_version, parse_version};

/// What a recipe needs given the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeAction {
    Install,
    Update,
    Skip,
}

/// How a recipe run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipeOutcome {
    Installed,
    Updated,
    /// Already at the requested state
    UpToDate,
    /// The requested state is not one recipes can reach
    Unsupported,
}

/// Pick the action for `recipe` given its ledger row
pub fn decide(recipe: &SoftwareRecipe, installed: Option<&Recipe>) -> Result<RecipeAction> {
    let requested = parse_version(&recipe.version)?;
    Ok(match (installed, recipe.desired_state) {
        (_, DesiredState::Removed) => RecipeAction::Skip,
        (None, _) => RecipeAction::Install,
        (Some(row), DesiredState::Updated) if requested > row.version => RecipeAction::Update,
        (Some(_), _) => RecipeAction::Skip,
    })
}

pub struct RecipeRunner {
    runner: Arc<dyn CommandRunner>,
    downloader: Box<dyn Downloader + Send + Sync>,
    work_dir: PathBuf,
    step_timeout: Option<Duration>,
    keep_run_dirs: bool,
}

impl RecipeRunner {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        downloader: Box<dyn Downloader + Send + Sync>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            downloader,
            work_dir: work_dir.into(),
            step_timeout: None,
            keep_run_dirs: false,
        }
    }

    pub fn step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn keep_run_dirs(mut self, keep: bool) -> Self {
        self.keep_run_dirs = keep;
        self
    }

    /// Bring every recipe to its desired state, one after another
    ///
    /// A failing recipe does not stop the others.
    pub fn apply_all(
        &self,
        cancel: &CancelToken,
        db: &mut RecipeDb,
        recipes: &[Sourced<SoftwareRecipe>],
    ) -> std::result::Result<(), AggregateError> {
        let mut errors = AggregateError::new();
        for sourced in recipes {
            let recipe = &sourced.resource;
            if cancel.is_cancelled() {
                errors.push(format!("recipe {}", recipe.name), Error::Cancelled);
                break;
            }
            if let Err(e) = self.apply(cancel, db, recipe) {
                error!("Recipe {} (from {}) failed: {}", recipe.name, sourced.source, e);
                errors.push(format!("recipe {}", recipe.name), e);
            }
        }
        errors.into_result()
    }

    /// Bring one recipe to its desired state
    pub fn apply(&self, cancel: &CancelToken, db: &mut RecipeDb, recipe: &SoftwareRecipe) -> Result<RecipeOutcome> {
        check_identifier("recipe name", &recipe.name)?;
        if recipe.desired_state == DesiredState::Removed {
            warn!("Recipe {}: REMOVED is not supported for recipes, skipping", recipe.name);
            return Ok(RecipeOutcome::Unsupported);
        }

        let action = decide(recipe, db.get(&recipe.name))?;
        let (steps, outcome) = match action {
            RecipeAction::Skip => {
                debug!("Recipe {} is up to date", recipe.name);
                return Ok(RecipeOutcome::UpToDate);
            }
            RecipeAction::Install => (&recipe.install_steps, RecipeOutcome::Installed),
            RecipeAction::Update => (&recipe.update_steps, RecipeOutcome::Updated),
        };

        let version = format_version(&parse_version(&recipe.version)?);
        info!("Recipe {}: {:?} version {}", recipe.name, action, version);

        let run_id = Uuid::new_v4().to_string();
        let run_dir = self.work_dir.join(&recipe.name).join(&run_id);
        let result = self.execute(cancel, recipe, steps, &run_id, &run_dir);

        if self.keep_run_dirs {
            debug!("Keeping run directory {}", run_dir.display());
        } else if let Err(e) = fs::remove_dir_all(&run_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", run_dir.display(), e);
            }
        }

        result?;
        db.add(&recipe.name, &recipe.version, true)?;
        info!("Recipe {} is at version {}", recipe.name, version);
        Ok(outcome)
    }

    fn execute(
        &self,
        cancel: &CancelToken,
        recipe: &SoftwareRecipe,
        steps: &[Step],
        run_id: &str,
        run_dir: &Path,
    ) -> Result<()> {
        fs::create_dir_all(run_dir).map_err(|e| {
            Error::IoError(format!("Failed to create run directory {}: {}", run_dir.display(), e))
        })?;

        let artifacts = fetch_artifacts(
            &recipe.artifacts,
            &run_dir.join("artifacts"),
            self.downloader.as_ref(),
            cancel,
        )?;

        for (index, step) in steps.iter().enumerate() {
            cancel.check()?;
            debug!("Recipe {} step {} ({})", recipe.name, index, step.kind());
            let ctx = StepContext {
                recipe,
                run_id,
                step_dir: run_dir.join(format!("step{index:02}")),
                artifacts: &artifacts,
                runner: self.runner.as_ref(),
                cancel,
                timeout: self.step_timeout,
            };
            run_step(step, &ctx).map_err(|e| match e {
                Error::Cancelled => Error::Cancelled,
                other => Error::StepFailed {
                    recipe: recipe.name.clone(),
                    step: index,
                    kind: step.kind().to_string(),
                    reason: other.to_string(),
                },
            })?;
        }
        Ok(())
    }
}
