// src/executor/batch.rs

//! Install/remove batches with repair and per-package fallback
//!
//! ```text
//! ATTEMPT --ok--> DONE
//!    |
//!   err
//!    v
//! DETECT --no remedy--> FALLBACK --> DONE
//!    |
//!  remedy
//!    v
//! REPAIR --> RETRY --ok--> DONE
//!               |
//!              err
//!               v
//!           FALLBACK --> DONE
//! ```
//!
//! FALLBACK runs every package of the batch on its own and records each
//! package that still fails.

use crate::error::{AggregateError, Error, Result};
use crate::exec::CancelToken;
use crate::packages::{ActionOptions, PackageManager, Remedy};
use std::fmt;
use tracing::{debug, info, warn};

/// Which adapter call a batch drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAction {
    Install,
    Remove,
}

impl BatchAction {
    fn apply(
        self,
        pm: &dyn PackageManager,
        cancel: &CancelToken,
        names: &[String],
        options: ActionOptions,
    ) -> Result<()> {
        match self {
            Self::Install => pm.install(cancel, names, options),
            Self::Remove => pm.remove(cancel, names, options),
        }
    }
}

impl fmt::Display for BatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

#[derive(Debug)]
enum BatchState {
    Attempt,
    Detect(Error),
    Repair(Remedy),
    Retry(ActionOptions),
    Fallback { options: ActionOptions, last: Error },
    Done,
}

/// Drive one batch to completion, pushing every failure into `errors`
///
/// Scopes are `"<manager> <action> <package>"` for per-package failures and
/// `"<manager> <action>"` for failures that concern the whole batch.
pub fn run_batch(
    pm: &dyn PackageManager,
    cancel: &CancelToken,
    action: BatchAction,
    names: &[String],
    errors: &mut AggregateError,
) {
    if names.is_empty() {
        return;
    }
    let manager = pm.manager();
    let mut options = ActionOptions::default();
    let mut state = BatchState::Attempt;

    loop {
        state = match state {
            BatchState::Attempt => match action.apply(pm, cancel, names, options) {
                Ok(()) => BatchState::Done,
                Err(Error::Cancelled) => {
                    errors.push(format!("{manager} {action}"), Error::Cancelled);
                    BatchState::Done
                }
                Err(e) => BatchState::Detect(e),
            },
            BatchState::Detect(e) => match pm.diagnose(&e) {
                Some(remedy) => {
                    info!("{}: {} failed, attempting to {}", manager, action, remedy);
                    BatchState::Repair(remedy)
                }
                None => {
                    debug!("{}: no known remedy for {} failure", manager, action);
                    BatchState::Fallback { options, last: e }
                }
            },
            BatchState::Repair(remedy) => {
                options = remedy.adjust(options);
                match pm.repair(cancel, remedy) {
                    Ok(()) => BatchState::Retry(options),
                    Err(Error::Cancelled) => {
                        errors.push(format!("{manager} {action}"), Error::Cancelled);
                        BatchState::Done
                    }
                    Err(e) => {
                        warn!("{}: failed to {}: {}", manager, remedy, e);
                        BatchState::Fallback { options, last: e }
                    }
                }
            }
            BatchState::Retry(options) => match action.apply(pm, cancel, names, options) {
                Ok(()) => BatchState::Done,
                Err(Error::Cancelled) => {
                    errors.push(format!("{manager} {action}"), Error::Cancelled);
                    BatchState::Done
                }
                Err(e) => BatchState::Fallback { options, last: e },
            },
            BatchState::Fallback { options, last } => {
                if let [name] = names {
                    errors.push(format!("{manager} {action} {name}"), last);
                } else {
                    warn!(
                        "{}: batch {} of {} packages failed, trying each package",
                        manager,
                        action,
                        names.len()
                    );
                    for name in names {
                        if cancel.is_cancelled() {
                            errors.push(format!("{manager} {action}"), Error::Cancelled);
                            break;
                        }
                        if let Err(e) = action.apply(pm, cancel, std::slice::from_ref(name), options) {
                            warn!("{}: {} {} failed: {}", manager, action, name, e);
                            errors.push(format!("{manager} {action} {name}"), e);
                        }
                    }
                }
                BatchState::Done
            }
            BatchState::Done => return,
        };
    }
}
