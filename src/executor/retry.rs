// src/executor/retry.rs

//! Bounded fixed-interval retry

use crate::config::AgentConfig;
use crate::error::{AggregateError, Error, Result};
use crate::exec::CancelToken;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    /// Total attempts including the first, at least one
    pub attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            attempts: 3,
        }
    }
}

impl RetryPolicy {
    pub fn new(interval: Duration, attempts: u32) -> Self {
        Self {
            interval,
            attempts: attempts.max(1),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        Ok(Self::new(config.retry_interval()?, config.retry.attempts))
    }

    /// Run `step` until it reports no errors or attempts run out
    ///
    /// The errors of the last attempt are returned. Cancellation during the
    /// wait ends the loop early with a cancellation error added.
    pub fn run<F>(&self, cancel: &CancelToken, label: &str, mut step: F) -> AggregateError
    where
        F: FnMut(u32) -> AggregateError,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            let mut errors = step(attempt);
            if errors.is_empty() || attempt >= attempts {
                return errors;
            }
            warn!(
                "{}: attempt {}/{} had {} errors, retrying in {:?}",
                label,
                attempt,
                attempts,
                errors.len(),
                self.interval
            );
            if cancel.sleep(self.interval).is_err() {
                errors.push(label, Error::Cancelled);
                return errors;
            }
            attempt += 1;
        }
    }
}
