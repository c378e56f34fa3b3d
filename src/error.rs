// src/error.rs

//! Error types for the converge agent

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the reconciliation and recipe engine
#[derive(Error, Debug)]
pub enum Error {
    /// I/O failure with context
    #[error("I/O error: {0}")]
    IoError(String),

    /// Raw I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed input (policy documents, tool output, keys)
    #[error("Parse error: {0}")]
    ParseError(String),

    /// HTTP fetch failure
    #[error("Download error: {0}")]
    DownloadError(String),

    /// Something that was expected to exist does not
    #[error("Not found: {0}")]
    NotFoundError(String),

    /// Failure setting up a client or tool
    #[error("Initialization error: {0}")]
    InitError(String),

    /// Invalid agent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A subprocess exited unsuccessfully
    #[error("{command} failed with {code}: {output}")]
    CommandFailed {
        command: String,
        code: String,
        output: String,
    },

    /// A subprocess exceeded its time limit and was killed
    #[error("{command} timed out after {limit:?}")]
    Timeout { command: String, limit: Duration },

    /// The run was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Downloaded content does not match its declared checksum
    #[error("Checksum mismatch for {name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    /// A recipe version string is not of the form N(.N)*
    #[error("Invalid version '{0}': expected dot-separated non-negative integers")]
    InvalidVersion(String),

    /// The recipe ledger exists but cannot be parsed
    #[error("Recipe ledger {path} is corrupt: {reason}")]
    LedgerCorrupt { path: String, reason: String },

    /// A recipe step failed
    #[error("Recipe '{recipe}' step {step} ({kind}) failed: {reason}")]
    StepFailed {
        recipe: String,
        step: usize,
        kind: String,
        reason: String,
    },
}

impl Error {
    /// Combined stdout/stderr of a failed command, if this error carries one
    pub fn command_output(&self) -> Option<&str> {
        match self {
            Error::CommandFailed { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// One failure attributed to the manager, phase or recipe it came from
#[derive(Debug)]
pub struct ScopedError {
    pub scope: String,
    pub error: Error,
}

/// Failures collected across managers, phases and recipes
///
/// Displayed as one line per failure.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<ScopedError>,
}

impl AggregateError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, scope: impl Into<String>, error: Error) {
        self.errors.push(ScopedError {
            scope: scope.into(),
            error,
        });
    }

    /// Move every failure from `other` into this list
    pub fn extend(&mut self, other: AggregateError) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[ScopedError] {
        &self.errors
    }

    /// `Ok(())` when nothing failed
    pub fn into_result(self) -> std::result::Result<(), AggregateError> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, scoped) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}: {}", scoped.scope, scoped.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}
