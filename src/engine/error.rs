use std::{error::Error as _, path::PathBuf};

use thiserror::Error;

use crate::{db::DbError, policy::PolicyError};

/// Errors raised while running a policy.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Policy data that can never succeed as written. Not retryable.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error in processing detail for table {table}")]
    Detail {
        table: String,
        #[source]
        source: Box<EngineError>,
    },

    /// A batch failed and both connections were rolled back.
    #[error("Error in committing work, batch rolled back")]
    Commit(#[source] Box<EngineError>),

    /// The core commit succeeded but the archive commit did not. The two
    /// stores disagree until an operator intervenes.
    #[error("Core store committed but archive commit failed: {0}")]
    Inconsistent(#[source] DbError),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        EngineError::Configuration(message.into())
    }

    pub fn in_table(self, table: &str) -> Self {
        EngineError::Detail {
            table: table.to_string(),
            source: Box::new(self),
        }
    }

    /// Innermost cause, skipping the wrapping layers.
    pub fn root(&self) -> &EngineError {
        match self {
            EngineError::Detail { source, .. } | EngineError::Commit(source) => source.root(),
            other => other,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self.root(), EngineError::Configuration(_) | EngineError::Policy(_))
    }

    /// Errors that must stop the whole process, not just the current policy.
    pub fn is_fatal(&self) -> bool {
        matches!(self.root(), EngineError::Inconsistent(_))
    }

    /// The error and all of its causes, one per line.
    pub fn diagnostic(&self) -> String {
        let mut out = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            out.push_str("\n  caused by: ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }
}
