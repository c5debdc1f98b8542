//! Error taxonomy for the search pipeline
//!
//! Validation errors surface synchronously from command building. Launch
//! failures become a terminal `Errored` status on the session, so they only
//! reach callers through this type when the runner is used directly. Parse
//! problems never show up here: they are counted and logged.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("invalid search path {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("malformed CSV at record {record}: {reason}")]
    Csv { record: usize, reason: String },
}

impl SearchError {
    /// Whether the error was produced while validating parameters
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SearchError::InvalidPattern(_)
                | SearchError::InvalidPath { .. }
                | SearchError::InvalidParameter { .. }
        )
    }

    pub(crate) fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SearchError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn launch(program: impl Into<String>, source: std::io::Error) -> Self {
        SearchError::Launch {
            program: program.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;
