use thiserror::Error;

use crate::git::GitError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum OperatorError {
    #[error("job graph is cyclic")]
    CyclicJobGraph,

    #[error("job {job} refers to unknown job {after} in 'after'")]
    UnknownJobReference { job: String, after: String },

    #[error("job name {0} is duplicated")]
    DuplicateJobName(String),

    #[error("job {0} is not declared in the config")]
    JobNotDeclared(String),

    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("failed to send mail: {0}")]
    Mail(String),

    #[error("{0}")]
    Decision(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("API request failed (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OperatorError {
    /// Whether the error is a store-side not-found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, OperatorError::Store(e) if e.is_not_found())
    }
}

pub type Result<T> = std::result::Result<T, OperatorError>;
