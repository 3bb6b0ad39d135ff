//! Error type shared by the store, the components and the HTTP surface.

use thiserror::Error;

use crate::grading::RuleSetViolation;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A referenced entity does not exist. Caller error, never retried.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A concurrent mutation won the race, or the requested change collides
    /// with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A grading rule edit would leave a gap, an overlap or a malformed range.
    #[error("invalid rule set: {0}")]
    InvalidRuleSet(RuleSetViolation),

    /// Score outside the `[0, 100]` domain.
    #[error("score {0} is outside the range [0, 100]")]
    OutOfRange(f64),

    /// The actor is not allowed to perform the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(anyhow::anyhow!("storage task failed: {}", e))
    }
}
