//! Error types for ledger operations.

use pushgrid_diff::DiffError;
use pushgrid_state::{BlobError, StateError};
use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    MalformedRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("state store error: {0}")]
    State(StateError),

    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),

    #[error("diff error: {0}")]
    Diff(#[from] DiffError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StateError> for LedgerError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound(what) => Self::NotFound(format!("{what} does not exist")),
            StateError::AlreadyExists(what) => Self::Conflict(format!("{what} already exists")),
            other => Self::State(other),
        }
    }
}
