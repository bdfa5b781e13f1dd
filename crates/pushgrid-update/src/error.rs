use pushgrid_state::StateError;
use thiserror::Error;

pub type UpdateResult<T> = Result<T, UpdateError>;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    MalformedRequest(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}
