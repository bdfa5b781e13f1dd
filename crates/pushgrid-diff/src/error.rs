//! Error types for package diffing.

use pushgrid_state::BlobError;
use thiserror::Error;

pub type DiffResult<T> = Result<T, DiffError>;

#[derive(Debug, Error)]
pub enum DiffError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("invalid manifest: {0}")]
    Manifest(String),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("blob error: {0}")]
    Blob(#[from] BlobError),

    #[error("diff task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
