use thiserror::Error;

use crate::blob::StorageError;
use crate::hash::HashError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("not found")]
    NotFound,

    /// The index references a blob that the store no longer has.
    #[error("file not found: blob {blob_key} is missing")]
    FileNotFound { blob_key: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("hash error: {0}")]
    Hash(#[from] HashError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("forbidden")]
    Forbidden,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),
}

pub type Result<T> = std::result::Result<T, Error>;
