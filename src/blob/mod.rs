//! Blob storage for file payloads.
//!
//! Each imported file is two objects: the content at `{project}-{language}-{filename}` and
//! its provenance at `{same}-meta`. Writes overwrite in place.

mod cache;
mod filesystem;
mod memory;
mod store;

use async_trait::async_trait;
use thiserror::Error;

pub use cache::BlobCache;
pub use filesystem::FilesystemBackend;
pub use memory::MemoryBackend;
pub use store::{BlobDeletion, BlobStore};

pub const META_SUFFIX: &str = "-meta";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found")]
    NotFound,
    #[error("{op} {key} timed out after {timeout_ms}ms")]
    Timeout {
        op: &'static str,
        key: String,
        timeout_ms: u128,
    },
    #[error("invalid object key '{0}'")]
    InvalidKey(String),
    #[error("corrupt object {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("io error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    fn io(key: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound
        } else {
            Self::Io {
                key: key.to_string(),
                source,
            }
        }
    }
}

/// Raw object storage. Implementations only move bytes; encoding, caching and timeouts
/// live in [`BlobStore`].
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Writes `data` at `key`, replacing any existing object.
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Returns [`StorageError::NotFound`] when nothing is stored at `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Returns `true` if the object was deleted, `false` if it did not exist.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;
}

/// Deterministic content key for a file. Path separators are replaced so every key is
/// a single flat name.
#[must_use]
pub fn blob_key(project_id: &str, language: &str, filename: &str) -> String {
    format!(
        "{}-{}-{}",
        sanitize(project_id),
        sanitize(language),
        sanitize(filename)
    )
}

#[must_use]
pub fn meta_key(blob_key: &str) -> String {
    format!("{blob_key}{META_SUFFIX}")
}

fn sanitize(part: &str) -> String {
    part.replace(['/', '\\'], "-")
}

pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() || key == "." || key == ".." {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    const INVALID_CHARS: &[char] = &['/', '\\', '\0', '\n', '\r'];
    if key.chars().any(|c| INVALID_CHARS.contains(&c)) {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
