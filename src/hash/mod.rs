//! Content hashing for change detection.
//!
//! A [`HashToken`] is a short, fixed-length fingerprint of one value. Tokens are only ever
//! compared against tokens from the same deployment, so every backend must emit the same
//! *format* (16 lowercase hex characters), not necessarily the same bytes.

mod fallback;
mod local;
mod remote;

use async_trait::async_trait;
use thiserror::Error;

pub use fallback::{FallbackHasher, FallbackPolicy};
pub use local::{LocalHasher, hash_value};
pub use remote::RemoteHasher;

/// Short deterministic fingerprint of a value.
pub type HashToken = String;

pub const HASH_TOKEN_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("compute service request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("compute service returned status {0}")]
    Status(u16),
    #[error("malformed compute service response: {0}")]
    Malformed(String),
}

/// A strategy for turning values into hash tokens.
#[async_trait]
pub trait HashBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn batch_hash(&self, values: &[String]) -> Result<Vec<HashToken>, HashError>;
}

#[must_use]
pub fn is_hash_token(s: &str) -> bool {
    s.len() == HASH_TOKEN_LEN
        && s
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

/// Checks a backend's answer has one well-formed token per input.
pub(crate) fn check_tokens(expected: usize, tokens: &[HashToken]) -> Result<(), HashError> {
    if tokens.len() != expected {
        return Err(HashError::Malformed(format!(
            "expected {expected} hashes, got {}",
            tokens.len()
        )));
    }
    if let Some(bad) = tokens.iter().find(|t| !is_hash_token(t)) {
        return Err(HashError::Malformed(format!("invalid hash token '{bad}'")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_hash_token() {
        assert!(is_hash_token("0123456789abcdef"));
        assert!(!is_hash_token("0123456789ABCDEF"));
        assert!(!is_hash_token("0123456789abcde"));
        assert!(!is_hash_token("0123456789abcdeg"));
    }

    #[test]
    fn test_check_tokens_rejects_wrong_count() {
        let tokens = vec![hash_value("a")];
        assert!(check_tokens(1, &tokens).is_ok());
        assert!(matches!(
            check_tokens(2, &tokens),
            Err(HashError::Malformed(_))
        ));
    }
}
