use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{HASH_TOKEN_LEN, HashBackend, HashError, HashToken};

/// Truncated SHA-256 of the value's UTF-8 bytes, hex encoded.
#[must_use]
pub fn hash_value(value: &str) -> HashToken {
    let digest = Sha256::digest(value.as_bytes());
    let mut token = hex::encode(digest);
    token.truncate(HASH_TOKEN_LEN);
    token
}

/// In-process hasher. Always available, never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalHasher;

impl LocalHasher {
    #[must_use]
    pub fn hash(&self, value: &str) -> HashToken {
        hash_value(value)
    }

    #[must_use]
    pub fn hash_all(&self, values: &[String]) -> Vec<HashToken> {
        values.iter().map(|v| hash_value(v)).collect()
    }
}

#[async_trait]
impl HashBackend for LocalHasher {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn batch_hash(&self, values: &[String]) -> Result<Vec<HashToken>, HashError> {
        Ok(self.hash_all(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::is_hash_token;

    #[test]
    fn test_hash_value_is_deterministic() {
        let a = hash_value("Hello, World!");
        let b = hash_value("Hello, World!");
        assert_eq!(a, b);
        assert_eq!(a.len(), HASH_TOKEN_LEN);
        assert!(is_hash_token(&a));
    }

    #[test]
    fn test_hash_value_known_prefix() {
        // sha256("123") = a665a459...
        assert_eq!(hash_value("123"), "a665a45920422f9d");
    }

    #[test]
    fn test_different_values_differ() {
        assert_ne!(hash_value("Hello"), hash_value("Hi"));
        assert_ne!(hash_value(""), hash_value(" "));
    }

    #[tokio::test]
    async fn test_batch_matches_single() {
        let values = vec!["value1".to_string(), "value2".to_string()];
        let hashes = LocalHasher.batch_hash(&values).await.unwrap();
        assert_eq!(hashes, vec![hash_value("value1"), hash_value("value2")]);
    }
}
