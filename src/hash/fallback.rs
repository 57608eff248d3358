use std::sync::Arc;

use tracing::warn;

use super::{HashBackend, HashError, HashToken, LocalHasher, check_tokens};

/// What to do when the primary backend fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Substitute the secondary backend and log a warning.
    Secondary,
    /// Return the primary backend's error.
    Propagate,
}

/// Tries a primary backend and falls back to a secondary one.
///
/// With no primary configured, the secondary is used directly. The default secondary is
/// [`LocalHasher`], which cannot fail.
#[derive(Clone)]
pub struct FallbackHasher {
    primary: Option<Arc<dyn HashBackend>>,
    secondary: Arc<dyn HashBackend>,
    policy: FallbackPolicy,
}

impl FallbackHasher {
    pub fn new(primary: Arc<dyn HashBackend>, secondary: Arc<dyn HashBackend>) -> Self {
        Self {
            primary: Some(primary),
            secondary,
            policy: FallbackPolicy::Secondary,
        }
    }

    /// Hasher that only ever runs in-process.
    #[must_use]
    pub fn local() -> Self {
        Self {
            primary: None,
            secondary: Arc::new(LocalHasher),
            policy: FallbackPolicy::Secondary,
        }
    }

    pub fn with_remote(primary: Arc<dyn HashBackend>) -> Self {
        Self::new(primary, Arc::new(LocalHasher))
    }

    /// Sets the default policy used by [`batch_hash`](Self::batch_hash).
    #[must_use]
    pub fn with_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn policy(&self) -> FallbackPolicy {
        self.policy
    }

    pub async fn hash(&self, value: &str) -> Result<HashToken, HashError> {
        let mut tokens = self.batch_hash(&[value.to_string()]).await?;
        tokens
            .pop()
            .ok_or_else(|| HashError::Malformed("empty hash response".to_string()))
    }

    pub async fn batch_hash(&self, values: &[String]) -> Result<Vec<HashToken>, HashError> {
        self.batch_hash_with(values, self.policy).await
    }

    /// Hashes without substituting the secondary backend, for callers that must not
    /// silently change which backend produced their tokens.
    pub async fn batch_hash_strict(&self, values: &[String]) -> Result<Vec<HashToken>, HashError> {
        self.batch_hash_with(values, FallbackPolicy::Propagate).await
    }

    pub async fn batch_hash_with(
        &self,
        values: &[String],
        policy: FallbackPolicy,
    ) -> Result<Vec<HashToken>, HashError> {
        let Some(primary) = &self.primary else {
            return self.secondary.batch_hash(values).await;
        };

        let outcome = primary
            .batch_hash(values)
            .await
            .and_then(|tokens| check_tokens(values.len(), &tokens).map(|()| tokens));

        match (outcome, policy) {
            (Ok(tokens), _) => Ok(tokens),
            (Err(e), FallbackPolicy::Propagate) => Err(e),
            (Err(e), FallbackPolicy::Secondary) => {
                warn!(
                    "{} hasher failed for {} values, using {}: {e}",
                    primary.name(),
                    values.len(),
                    self.secondary.name()
                );
                self.secondary.batch_hash(values).await
            }
        }
    }
}

impl Default for FallbackHasher {
    fn default() -> Self {
        Self::local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_value;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HashBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn batch_hash(&self, _values: &[String]) -> Result<Vec<HashToken>, HashError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(HashError::Status(500))
        }
    }

    /// Emits well-formed tokens from a different function than the local hasher.
    struct ReversingBackend;

    #[async_trait]
    impl HashBackend for ReversingBackend {
        fn name(&self) -> &'static str {
            "reversing"
        }

        async fn batch_hash(&self, values: &[String]) -> Result<Vec<HashToken>, HashError> {
            Ok(values
                .iter()
                .map(|v| hash_value(&v.chars().rev().collect::<String>()))
                .collect())
        }
    }

    #[tokio::test]
    async fn test_local_only() {
        let hasher = FallbackHasher::local();
        assert_eq!(hasher.hash("Hello").await.unwrap(), hash_value("Hello"));
    }

    #[tokio::test]
    async fn test_falls_back_to_local_on_failure() {
        let failing = Arc::new(FailingBackend {
            calls: AtomicUsize::new(0),
        });
        let hasher = FallbackHasher::with_remote(failing.clone());

        let values = vec!["Hello".to_string(), "Hi".to_string()];
        let tokens = hasher.batch_hash(&values).await.unwrap();

        assert_eq!(tokens, vec![hash_value("Hello"), hash_value("Hi")]);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_strict_propagates() {
        let hasher = FallbackHasher::with_remote(Arc::new(FailingBackend {
            calls: AtomicUsize::new(0),
        }));
        let result = hasher.batch_hash_strict(&["Hello".to_string()]).await;
        assert!(matches!(result, Err(HashError::Status(500))));
    }

    #[tokio::test]
    async fn test_propagate_policy_applies_to_default_calls() {
        let hasher = FallbackHasher::with_remote(Arc::new(FailingBackend {
            calls: AtomicUsize::new(0),
        }))
        .with_policy(FallbackPolicy::Propagate);
        assert!(hasher.hash("Hello").await.is_err());
    }

    #[tokio::test]
    async fn test_primary_output_is_used_when_healthy() {
        let hasher = FallbackHasher::with_remote(Arc::new(ReversingBackend));
        let token = hasher.hash("abc").await.unwrap();
        assert_eq!(token, hash_value("cba"));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let hasher = FallbackHasher::with_remote(Arc::new(ReversingBackend));
        assert!(hasher.batch_hash(&[]).await.unwrap().is_empty());
    }
}
