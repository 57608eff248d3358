use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::types::BlobPayload;

/// Read-through cache of decoded payloads, keyed by blob key.
///
/// Entries expire after a fixed TTL; writes never invalidate. A zero TTL disables the
/// cache entirely.
pub struct BlobCache {
    entries: DashMap<String, (Instant, Arc<BlobPayload>)>,
    ttl: Duration,
}

impl BlobCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<BlobPayload>> {
        if self.ttl.is_zero() {
            return None;
        }
        let fresh = {
            let entry = self.entries.get(key)?;
            let (stored_at, payload) = entry.value();
            (stored_at.elapsed() < self.ttl).then(|| Arc::clone(payload))
        };
        if fresh.is_none() {
            self.entries
                .remove_if(key, |_, (stored_at, _)| stored_at.elapsed() >= self.ttl);
        }
        fresh
    }

    pub fn insert(&self, key: &str, payload: Arc<BlobPayload>) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries
            .insert(key.to_string(), (Instant::now(), payload));
    }

    pub fn evict(&self, key: &str) {
        self.entries.remove(key);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
