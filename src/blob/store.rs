use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{BlobBackend, BlobCache, StorageError, blob_key, meta_key};
use crate::types::{BlobPayload, Content, Provenance};

/// On-store layout of the content object. Provenance lives in its own object.
#[derive(Serialize, Deserialize)]
struct StoredContent {
    content: Content,
    source_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    commit_ref: Option<String>,
    uploaded_at: DateTime<Utc>,
}

/// What a delete actually removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobDeletion {
    pub content_removed: bool,
    pub meta_removed: bool,
}

/// Typed adapter over a [`BlobBackend`]: encodes payloads, splits content from
/// provenance, bounds every call with a timeout and serves reads through a TTL cache.
pub struct BlobStore {
    backend: Arc<dyn BlobBackend>,
    cache: BlobCache,
    timeout: Duration,
}

impl BlobStore {
    pub fn new(backend: Arc<dyn BlobBackend>, cache: BlobCache, timeout: Duration) -> Self {
        Self {
            backend,
            cache,
            timeout,
        }
    }

    #[must_use]
    pub fn cache(&self) -> &BlobCache {
        &self.cache
    }

    async fn timed<T, F>(&self, op: &'static str, key: &str, fut: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StorageError::Timeout {
                op,
                key: key.to_string(),
                timeout_ms: self.timeout.as_millis(),
            })?
    }

    /// Writes a file's content and provenance, returning the content key. Any previous
    /// object at that key is overwritten; with empty provenance the old metadata object
    /// is removed so reads report unknown provenance.
    pub async fn put(
        &self,
        project_id: &str,
        language: &str,
        filename: &str,
        payload: &BlobPayload,
    ) -> Result<String, StorageError> {
        let key = blob_key(project_id, language, filename);
        let stored = StoredContent {
            content: payload.content.clone(),
            source_hash: payload.source_hash.clone(),
            commit_ref: payload.commit_ref.clone(),
            uploaded_at: payload.uploaded_at,
        };
        let body = serde_json::to_vec(&stored).map_err(|source| StorageError::Corrupt {
            key: key.clone(),
            source,
        })?;
        self.timed("put", &key, self.backend.put(&key, &body)).await?;

        let meta = meta_key(&key);
        if payload.metadata.is_empty() {
            if let Err(e) = self.timed("delete", &meta, self.backend.delete(&meta)).await {
                warn!("Failed to clear stale metadata {meta}: {e}");
            }
        } else {
            let body =
                serde_json::to_vec(&payload.metadata).map_err(|source| StorageError::Corrupt {
                    key: meta.clone(),
                    source,
                })?;
            self.timed("put", &meta, self.backend.put(&meta, &body))
                .await?;
        }

        debug!("Stored blob {key} ({} keys)", payload.content.len());
        Ok(key)
    }

    /// Reads a payload through the cache.
    pub async fn get(&self, key: &str) -> Result<Arc<BlobPayload>, StorageError> {
        if let Some(hit) = self.cache.get(key) {
            debug!("Blob cache hit for {key}");
            return Ok(hit);
        }
        self.reload(key).await
    }

    /// Reads a payload from the backend and replaces whatever the cache held for it.
    pub async fn reload(&self, key: &str) -> Result<Arc<BlobPayload>, StorageError> {
        let payload = self.get_uncached(key).await?;
        self.cache.insert(key, Arc::clone(&payload));
        Ok(payload)
    }

    /// Reads a payload straight from the backend, skipping (and not filling) the cache.
    pub async fn get_uncached(&self, key: &str) -> Result<Arc<BlobPayload>, StorageError> {
        let body = self.timed("get", key, self.backend.get(key)).await?;
        let stored: StoredContent =
            serde_json::from_slice(&body).map_err(|source| StorageError::Corrupt {
                key: key.to_string(),
                source,
            })?;

        let meta = meta_key(key);
        let metadata = match self.timed("get", &meta, self.backend.get(&meta)).await {
            Ok(body) => serde_json::from_slice::<Provenance>(&body).unwrap_or_else(|e| {
                warn!("Ignoring unreadable metadata {meta}: {e}");
                Provenance::default()
            }),
            Err(StorageError::NotFound) => Provenance::default(),
            Err(e) => return Err(e),
        };

        Ok(Arc::new(BlobPayload {
            content: stored.content,
            metadata,
            source_hash: stored.source_hash,
            commit_ref: stored.commit_ref,
            uploaded_at: stored.uploaded_at,
        }))
    }

    /// Deletes the content and metadata objects independently. Both deletes are attempted
    /// even if one fails; the first failure is returned afterwards.
    pub async fn delete(&self, key: &str) -> Result<BlobDeletion, StorageError> {
        let meta = meta_key(key);
        let content = self.timed("delete", key, self.backend.delete(key)).await;
        let metadata = self.timed("delete", &meta, self.backend.delete(&meta)).await;
        self.cache.evict(key);

        Ok(BlobDeletion {
            content_removed: content?,
            meta_removed: metadata?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{FilesystemBackend, MemoryBackend};
    use crate::types::KeyHistory;
    use tempfile::TempDir;

    fn payload(value: &str, metadata: Provenance) -> BlobPayload {
        let mut content = Content::new();
        content.insert("welcome".to_string(), value.to_string());
        content.insert("nav.home".to_string(), "Home".to_string());
        BlobPayload {
            content,
            metadata,
            source_hash: "0123456789abcdef".to_string(),
            commit_ref: Some("abc123".to_string()),
            uploaded_at: Utc::now(),
        }
    }

    fn provenance() -> Provenance {
        let mut p = Provenance {
            commit_ref: Some("abc123".to_string()),
            ..Default::default()
        };
        p.keys.insert(
            "welcome".to_string(),
            KeyHistory {
                commit: "abc123".to_string(),
                author: Some("ana".to_string()),
                timestamp: None,
            },
        );
        p
    }

    fn memory_store(ttl: Duration) -> (Arc<MemoryBackend>, BlobStore) {
        let backend = Arc::new(MemoryBackend::new());
        let store = BlobStore::new(backend.clone(), BlobCache::new(ttl), Duration::from_secs(5));
        (backend, store)
    }

    #[tokio::test]
    async fn test_round_trip_with_metadata() {
        let temp = TempDir::new().unwrap();
        let store = BlobStore::new(
            Arc::new(FilesystemBackend::new(temp.path())),
            BlobCache::disabled(),
            Duration::from_secs(5),
        );

        let written = payload("Hello", provenance());
        let key = store.put("p1", "en", "common.json", &written).await.unwrap();
        assert_eq!(key, "p1-en-common.json");

        let read = store.get(&key).await.unwrap();
        assert_eq!(*read, written);
    }

    #[tokio::test]
    async fn test_round_trip_without_metadata() {
        let (backend, store) = memory_store(Duration::ZERO);
        let written = payload("Hello", Provenance::default());
        let key = store.put("p1", "en", "common.json", &written).await.unwrap();

        assert!(!backend.contains(&meta_key(&key)));
        let read = store.get(&key).await.unwrap();
        assert_eq!(read.content, written.content);
        assert!(read.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_missing_metadata_is_unknown_provenance() {
        let (backend, store) = memory_store(Duration::ZERO);
        let key = store
            .put("p1", "en", "common.json", &payload("Hello", provenance()))
            .await
            .unwrap();
        backend.remove(&meta_key(&key));

        let read = store.get(&key).await.unwrap();
        assert_eq!(read.metadata, Provenance::default());
    }

    #[tokio::test]
    async fn test_overwrite_without_metadata_clears_old_metadata() {
        let (_backend, store) = memory_store(Duration::ZERO);
        store
            .put("p1", "en", "common.json", &payload("Hello", provenance()))
            .await
            .unwrap();
        let key = store
            .put("p1", "en", "common.json", &payload("Hi", Provenance::default()))
            .await
            .unwrap();

        let read = store.get(&key).await.unwrap();
        assert_eq!(read.content["welcome"], "Hi");
        assert!(read.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (_backend, store) = memory_store(Duration::ZERO);
        assert!(matches!(
            store.get("p1-en-nope.json").await,
            Err(StorageError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_cache_serves_until_ttl() {
        let (_backend, store) = memory_store(Duration::from_secs(3600));
        let key = store
            .put("p1", "en", "common.json", &payload("Hello", Provenance::default()))
            .await
            .unwrap();
        assert_eq!(store.get(&key).await.unwrap().content["welcome"], "Hello");

        store
            .put("p1", "en", "common.json", &payload("Hi", Provenance::default()))
            .await
            .unwrap();
        assert_eq!(store.get(&key).await.unwrap().content["welcome"], "Hello");
        assert_eq!(store.get_uncached(&key).await.unwrap().content["welcome"], "Hi");
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_objects() {
        let (backend, store) = memory_store(Duration::from_secs(60));
        let key = store
            .put("p1", "en", "legacy.json", &payload("Hello", provenance()))
            .await
            .unwrap();
        store.get(&key).await.unwrap();

        let first = store.delete(&key).await.unwrap();
        assert!(first.content_removed && first.meta_removed);
        assert!(backend.is_empty());
        assert!(store.cache().get(&key).is_none());

        let second = store.delete(&key).await.unwrap();
        assert!(!second.content_removed && !second.meta_removed);
    }

    #[tokio::test]
    async fn test_delete_failure_surfaces() {
        let (backend, store) = memory_store(Duration::ZERO);
        let key = store
            .put("p1", "en", "legacy.json", &payload("Hello", provenance()))
            .await
            .unwrap();
        backend.fail_deletes(true);
        assert!(matches!(
            store.delete(&key).await,
            Err(StorageError::Io { .. })
        ));
    }

    #[tokio::test]
    async fn test_put_failure_surfaces() {
        let (backend, store) = memory_store(Duration::ZERO);
        backend.fail_puts(true);
        let result = store
            .put("p1", "en", "common.json", &payload("Hello", provenance()))
            .await;
        assert!(matches!(result, Err(StorageError::Io { .. })));
    }

    struct SlowBackend;

    #[async_trait::async_trait]
    impl BlobBackend for SlowBackend {
        async fn put(&self, _key: &str, _data: &[u8]) -> Result<(), StorageError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }

        async fn get(&self, _key: &str) -> Result<Vec<u8>, StorageError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(StorageError::NotFound)
        }

        async fn delete(&self, _key: &str) -> Result<bool, StorageError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(false)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_backend_times_out() {
        let store = BlobStore::new(
            Arc::new(SlowBackend),
            BlobCache::disabled(),
            Duration::from_millis(200),
        );

        let put = store
            .put("p1", "en", "common.json", &payload("Hello", Provenance::default()))
            .await;
        assert!(matches!(put, Err(StorageError::Timeout { op: "put", .. })));

        let get = store.get("p1-en-common.json").await;
        assert!(matches!(
            get,
            Err(StorageError::Timeout {
                op: "get",
                timeout_ms: 200,
                ..
            })
        ));

        assert!(matches!(
            store.delete("p1-en-common.json").await,
            Err(StorageError::Timeout { op: "delete", .. })
        ));
    }
}
