//! Staleness detection for submitted translations.
//!
//! A translation is valid only while the source hash it was authored against equals the
//! current hash for its key. Validity never recovers in place: once a record is marked
//! invalid, only a new submission against the current hash is valid again.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::hash::{HashToken, RemoteHasher};
use crate::store::Store;
use crate::types::TranslationRecord;

pub const REASON_KEY_REMOVED: &str = "key removed from source";
pub const REASON_NO_TRACKING: &str = "no source tracking";
pub const REASON_SOURCE_CHANGED: &str = "source value changed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationToValidate {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub source_hash: Option<String>,
}

impl From<&TranslationRecord> for TranslationToValidate {
    fn from(record: &TranslationRecord) -> Self {
        Self {
            id: record.id.clone(),
            key: record.key.clone(),
            source_hash: record.source_hash.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub id: String,
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Decision for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Valid,
    KeyRemoved,
    NoSourceTracking,
    SourceChanged,
}

impl Validity {
    /// Records without a recorded hash are treated as stale even if their text still
    /// matches the source.
    #[must_use]
    pub fn decide(recorded: Option<&str>, current: Option<&str>) -> Self {
        match (current, recorded) {
            (None, _) => Self::KeyRemoved,
            (Some(_), None) => Self::NoSourceTracking,
            (Some(current), Some(recorded)) if recorded != current => Self::SourceChanged,
            _ => Self::Valid,
        }
    }

    #[must_use]
    pub fn is_valid(self) -> bool {
        self == Self::Valid
    }

    #[must_use]
    pub fn reason(self) -> Option<&'static str> {
        match self {
            Self::Valid => None,
            Self::KeyRemoved => Some(REASON_KEY_REMOVED),
            Self::NoSourceTracking => Some(REASON_NO_TRACKING),
            Self::SourceChanged => Some(REASON_SOURCE_CHANGED),
        }
    }
}

/// Validates each translation against a key to hash manifest.
#[must_use]
pub fn validate(
    translations: &[TranslationToValidate],
    source_hashes: &HashMap<String, HashToken>,
) -> Vec<ValidationOutcome> {
    translations
        .iter()
        .map(|t| {
            let validity = Validity::decide(
                t.source_hash.as_deref(),
                source_hashes.get(&t.key).map(String::as_str),
            );
            ValidationOutcome {
                id: t.id.clone(),
                is_valid: validity.is_valid(),
                reason: validity.reason().map(str::to_string),
            }
        })
        .collect()
}

/// Result of a bulk invalidation pass over one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    pub filename: String,
    pub checked: usize,
    /// Records that failed validation in this pass.
    pub invalid: Vec<String>,
    /// Rows actually written; zero on a repeated pass over the same snapshot.
    pub written: usize,
}

pub struct StalenessEngine {
    store: Arc<dyn Store>,
    offload: Option<RemoteHasher>,
}

impl StalenessEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            offload: None,
        }
    }

    /// Sends comparisons to the compute service first. Failures fall back to the local
    /// comparison, which yields the same decisions.
    #[must_use]
    pub fn with_offload(mut self, offload: RemoteHasher) -> Self {
        self.offload = Some(offload);
        self
    }

    pub async fn validate(
        &self,
        translations: &[TranslationToValidate],
        source_hashes: &HashMap<String, HashToken>,
    ) -> Vec<ValidationOutcome> {
        if translations.is_empty() {
            return Vec::new();
        }
        if let Some(offload) = &self.offload {
            match offload.batch_validate(translations, source_hashes).await {
                Ok(results) => return results,
                Err(e) => warn!(
                    "Validation offload to {} failed, validating locally: {e}",
                    offload.base_url()
                ),
            }
        }
        validate(translations, source_hashes)
    }

    /// Current source hash for one key, used to stamp a new submission.
    pub fn current_hash(
        &self,
        project_id: &str,
        filename: &str,
        key: &str,
    ) -> Result<Option<HashToken>> {
        Ok(self
            .store
            .get_source_key(project_id, filename, key)?
            .map(|k| k.hash))
    }

    pub fn source_hashes(
        &self,
        project_id: &str,
        filename: &str,
    ) -> Result<HashMap<String, HashToken>> {
        Ok(self
            .store
            .list_source_keys(project_id, filename)?
            .into_iter()
            .map(|k| (k.key, k.hash))
            .collect())
    }

    /// Re-validates every still-valid translation of a source file against its current
    /// manifest and persists the failures. Already-invalid records are not touched.
    pub async fn invalidate_file(
        &self,
        project_id: &str,
        filename: &str,
    ) -> Result<InvalidationReport> {
        let manifest = self.source_hashes(project_id, filename)?;
        let records = self.store.list_valid_translations(project_id, filename)?;
        let candidates: Vec<TranslationToValidate> =
            records.iter().map(TranslationToValidate::from).collect();

        let outcomes = self.validate(&candidates, &manifest).await;
        let failures: Vec<(String, String)> = outcomes
            .into_iter()
            .filter(|o| !o.is_valid)
            .map(|o| {
                let reason = o
                    .reason
                    .unwrap_or_else(|| REASON_SOURCE_CHANGED.to_string());
                (o.id, reason)
            })
            .collect();

        let written = if failures.is_empty() {
            0
        } else {
            self.store.mark_translations_invalid(&failures)?
        };

        if written > 0 {
            info!(
                "Invalidated {written} of {} translations for {project_id}/{filename}",
                candidates.len()
            );
        } else {
            debug!(
                "No translations invalidated for {project_id}/{filename} ({} checked)",
                candidates.len()
            );
        }

        Ok(InvalidationReport {
            filename: filename.to_string(),
            checked: candidates.len(),
            invalid: failures.into_iter().map(|(id, _)| id).collect(),
            written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_value;
    use crate::store::SqliteStore;
    use crate::types::{SourceKey, TranslationStatus};
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn candidate(id: &str, key: &str, hash: Option<&str>) -> TranslationToValidate {
        TranslationToValidate {
            id: id.to_string(),
            key: key.to_string(),
            source_hash: hash.map(str::to_string),
        }
    }

    fn manifest(pairs: &[(&str, &str)]) -> HashMap<String, HashToken> {
        pairs
            .iter()
            .map(|(k, h)| (k.to_string(), h.to_string()))
            .collect()
    }

    #[test]
    fn test_validate_reasons() {
        let hashes = manifest(&[("key1", "hash1"), ("key2", "hash2")]);
        let results = validate(
            &[
                candidate("t1", "key1", Some("hash1")),
                candidate("t2", "key2", Some("hash_old")),
                candidate("t3", "key3", Some("hash3")),
                candidate("t4", "key1", None),
            ],
            &hashes,
        );

        assert_eq!(results.len(), 4);
        assert!(results[0].is_valid);
        assert_eq!(results[0].reason, None);
        assert_eq!(results[1].reason.as_deref(), Some(REASON_SOURCE_CHANGED));
        assert_eq!(results[2].reason.as_deref(), Some(REASON_KEY_REMOVED));
        assert_eq!(results[3].reason.as_deref(), Some(REASON_NO_TRACKING));
    }

    #[test]
    fn test_removed_key_wins_over_missing_tracking() {
        assert_eq!(Validity::decide(None, None), Validity::KeyRemoved);
    }

    #[test]
    fn test_changing_manifest_flips_result() {
        let hello = hash_value("Hello");
        let record = [candidate("t1", "welcome", Some(hello.as_str()))];
        let before = validate(&record, &manifest(&[("welcome", hello.as_str())]));
        assert!(before[0].is_valid);

        for other in ["Hi", "hello", "Hello ", ""] {
            let changed = hash_value(other);
            let after = validate(&record, &manifest(&[("welcome", changed.as_str())]));
            assert!(!after[0].is_valid, "{other:?} should invalidate");
            assert_eq!(after[0].reason.as_deref(), Some(REASON_SOURCE_CHANGED));
        }
    }

    fn seeded_store() -> Arc<SqliteStore> {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        store.initialize().unwrap();
        store
            .replace_source_keys(
                "p1",
                "common.json",
                &[SourceKey {
                    project_id: "p1".to_string(),
                    filename: "common.json".to_string(),
                    key: "welcome".to_string(),
                    value: "Hello".to_string(),
                    hash: hash_value("Hello"),
                    updated_at: Utc::now(),
                }],
            )
            .unwrap();
        store
    }

    fn record(id: &str, key: &str, source_hash: Option<String>) -> TranslationRecord {
        let now = Utc::now();
        TranslationRecord {
            id: id.to_string(),
            project_id: "p1".to_string(),
            language: "fr".to_string(),
            filename: "common.json".to_string(),
            key: key.to_string(),
            value: "Bonjour".to_string(),
            user_id: "u1".to_string(),
            status: TranslationStatus::Pending,
            source_hash,
            is_valid: true,
            invalid_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_current_hash() {
        let engine = StalenessEngine::new(seeded_store());
        assert_eq!(
            engine.current_hash("p1", "common.json", "welcome").unwrap(),
            Some(hash_value("Hello"))
        );
        assert_eq!(engine.current_hash("p1", "common.json", "nope").unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalidate_file_is_idempotent() {
        let store = seeded_store();
        store
            .create_translation(&record("t1", "welcome", Some(hash_value("Hello"))))
            .unwrap();
        store
            .create_translation(&record("t2", "welcome", Some(hash_value("Hullo"))))
            .unwrap();
        store.create_translation(&record("t3", "welcome", None)).unwrap();
        store
            .create_translation(&record("t4", "gone", Some(hash_value("x"))))
            .unwrap();

        let engine = StalenessEngine::new(store.clone());
        let first = engine.invalidate_file("p1", "common.json").await.unwrap();
        assert_eq!(first.checked, 4);
        assert_eq!(first.invalid, vec!["t2", "t3", "t4"]);
        assert_eq!(first.written, 3);

        let second = engine.invalidate_file("p1", "common.json").await.unwrap();
        assert_eq!(second.checked, 1);
        assert!(second.invalid.is_empty());
        assert_eq!(second.written, 0);

        let t3 = store.get_translation("t3").unwrap().unwrap();
        assert_eq!(t3.invalid_reason.as_deref(), Some(REASON_NO_TRACKING));
        let t4 = store.get_translation("t4").unwrap().unwrap();
        assert_eq!(t4.invalid_reason.as_deref(), Some(REASON_KEY_REMOVED));
    }

    #[tokio::test]
    async fn test_invalid_records_are_not_revalidated() {
        let store = seeded_store();
        let mut stale = record("t1", "welcome", Some(hash_value("Hello")));
        stale.is_valid = false;
        stale.invalid_reason = Some(REASON_SOURCE_CHANGED.to_string());
        store.create_translation(&stale).unwrap();

        let engine = StalenessEngine::new(store.clone());
        let report = engine.invalidate_file("p1", "common.json").await.unwrap();
        assert_eq!(report.checked, 0);
        assert!(!store.get_translation("t1").unwrap().unwrap().is_valid);
    }

    async fn validate_server(response: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/validate"))
            .respond_with(response)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_failed_offload_keeps_local_decisions() {
        let hashes = manifest(&[("welcome", "h1"), ("bye", "h2")]);
        let candidates = [
            candidate("t1", "welcome", Some("h1")),
            candidate("t2", "welcome", Some("old")),
            candidate("t3", "gone", Some("h3")),
            candidate("t4", "bye", None),
        ];
        let expected = validate(&candidates, &hashes);

        let all_valid = |ids: &[&str]| {
            let results: Vec<_> = ids
                .iter()
                .map(|id| json!({ "id": id, "is_valid": true }))
                .collect();
            ResponseTemplate::new(200).set_body_json(json!({ "results": results }))
        };
        let servers = [
            validate_server(ResponseTemplate::new(500)).await,
            validate_server(all_valid(&["x1", "x2", "x3", "x4"])).await,
            validate_server(all_valid(&["t1"])).await,
            validate_server(ResponseTemplate::new(200).set_body_string("not json")).await,
        ];

        for server in &servers {
            let remote = RemoteHasher::new(&server.uri(), Duration::from_secs(2)).unwrap();
            let engine = StalenessEngine::new(seeded_store()).with_offload(remote);
            assert_eq!(engine.validate(&candidates, &hashes).await, expected);
        }
    }

    #[tokio::test]
    async fn test_invalidate_file_survives_offload_failure() {
        let store = seeded_store();
        store
            .create_translation(&record("t1", "welcome", Some(hash_value("Hello"))))
            .unwrap();
        store
            .create_translation(&record("t2", "welcome", Some(hash_value("Hullo"))))
            .unwrap();

        let server = validate_server(ResponseTemplate::new(503)).await;
        let remote = RemoteHasher::new(&server.uri(), Duration::from_secs(2)).unwrap();
        let engine = StalenessEngine::new(store.clone()).with_offload(remote);

        let report = engine.invalidate_file("p1", "common.json").await.unwrap();
        assert_eq!(report.invalid, vec!["t2"]);
        assert!(store.get_translation("t1").unwrap().unwrap().is_valid);
        assert!(!store.get_translation("t2").unwrap().unwrap().is_valid);
    }
}
