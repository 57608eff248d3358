use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TranslationStatus;

/// Key to value map of a single locale file. Ordered so serialization is canonical.
pub type Content = BTreeMap<String, String>;

/// The project as seen by the sync engine. Owned by the surrounding application; its id
/// is the blob namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub source_language: String,
}

/// Unique address of an indexed file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileCoordinate {
    pub project_id: String,
    pub branch: String,
    pub language: String,
    pub filename: String,
}

impl FileCoordinate {
    pub fn new(
        project_id: impl Into<String>,
        branch: impl Into<String>,
        language: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            branch: branch.into(),
            language: language.into(),
            filename: filename.into(),
        }
    }
}

/// A file as it appears in an upstream listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileKey {
    pub language: String,
    pub filename: String,
}

impl FileKey {
    pub fn new(language: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            filename: filename.into(),
        }
    }
}

/// Index row for one imported file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationFile {
    pub id: String,
    pub project_id: String,
    pub branch: String,
    pub language: String,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_ref: Option<String>,
    pub blob_key: String,
    pub source_hash: String,
    pub total_keys: i64,
    pub uploaded_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deleting: bool,
}

impl TranslationFile {
    #[must_use]
    pub fn coordinate(&self) -> FileCoordinate {
        FileCoordinate::new(
            self.project_id.clone(),
            self.branch.clone(),
            self.language.clone(),
            self.filename.clone(),
        )
    }

    #[must_use]
    pub fn file_key(&self) -> FileKey {
        FileKey::new(self.language.clone(), self.filename.clone())
    }
}

/// Current source text and hash for one key. This is the manifest staleness is judged against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceKey {
    pub project_id: String,
    pub filename: String,
    pub key: String,
    pub value: String,
    pub hash: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRecord {
    pub id: String,
    pub project_id: String,
    pub language: String,
    pub filename: String,
    pub key: String,
    pub value: String,
    pub user_id: String,
    pub status: TranslationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_hash: Option<String>,
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-key history entry inside a file's provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyHistory {
    pub commit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Blame-style provenance stored beside a file's content.
///
/// An empty value means "unknown provenance" and is what readers get when the
/// metadata object is missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_ref: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keys: BTreeMap<String, KeyHistory>,
}

impl Provenance {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commit_ref.is_none() && self.keys.is_empty()
    }
}

/// A file read back from the blob store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobPayload {
    pub content: Content,
    pub metadata: Provenance,
    pub source_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_ref: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}
