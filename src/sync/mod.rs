//! Operations the HTTP layer calls: importing files, submitting and reviewing
//! translations, and the read views built on top of them.
//!
//! Every operation writes through both stores in a fixed order. For an import that is
//! blob first, then index row, then source manifest, and bulk invalidation only after all
//! rows of the request are written, so invalidation always sees the new hashes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::blob::{BlobStore, FilesystemBackend, StorageError};
use crate::config::{EngineConfig, ImportLimits};
use crate::error::{Error, Result};
use crate::hash::{FallbackHasher, RemoteHasher, hash_value};
use crate::overlay::{MergedEntry, Overlay, find_target, target_filename};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::staleness::{InvalidationReport, StalenessEngine, Validity};
use crate::store::{SqliteStore, Store, etag, view_etag};
use crate::types::{
    BlobPayload, Content, FileCoordinate, FileKey, Project, Provenance, SourceKey,
    TranslationFile, TranslationRecord, TranslationStatus,
};

/// Answers whether a user may act on a project. Roles are evaluated elsewhere.
pub trait AccessControl: Send + Sync {
    fn has_access(&self, project_id: &str, user_id: &str) -> bool;
}

/// Grants everything. Used by the CLI, which runs with the operator's authority.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn has_access(&self, _project_id: &str, _user_id: &str) -> bool {
        true
    }
}

/// One file as supplied by the upstream source provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub language: String,
    pub filename: String,
    pub content: Content,
    #[serde(default)]
    pub metadata: Provenance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRequest {
    pub project_id: String,
    pub branch: String,
    pub source_language: String,
    #[serde(default)]
    pub commit_ref: Option<String>,
    pub files: Vec<SourceFile>,
    /// Treat `files` as the complete upstream listing and remove everything else.
    #[serde(default)]
    pub prune: bool,
}

impl ImportRequest {
    fn listing(&self) -> HashSet<FileKey> {
        self.files
            .iter()
            .map(|f| FileKey::new(f.language.clone(), f.filename.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub uploaded: Vec<FileKey>,
    pub total_keys: usize,
    pub invalidated: Vec<InvalidationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciled: Option<ReconcileReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTranslation {
    pub project_id: String,
    pub language: String,
    /// Source file the key belongs to.
    pub filename: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ListOutcome {
    NotModified {
        etag: String,
    },
    Files {
        files: Vec<TranslationFile>,
        etag: String,
    },
}

impl ListOutcome {
    #[must_use]
    pub fn etag(&self) -> &str {
        match self {
            Self::NotModified { etag } | Self::Files { etag, .. } => etag,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileView {
    pub source: TranslationFile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<TranslationFile>,
    pub entries: Vec<MergedEntry>,
    pub etag: String,
}

/// One approved change as it would appear in an export patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportChange {
    pub filename: String,
    pub key: String,
    pub previous_value: Option<String>,
    pub new_value: String,
    pub translation_id: String,
}

/// Hash identifying a file's full content: the hash of its canonical JSON.
pub fn content_hash(content: &Content) -> Result<String> {
    Ok(hash_value(&serde_json::to_string(content)?))
}

pub struct SyncEngine {
    store: Arc<dyn Store>,
    blobs: Arc<BlobStore>,
    hasher: FallbackHasher,
    staleness: StalenessEngine,
    reconciler: Reconciler,
    access: Arc<dyn AccessControl>,
    limits: ImportLimits,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn Store>, blobs: Arc<BlobStore>) -> Self {
        Self {
            staleness: StalenessEngine::new(Arc::clone(&store)),
            reconciler: Reconciler::new(Arc::clone(&store), Arc::clone(&blobs)),
            store,
            blobs,
            hasher: FallbackHasher::local(),
            access: Arc::new(AllowAll),
            limits: ImportLimits::default(),
        }
    }

    /// Opens the SQLite index and filesystem blob store under `config.data_dir`.
    pub fn open(config: &EngineConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let store = SqliteStore::new(config.db_path())?;
        store.initialize()?;

        let blobs = BlobStore::new(
            Arc::new(FilesystemBackend::new(&config.data_dir)),
            config.blob_cache(),
            config.request_timeout(),
        );

        let mut engine = Self::new(Arc::new(store), Arc::new(blobs))
            .with_hasher(config.build_hasher()?)
            .with_limits(config.limits);
        if let Some(remote) = config.remote_hasher()? {
            engine = engine.with_offload(remote);
        }
        Ok(engine)
    }

    #[must_use]
    pub fn with_hasher(mut self, hasher: FallbackHasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Offloads validation to the compute service.
    #[must_use]
    pub fn with_offload(mut self, remote: RemoteHasher) -> Self {
        self.staleness = StalenessEngine::new(Arc::clone(&self.store)).with_offload(remote);
        self
    }

    #[must_use]
    pub fn with_access(mut self, access: Arc<dyn AccessControl>) -> Self {
        self.access = access;
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: ImportLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    #[must_use]
    pub fn blobs(&self) -> &Arc<BlobStore> {
        &self.blobs
    }

    #[must_use]
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    fn authorize(&self, project_id: &str, user_id: &str) -> Result<()> {
        if self.access.has_access(project_id, user_id) {
            Ok(())
        } else {
            debug!("User {user_id} denied on project {project_id}");
            Err(Error::Forbidden)
        }
    }

    fn check_limits(&self, files: &[SourceFile]) -> Result<()> {
        let limits = &self.limits;
        let mut total_keys = 0usize;
        let mut total_bytes = 0usize;

        for file in files {
            if file.filename.is_empty() || file.language.is_empty() {
                return Err(Error::BadRequest(
                    "every file needs a language and a filename".to_string(),
                ));
            }
            let keys = file.content.len();
            let bytes = serde_json::to_vec(&file.content)?.len();
            if keys > limits.max_keys_per_file {
                return Err(Error::LimitExceeded(format!(
                    "file {} has too many keys: {keys}",
                    file.filename
                )));
            }
            if bytes > limits.max_bytes_per_file {
                return Err(Error::LimitExceeded(format!(
                    "file {} is too large: {bytes} bytes",
                    file.filename
                )));
            }
            total_keys += keys;
            total_bytes += bytes;
        }

        if total_keys > limits.max_total_keys {
            return Err(Error::LimitExceeded(format!(
                "total key count exceeds limit: {total_keys}"
            )));
        }
        if total_bytes > limits.max_total_bytes {
            return Err(Error::LimitExceeded(format!(
                "total upload size too large: {total_bytes} bytes"
            )));
        }
        Ok(())
    }

    /// Imports files from the upstream source. Nothing is written if any limit is
    /// exceeded.
    pub async fn import(&self, request: &ImportRequest) -> Result<ImportReport> {
        self.check_limits(&request.files)?;

        let now = Utc::now();
        let mut report = ImportReport::default();
        let mut source_files = Vec::new();

        for file in &request.files {
            let source_hash = content_hash(&file.content)?;
            let payload = BlobPayload {
                content: file.content.clone(),
                metadata: file.metadata.clone(),
                source_hash: source_hash.clone(),
                commit_ref: request.commit_ref.clone(),
                uploaded_at: now,
            };
            let blob_key = self
                .blobs
                .put(&request.project_id, &file.language, &file.filename, &payload)
                .await?;

            self.store.upsert_file(&TranslationFile {
                id: Uuid::new_v4().to_string(),
                project_id: request.project_id.clone(),
                branch: request.branch.clone(),
                language: file.language.clone(),
                filename: file.filename.clone(),
                commit_ref: request.commit_ref.clone(),
                blob_key,
                source_hash,
                total_keys: i64::try_from(file.content.len()).unwrap_or(i64::MAX),
                uploaded_at: now,
                last_updated: now,
                deleting: false,
            })?;

            if file.language == request.source_language {
                let values: Vec<String> = file.content.values().cloned().collect();
                let hashes = self.hasher.batch_hash(&values).await?;
                let keys: Vec<SourceKey> = file
                    .content
                    .iter()
                    .zip(hashes)
                    .map(|((key, value), hash)| SourceKey {
                        project_id: request.project_id.clone(),
                        filename: file.filename.clone(),
                        key: key.clone(),
                        value: value.clone(),
                        hash,
                        updated_at: now,
                    })
                    .collect();
                self.store
                    .replace_source_keys(&request.project_id, &file.filename, &keys)?;
                source_files.push(file.filename.as_str());
            }

            report.total_keys += file.content.len();
            report
                .uploaded
                .push(FileKey::new(file.language.clone(), file.filename.clone()));
        }

        for filename in source_files {
            let invalidation = self
                .staleness
                .invalidate_file(&request.project_id, filename)
                .await?;
            report.invalidated.push(invalidation);
        }

        if request.prune {
            let reconciled = self
                .reconciler
                .reconcile(&request.project_id, &request.branch, &request.listing())
                .await?;
            report.reconciled = Some(reconciled);
        }

        info!(
            "Imported {} files ({} keys) into {}/{}",
            report.uploaded.len(),
            report.total_keys,
            request.project_id,
            request.branch
        );
        Ok(report)
    }

    /// Stores a new pending translation stamped with the current source hash of its key.
    pub fn submit_translation(
        &self,
        submission: &NewTranslation,
        user_id: &str,
    ) -> Result<TranslationRecord> {
        self.authorize(&submission.project_id, user_id)?;

        let current = self
            .staleness
            .current_hash(&submission.project_id, &submission.filename, &submission.key)?
            .ok_or_else(|| {
                Error::BadRequest(format!(
                    "key '{}' does not exist in {}",
                    submission.key, submission.filename
                ))
            })?;

        let now = Utc::now();
        let record = TranslationRecord {
            id: Uuid::new_v4().to_string(),
            project_id: submission.project_id.clone(),
            language: submission.language.clone(),
            filename: submission.filename.clone(),
            key: submission.key.clone(),
            value: submission.value.clone(),
            user_id: user_id.to_string(),
            status: TranslationStatus::Pending,
            source_hash: Some(current),
            is_valid: true,
            invalid_reason: None,
            created_at: now,
            updated_at: now,
        };
        self.store.create_translation(&record)?;
        Ok(record)
    }

    fn authorized_record(&self, id: &str, user_id: &str) -> Result<TranslationRecord> {
        let record = self.store.get_translation(id)?.ok_or(Error::NotFound)?;
        self.authorize(&record.project_id, user_id)?;
        Ok(record)
    }

    /// Approves a record, demoting any other accepted record for the same key.
    ///
    /// The stored validity flag is re-checked against the current manifest first, since
    /// a source change may not have been swept yet.
    pub fn approve_translation(&self, id: &str, approver: &str) -> Result<TranslationRecord> {
        let record = self.authorized_record(id, approver)?;
        if !record.is_valid {
            return Err(Error::Conflict(format!(
                "translation {id} is stale: {}",
                record.invalid_reason.as_deref().unwrap_or("invalid")
            )));
        }

        let current =
            self.staleness
                .current_hash(&record.project_id, &record.filename, &record.key)?;
        let validity = Validity::decide(record.source_hash.as_deref(), current.as_deref());
        if let Some(reason) = validity.reason() {
            self.store
                .mark_translations_invalid(&[(id.to_string(), reason.to_string())])?;
            return Err(Error::Conflict(format!(
                "translation {id} is stale: {reason}"
            )));
        }

        let demoted = self.store.approve_translation(id)?;
        if demoted > 0 {
            debug!("Approving {id} demoted {demoted} earlier translations");
        }
        self.store.get_translation(id)?.ok_or(Error::NotFound)
    }

    pub fn reject_translation(&self, id: &str, reviewer: &str) -> Result<()> {
        let record = self.authorized_record(id, reviewer)?;
        if record.status == TranslationStatus::Deleted {
            return Err(Error::Conflict(format!("translation {id} is deleted")));
        }
        self.store
            .set_translation_status(id, TranslationStatus::Rejected)
    }

    /// Tombstones a record. Records are never removed.
    pub fn delete_translation(&self, id: &str, user_id: &str) -> Result<()> {
        self.authorized_record(id, user_id)?;
        self.store.set_translation_status(id, TranslationStatus::Deleted)
    }

    /// Marks approved records as exported. Ids that are not currently approved are
    /// skipped; returns how many were marked.
    pub fn mark_committed(&self, ids: &[String], user_id: &str) -> Result<usize> {
        let mut marked = 0;
        for id in ids {
            let record = self.store.get_translation(id)?;
            if let Some(record) = &record {
                self.authorize(&record.project_id, user_id)?;
            }
            match record {
                Some(record) if record.status == TranslationStatus::Approved => {
                    self.store
                        .set_translation_status(id, TranslationStatus::Committed)?;
                    marked += 1;
                }
                Some(record) => debug!("Not committing {id}: status is {}", record.status),
                None => debug!("Not committing {id}: no such translation"),
            }
        }
        Ok(marked)
    }

    pub fn list_files(
        &self,
        project_id: &str,
        branch: &str,
        language: Option<&str>,
        if_none_match: Option<&str>,
    ) -> Result<ListOutcome> {
        let files = self.store.list_files(project_id, branch, language)?;
        let etag = etag(&files);
        if if_none_match == Some(etag.as_str()) {
            return Ok(ListOutcome::NotModified { etag });
        }
        Ok(ListOutcome::Files { files, etag })
    }

    /// Reads a row's payload. A cached payload older than the row is read again, so the
    /// content always matches the row the etag was built from.
    async fn load(&self, row: &TranslationFile) -> Result<Arc<BlobPayload>> {
        let missing = |e: StorageError| match e {
            StorageError::NotFound => Error::FileNotFound {
                blob_key: row.blob_key.clone(),
            },
            e => e.into(),
        };

        let payload = self.blobs.get(&row.blob_key).await.map_err(missing)?;
        if payload.source_hash == row.source_hash {
            return Ok(payload);
        }
        debug!("Cached blob {} is behind its index row, reloading", row.blob_key);
        self.blobs.reload(&row.blob_key).await.map_err(missing)
    }

    /// Re-checks accepted records whose source key changed after they were last written
    /// and persists any that turned stale. Returns true if anything was written.
    fn recheck_overrides(
        &self,
        overrides: &[TranslationRecord],
        manifest: &HashMap<&str, &SourceKey>,
    ) -> Result<bool> {
        let stale: Vec<(String, String)> = overrides
            .iter()
            .filter(|r| r.status.is_accepted() && r.is_valid)
            .filter_map(|record| {
                let source = manifest.get(record.key.as_str());
                if source.is_some_and(|k| k.updated_at <= record.updated_at) {
                    return None;
                }
                Validity::decide(
                    record.source_hash.as_deref(),
                    source.map(|k| k.hash.as_str()),
                )
                .reason()
                .map(|reason| (record.id.clone(), reason.to_string()))
            })
            .collect();

        if stale.is_empty() {
            return Ok(false);
        }
        let written = self.store.mark_translations_invalid(&stale)?;
        debug!("Invalidated {written} accepted translations missed by the last sweep");
        Ok(written > 0)
    }

    async fn find_target_row(
        &self,
        project: &Project,
        branch: &str,
        language: &str,
        source_filename: &str,
    ) -> Result<Option<TranslationFile>> {
        let rows = self.store.list_files(&project.id, branch, Some(language))?;
        let name = find_target(
            source_filename,
            &project.source_language,
            language,
            rows.iter().map(|r| r.filename.as_str()),
        )
        .map(str::to_string);
        Ok(name.and_then(|name| rows.into_iter().find(|r| r.filename == name)))
    }

    /// Source file merged with its target-language counterpart and accepted web edits.
    pub async fn file_view(
        &self,
        project: &Project,
        branch: &str,
        target_language: &str,
        source_filename: &str,
    ) -> Result<FileView> {
        let coord = FileCoordinate::new(
            project.id.clone(),
            branch,
            project.source_language.clone(),
            source_filename,
        );
        let source_row = self.store.get_file(&coord)?.ok_or(Error::NotFound)?;
        let source = self.load(&source_row).await?;

        let target_row = self
            .find_target_row(project, branch, target_language, source_filename)
            .await?;
        let target = match &target_row {
            Some(row) => Some(self.load(row).await?),
            None => None,
        };

        let source_keys = self.store.list_source_keys(&project.id, source_filename)?;
        let manifest: HashMap<&str, &SourceKey> =
            source_keys.iter().map(|k| (k.key.as_str(), k)).collect();

        let mut overrides =
            self.store
                .list_translations(&project.id, Some(target_language), source_filename)?;
        if self.recheck_overrides(&overrides, &manifest)? {
            overrides =
                self.store
                    .list_translations(&project.id, Some(target_language), source_filename)?;
        }

        // An imported value is stale when its source key changed after the target import.
        let stale: Vec<&str> = match &target_row {
            Some(row) => source_keys
                .iter()
                .filter(|k| k.updated_at > row.last_updated)
                .map(|k| k.key.as_str())
                .collect(),
            None => Vec::new(),
        };

        let entries = Overlay::new(&source.content)
            .target(target.as_ref().map(|t| &t.content))
            .overrides(&overrides)
            .with_stale_keys(stale.iter().copied())
            .resolve();

        let mut rows = vec![source_row.clone()];
        rows.extend(target_row.iter().cloned());
        let accepted: Vec<TranslationRecord> = overrides
            .into_iter()
            .filter(|r| r.status.is_accepted())
            .collect();

        Ok(FileView {
            etag: view_etag(&rows, &accepted),
            source: source_row,
            target: target_row,
            entries,
        })
    }

    /// Approved, not yet committed changes for one language, grouped by target file.
    pub async fn export_diff(
        &self,
        project: &Project,
        branch: &str,
        language: &str,
    ) -> Result<Vec<ExportChange>> {
        let mut by_source: BTreeMap<String, Vec<TranslationRecord>> = BTreeMap::new();
        for record in self.store.list_accepted_translations(&project.id, language)? {
            if record.status == TranslationStatus::Approved {
                by_source
                    .entry(record.filename.clone())
                    .or_default()
                    .push(record);
            }
        }

        let mut changes = Vec::new();
        for (source_filename, records) in by_source {
            let target_row = self
                .find_target_row(project, branch, language, &source_filename)
                .await?;
            let (filename, current) = match &target_row {
                Some(row) => (row.filename.clone(), Some(self.load(row).await?)),
                None => (
                    target_filename(&source_filename, &project.source_language, language),
                    None,
                ),
            };

            for record in records {
                let previous_value = current
                    .as_ref()
                    .and_then(|c| c.content.get(&record.key).cloned());
                if previous_value.as_deref() == Some(record.value.as_str()) {
                    debug!("Skipping unchanged {filename}:{}", record.key);
                    continue;
                }
                changes.push(ExportChange {
                    filename: filename.clone(),
                    key: record.key,
                    previous_value,
                    new_value: record.value,
                    translation_id: record.id,
                });
            }
        }
        Ok(changes)
    }
}
