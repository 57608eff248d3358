//! Removal of files that disappeared upstream.
//!
//! Each orphan goes through a guarded two-phase delete:
//!
//! ```text
//! Active --mark--> Marked --conditional delete--> Deleted
//!                    |
//!                    +--lost the guard--> Active (flag reset, retried next pass)
//! ```
//!
//! The `deleting` flag on the index row is the only coordination between concurrent
//! reconcilers. A crash at any point leaves at worst a row stuck in `Marked`, which the
//! next pass marks again (idempotently) and finishes.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::blob::BlobStore;
use crate::error::Result;
use crate::store::Store;
use crate::types::{FileKey, TranslationFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletionState {
    Active,
    Marked,
    Deleted,
}

/// One orphan file moving through the delete protocol.
pub struct OrphanDeletion<'a> {
    store: &'a dyn Store,
    blobs: &'a BlobStore,
    file: TranslationFile,
    state: DeletionState,
}

impl<'a> OrphanDeletion<'a> {
    pub fn new(store: &'a dyn Store, blobs: &'a BlobStore, file: TranslationFile) -> Self {
        Self {
            store,
            blobs,
            file,
            state: DeletionState::Active,
        }
    }

    #[must_use]
    pub fn state(&self) -> DeletionState {
        self.state
    }

    #[must_use]
    pub fn file(&self) -> &TranslationFile {
        &self.file
    }

    /// Sets `deleting` on the row. Returns false, staying `Active`, if the row is gone or
    /// the write failed; the file must then be skipped for this pass.
    pub fn mark(&mut self) -> bool {
        debug_assert_eq!(self.state, DeletionState::Active);
        match self.store.mark_file_deleting(&self.file.coordinate()) {
            Ok(true) => {
                self.state = DeletionState::Marked;
                true
            }
            Ok(false) => {
                debug!("Orphan {} already gone", self.file.blob_key);
                false
            }
            Err(e) => {
                warn!("Could not mark {} for deletion: {e}", self.file.blob_key);
                false
            }
        }
    }

    /// True while another index row, usually the same file on another branch, still
    /// points at this file's blob.
    pub fn blob_shared(&self) -> Result<bool> {
        let others = self
            .store
            .count_files_sharing_blob(&self.file.blob_key, &self.file.coordinate())?;
        Ok(others > 0)
    }

    /// Best-effort removal of the content and metadata objects. Failures are logged and
    /// reported but never stop the row delete.
    pub async fn delete_blobs(&self) -> bool {
        debug_assert_eq!(self.state, DeletionState::Marked);
        match self.blobs.delete(&self.file.blob_key).await {
            Ok(removed) => {
                debug!(
                    "Deleted blobs for {} (content: {}, meta: {})",
                    self.file.blob_key, removed.content_removed, removed.meta_removed
                );
                true
            }
            Err(e) => {
                warn!(
                    "Failed to delete blobs for {}, leaving dead storage: {e}",
                    self.file.blob_key
                );
                false
            }
        }
    }

    /// Deletes the row only if `deleting` is still set. If the guard no longer holds,
    /// resets the flag and returns to `Active`.
    pub fn commit(&mut self) -> Result<DeletionState> {
        debug_assert_eq!(self.state, DeletionState::Marked);
        let coord = self.file.coordinate();
        if self.store.delete_file_if_deleting(&coord)? {
            self.state = DeletionState::Deleted;
        } else {
            self.store.reset_file_deleting(&coord)?;
            self.state = DeletionState::Active;
        }
        Ok(self.state)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub reclaimed: Vec<FileKey>,
    /// Orphans that could not be marked this pass.
    pub skipped: Vec<FileKey>,
    /// Orphans whose guard was lost between mark and delete.
    pub rolled_back: Vec<FileKey>,
    /// Rows found still marked from an earlier, interrupted pass.
    pub recovered: Vec<FileKey>,
    /// Reclaimed rows whose blob was kept because another row still uses it.
    pub shared_blobs: Vec<FileKey>,
    pub blob_failures: usize,
}

impl ReconcileReport {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.reclaimed.is_empty()
            && self.skipped.is_empty()
            && self.rolled_back.is_empty()
            && self.recovered.is_empty()
    }
}

pub struct Reconciler {
    store: Arc<dyn Store>,
    blobs: Arc<BlobStore>,
    allow_empty_listing: bool,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, blobs: Arc<BlobStore>) -> Self {
        Self {
            store,
            blobs,
            allow_empty_listing: false,
        }
    }

    /// By default an empty upstream listing is treated as a failed fetch and nothing is
    /// removed. This allows it to mean "everything was deleted".
    #[must_use]
    pub fn allow_empty_listing(mut self, allow: bool) -> Self {
        self.allow_empty_listing = allow;
        self
    }

    /// Removes every indexed file of `project_id`/`branch` that is not in `upstream`.
    pub async fn reconcile(
        &self,
        project_id: &str,
        branch: &str,
        upstream: &HashSet<FileKey>,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        if upstream.is_empty() && !self.allow_empty_listing {
            warn!("Empty upstream listing for {project_id}/{branch}, skipping reconciliation");
            return Ok(report);
        }

        let rows = self.store.list_files(project_id, branch, None)?;
        for row in rows {
            let key = row.file_key();

            if upstream.contains(&key) {
                if row.deleting {
                    warn!(
                        "File {} is present upstream but marked deleting, clearing flag",
                        row.blob_key
                    );
                    self.store.reset_file_deleting(&row.coordinate())?;
                    report.recovered.push(key);
                }
                continue;
            }

            if row.deleting {
                warn!(
                    "File {} was left marked by an interrupted pass, retrying delete",
                    row.blob_key
                );
                report.recovered.push(key.clone());
            }

            let mut deletion = OrphanDeletion::new(self.store.as_ref(), &self.blobs, row);
            if !deletion.mark() {
                report.skipped.push(key);
                continue;
            }
            match deletion.blob_shared() {
                Ok(true) => {
                    debug!(
                        "Keeping blob {}, still referenced by another branch",
                        deletion.file().blob_key
                    );
                    report.shared_blobs.push(key.clone());
                }
                Ok(false) => {
                    if !deletion.delete_blobs().await {
                        report.blob_failures += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        "Could not check references to {}, keeping blob: {e}",
                        deletion.file().blob_key
                    );
                    report.blob_failures += 1;
                }
            }
            match deletion.commit()? {
                DeletionState::Deleted => report.reclaimed.push(key),
                _ => {
                    warn!(
                        "Lost delete guard for {}, flag reset for a later pass",
                        deletion.file().blob_key
                    );
                    report.rolled_back.push(key);
                }
            }
        }

        if !report.is_noop() {
            info!(
                "Reconciled {project_id}/{branch}: {} reclaimed, {} skipped, {} rolled back",
                report.reclaimed.len(),
                report.skipped.len(),
                report.rolled_back.len()
            );
        }
        Ok(report)
    }
}
