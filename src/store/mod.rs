mod etag;
mod schema;
mod sqlite;

pub use etag::{EMPTY_ETAG, etag, view_etag};
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::types::*;

/// Store defines the relational index the sync engine keeps beside the blob store.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // File index operations

    /// Inserts or updates the row at the file's coordinate. Last write wins on
    /// commit ref, blob key, hash, key count and `last_updated`; `deleting` is cleared.
    fn upsert_file(&self, file: &TranslationFile) -> Result<()>;
    fn get_file(&self, coord: &FileCoordinate) -> Result<Option<TranslationFile>>;
    fn list_files(
        &self,
        project_id: &str,
        branch: &str,
        language: Option<&str>,
    ) -> Result<Vec<TranslationFile>>;
    /// Sets `deleting`. Returns false when no row exists at the coordinate.
    fn mark_file_deleting(&self, coord: &FileCoordinate) -> Result<bool>;
    /// Deletes the row only while `deleting` is still set.
    fn delete_file_if_deleting(&self, coord: &FileCoordinate) -> Result<bool>;
    fn reset_file_deleting(&self, coord: &FileCoordinate) -> Result<bool>;
    /// Counts rows other than `coord` whose content lives at `blob_key`. Blob keys carry
    /// no branch, so every branch of a project shares one object per file.
    fn count_files_sharing_blob(&self, blob_key: &str, coord: &FileCoordinate) -> Result<usize>;

    // Source manifest operations

    /// Makes `keys` the complete manifest for one source file. Rows whose hash did not
    /// change keep their `updated_at`.
    fn replace_source_keys(&self, project_id: &str, filename: &str, keys: &[SourceKey])
    -> Result<()>;
    fn get_source_key(&self, project_id: &str, filename: &str, key: &str)
    -> Result<Option<SourceKey>>;
    fn list_source_keys(&self, project_id: &str, filename: &str) -> Result<Vec<SourceKey>>;

    // Translation record operations

    fn create_translation(&self, record: &TranslationRecord) -> Result<()>;
    fn get_translation(&self, id: &str) -> Result<Option<TranslationRecord>>;
    fn list_translations(
        &self,
        project_id: &str,
        language: Option<&str>,
        filename: &str,
    ) -> Result<Vec<TranslationRecord>>;
    /// Records currently marked valid and not tombstoned, across all languages.
    fn list_valid_translations(&self, project_id: &str, filename: &str)
    -> Result<Vec<TranslationRecord>>;
    fn list_accepted_translations(
        &self,
        project_id: &str,
        language: &str,
    ) -> Result<Vec<TranslationRecord>>;
    /// Persists `is_valid = false` with a reason. Records already invalid are left alone;
    /// the return value counts rows actually written.
    fn mark_translations_invalid(&self, invalid: &[(String, String)]) -> Result<usize>;
    fn set_translation_status(&self, id: &str, status: TranslationStatus) -> Result<()>;
    /// Approves `id` and demotes any other approved or committed record at the same
    /// coordinate to `rejected`, atomically. Returns the number demoted.
    fn approve_translation(&self, id: &str) -> Result<usize>;
}
