use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params};

use super::Store;
use super::schema::SCHEMA;
use crate::error::{Error, Result};
use crate::types::*;

const FILE_COLUMNS: &str = "id, project_id, branch, language, filename, commit_ref, blob_key,
    source_hash, total_keys, uploaded_at, last_updated, deleting";

const TRANSLATION_COLUMNS: &str = "id, project_id, language, filename, key, value, user_id,
    status, source_hash, is_valid, invalid_reason, created_at, updated_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, mostly useful for tests.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

impl FromSql for TranslationStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        TranslationStatus::parse(s)
            .ok_or_else(|| FromSqlError::Other(format!("unknown translation status '{s}'").into()))
    }
}

impl ToSql for TranslationStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<TranslationFile> {
    Ok(TranslationFile {
        id: row.get(0)?,
        project_id: row.get(1)?,
        branch: row.get(2)?,
        language: row.get(3)?,
        filename: row.get(4)?,
        commit_ref: row.get(5)?,
        blob_key: row.get(6)?,
        source_hash: row.get(7)?,
        total_keys: row.get(8)?,
        uploaded_at: parse_datetime(&row.get::<_, String>(9)?),
        last_updated: parse_datetime(&row.get::<_, String>(10)?),
        deleting: row.get(11)?,
    })
}

fn source_key_from_row(row: &Row<'_>) -> rusqlite::Result<SourceKey> {
    Ok(SourceKey {
        project_id: row.get(0)?,
        filename: row.get(1)?,
        key: row.get(2)?,
        value: row.get(3)?,
        hash: row.get(4)?,
        updated_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn translation_from_row(row: &Row<'_>) -> rusqlite::Result<TranslationRecord> {
    Ok(TranslationRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        language: row.get(2)?,
        filename: row.get(3)?,
        key: row.get(4)?,
        value: row.get(5)?,
        user_id: row.get(6)?,
        status: row.get(7)?,
        source_hash: row.get(8)?,
        is_valid: row.get(9)?,
        invalid_reason: row.get(10)?,
        created_at: parse_datetime(&row.get::<_, String>(11)?),
        updated_at: parse_datetime(&row.get::<_, String>(12)?),
    })
}

fn map_constraint(e: rusqlite::Error, message: &str) -> Error {
    match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::Conflict(message.to_string())
        }
        e => Error::from(e),
    }
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // File index operations

    fn upsert_file(&self, file: &TranslationFile) -> Result<()> {
        self.conn().execute(
            "INSERT INTO translation_files (id, project_id, branch, language, filename, commit_ref,
                blob_key, source_hash, total_keys, uploaded_at, last_updated, deleting)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0)
             ON CONFLICT (project_id, branch, language, filename) DO UPDATE SET
                commit_ref = excluded.commit_ref,
                blob_key = excluded.blob_key,
                source_hash = excluded.source_hash,
                total_keys = excluded.total_keys,
                last_updated = excluded.last_updated,
                deleting = 0",
            params![
                file.id,
                file.project_id,
                file.branch,
                file.language,
                file.filename,
                file.commit_ref,
                file.blob_key,
                file.source_hash,
                file.total_keys,
                format_datetime(&file.uploaded_at),
                format_datetime(&file.last_updated),
            ],
        )?;
        Ok(())
    }

    fn get_file(&self, coord: &FileCoordinate) -> Result<Option<TranslationFile>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {FILE_COLUMNS} FROM translation_files
                 WHERE project_id = ?1 AND branch = ?2 AND language = ?3 AND filename = ?4"
            ),
            params![coord.project_id, coord.branch, coord.language, coord.filename],
            file_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_files(
        &self,
        project_id: &str,
        branch: &str,
        language: Option<&str>,
    ) -> Result<Vec<TranslationFile>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM translation_files
             WHERE project_id = ?1 AND branch = ?2 AND (?3 IS NULL OR language = ?3)
             ORDER BY language, filename"
        ))?;

        let rows = stmt.query_map(params![project_id, branch, language], file_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn mark_file_deleting(&self, coord: &FileCoordinate) -> Result<bool> {
        let rows = self.conn().execute(
            "UPDATE translation_files SET deleting = 1
             WHERE project_id = ?1 AND branch = ?2 AND language = ?3 AND filename = ?4",
            params![coord.project_id, coord.branch, coord.language, coord.filename],
        )?;
        Ok(rows > 0)
    }

    fn delete_file_if_deleting(&self, coord: &FileCoordinate) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM translation_files
             WHERE project_id = ?1 AND branch = ?2 AND language = ?3 AND filename = ?4
               AND deleting = 1",
            params![coord.project_id, coord.branch, coord.language, coord.filename],
        )?;
        Ok(rows > 0)
    }

    fn reset_file_deleting(&self, coord: &FileCoordinate) -> Result<bool> {
        let rows = self.conn().execute(
            "UPDATE translation_files SET deleting = 0
             WHERE project_id = ?1 AND branch = ?2 AND language = ?3 AND filename = ?4",
            params![coord.project_id, coord.branch, coord.language, coord.filename],
        )?;
        Ok(rows > 0)
    }

    fn count_files_sharing_blob(&self, blob_key: &str, coord: &FileCoordinate) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM translation_files
             WHERE blob_key = ?1
               AND NOT (project_id = ?2 AND branch = ?3 AND language = ?4 AND filename = ?5)",
            params![blob_key, coord.project_id, coord.branch, coord.language, coord.filename],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    // Source manifest operations

    fn replace_source_keys(
        &self,
        project_id: &str,
        filename: &str,
        keys: &[SourceKey],
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "CREATE TEMP TABLE IF NOT EXISTS incoming_keys (key TEXT PRIMARY KEY)",
            [],
        )?;
        tx.execute("DELETE FROM incoming_keys", [])?;

        {
            let mut mark = tx.prepare("INSERT OR IGNORE INTO incoming_keys (key) VALUES (?1)")?;
            let mut upsert = tx.prepare(
                "INSERT INTO source_keys (project_id, filename, key, value, hash, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (project_id, filename, key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = CASE WHEN source_keys.hash = excluded.hash
                        THEN source_keys.updated_at ELSE excluded.updated_at END,
                    hash = excluded.hash",
            )?;
            for key in keys {
                mark.execute(params![key.key])?;
                upsert.execute(params![
                    project_id,
                    filename,
                    key.key,
                    key.value,
                    key.hash,
                    format_datetime(&key.updated_at),
                ])?;
            }
        }

        tx.execute(
            "DELETE FROM source_keys
             WHERE project_id = ?1 AND filename = ?2
               AND key NOT IN (SELECT key FROM incoming_keys)",
            params![project_id, filename],
        )?;
        tx.execute("DELETE FROM incoming_keys", [])?;
        tx.commit()?;
        Ok(())
    }

    fn get_source_key(
        &self,
        project_id: &str,
        filename: &str,
        key: &str,
    ) -> Result<Option<SourceKey>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT project_id, filename, key, value, hash, updated_at
             FROM source_keys WHERE project_id = ?1 AND filename = ?2 AND key = ?3",
            params![project_id, filename, key],
            source_key_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_source_keys(&self, project_id: &str, filename: &str) -> Result<Vec<SourceKey>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT project_id, filename, key, value, hash, updated_at
             FROM source_keys WHERE project_id = ?1 AND filename = ?2 ORDER BY key",
        )?;

        let rows = stmt.query_map(params![project_id, filename], source_key_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Translation record operations

    fn create_translation(&self, record: &TranslationRecord) -> Result<()> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO translations ({TRANSLATION_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    record.id,
                    record.project_id,
                    record.language,
                    record.filename,
                    record.key,
                    record.value,
                    record.user_id,
                    record.status,
                    record.source_hash,
                    record.is_valid,
                    record.invalid_reason,
                    format_datetime(&record.created_at),
                    format_datetime(&record.updated_at),
                ],
            )
            .map_err(|e| map_constraint(e, "an accepted translation already exists for this key"))?;
        Ok(())
    }

    fn get_translation(&self, id: &str) -> Result<Option<TranslationRecord>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TRANSLATION_COLUMNS} FROM translations WHERE id = ?1"),
            params![id],
            translation_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_translations(
        &self,
        project_id: &str,
        language: Option<&str>,
        filename: &str,
    ) -> Result<Vec<TranslationRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TRANSLATION_COLUMNS} FROM translations
             WHERE project_id = ?1 AND (?2 IS NULL OR language = ?2) AND filename = ?3
             ORDER BY key, created_at"
        ))?;

        let rows = stmt.query_map(params![project_id, language, filename], translation_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_valid_translations(
        &self,
        project_id: &str,
        filename: &str,
    ) -> Result<Vec<TranslationRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TRANSLATION_COLUMNS} FROM translations
             WHERE project_id = ?1 AND filename = ?2 AND is_valid = 1 AND status != 'deleted'
             ORDER BY id"
        ))?;

        let rows = stmt.query_map(params![project_id, filename], translation_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_accepted_translations(
        &self,
        project_id: &str,
        language: &str,
    ) -> Result<Vec<TranslationRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TRANSLATION_COLUMNS} FROM translations
             WHERE project_id = ?1 AND language = ?2 AND status IN ('approved', 'committed')
             ORDER BY filename, key"
        ))?;

        let rows = stmt.query_map(params![project_id, language], translation_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn mark_translations_invalid(&self, invalid: &[(String, String)]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let now = format_datetime(&Utc::now());
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE translations SET is_valid = 0, invalid_reason = ?2, updated_at = ?3
                 WHERE id = ?1 AND is_valid = 1",
            )?;
            for (id, reason) in invalid {
                written += stmt.execute(params![id, reason, now])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    fn set_translation_status(&self, id: &str, status: TranslationStatus) -> Result<()> {
        let rows = self
            .conn()
            .execute(
                "UPDATE translations SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status, format_datetime(&Utc::now()), id],
            )
            .map_err(|e| map_constraint(e, "an accepted translation already exists for this key"))?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn approve_translation(&self, id: &str) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let target = tx
            .query_row(
                "SELECT project_id, language, filename, key, status FROM translations WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, TranslationStatus>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((project_id, language, filename, key, status)) = target else {
            return Err(Error::NotFound);
        };
        if status == TranslationStatus::Deleted {
            return Err(Error::Conflict(
                "cannot approve a deleted translation".to_string(),
            ));
        }
        if status.is_accepted() {
            return Ok(0);
        }

        let now = format_datetime(&Utc::now());
        let demoted = tx.execute(
            "UPDATE translations SET status = 'rejected', updated_at = ?1
             WHERE project_id = ?2 AND language = ?3 AND filename = ?4 AND key = ?5
               AND id != ?6 AND status IN ('approved', 'committed')",
            params![now, project_id, language, filename, key, id],
        )?;
        tx.execute(
            "UPDATE translations SET status = 'approved', updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        tx.commit()?;

        Ok(demoted)
    }
}
