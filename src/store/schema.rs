pub const SCHEMA: &str = r#"
-- One row per imported file; points at the content object in the blob store
CREATE TABLE IF NOT EXISTS translation_files (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    branch TEXT NOT NULL,
    language TEXT NOT NULL,
    filename TEXT NOT NULL,
    commit_ref TEXT,
    blob_key TEXT NOT NULL,
    source_hash TEXT NOT NULL,
    total_keys INTEGER NOT NULL DEFAULT 0,
    uploaded_at TEXT NOT NULL,
    last_updated TEXT NOT NULL,

    -- Set while the orphan reconciler is removing this file
    deleting INTEGER NOT NULL DEFAULT 0,

    UNIQUE(project_id, branch, language, filename)
);

-- Current source text per key, the manifest translations are validated against
CREATE TABLE IF NOT EXISTS source_keys (
    project_id TEXT NOT NULL,
    filename TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    hash TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (project_id, filename, key)
);

-- User submissions; never hard-deleted
CREATE TABLE IF NOT EXISTS translations (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    language TEXT NOT NULL,
    filename TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    user_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    source_hash TEXT,              -- NULL = recorded before source tracking existed
    is_valid INTEGER NOT NULL DEFAULT 1,
    invalid_reason TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_files_project_branch ON translation_files(project_id, branch);
CREATE INDEX IF NOT EXISTS idx_files_blob_key ON translation_files(blob_key);
CREATE INDEX IF NOT EXISTS idx_translations_file ON translations(project_id, filename);
CREATE INDEX IF NOT EXISTS idx_translations_coordinate
    ON translations(project_id, language, filename, key);

-- At most one approved or committed record per coordinate
CREATE UNIQUE INDEX IF NOT EXISTS idx_translations_accepted
    ON translations(project_id, language, filename, key)
    WHERE status IN ('approved', 'committed');
"#;
