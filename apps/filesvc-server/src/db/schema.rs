//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_SQL)
        .execute(pool)
        .await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- File catalog
CREATE TABLE IF NOT EXISTS uploaded_file (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    original_name TEXT NOT NULL,
    public_name TEXT NOT NULL UNIQUE,
    content_type TEXT,
    size INTEGER NOT NULL,
    sha256 TEXT NOT NULL,
    storage_path TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    note TEXT
);

CREATE INDEX IF NOT EXISTS idx_uploaded_file_original_name ON uploaded_file(original_name);
CREATE INDEX IF NOT EXISTS idx_uploaded_file_sha256 ON uploaded_file(sha256);

-- At most one active entry per content hash
CREATE UNIQUE INDEX IF NOT EXISTS uq_uploaded_file_active_sha256
    ON uploaded_file(sha256) WHERE status = 'active';

-- Resumable upload sessions
CREATE TABLE IF NOT EXISTS uploads (
    id TEXT PRIMARY KEY,
    filename TEXT NOT NULL,
    expected_size INTEGER,
    expected_sha256 TEXT,
    temp_path TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'initiated',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_uploads_status ON uploads(status, updated_at);

-- Chunks accepted for a session, 0-based and contiguous
CREATE TABLE IF NOT EXISTS upload_chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    upload_id TEXT NOT NULL REFERENCES uploads(id) ON DELETE CASCADE,
    idx INTEGER NOT NULL,
    size INTEGER NOT NULL,
    sha256 TEXT NOT NULL,
    created_at TEXT NOT NULL,

    UNIQUE(upload_id, idx)
);

CREATE INDEX IF NOT EXISTS idx_upload_chunks_upload_id ON upload_chunks(upload_id);
"#;
