//! File catalog database operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::{AppError, Result};

/// Catalog entry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Active,
    Deleted,
}

impl TryFrom<String> for FileStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        match value.as_str() {
            "active" => Ok(FileStatus::Active),
            "deleted" => Ok(FileStatus::Deleted),
            _ => Err(UnknownStatus(value)),
        }
    }
}

/// A status column held a value outside the known set
#[derive(Debug, thiserror::Error)]
#[error("unknown status value: {0}")]
pub struct UnknownStatus(pub String);

/// Finalized, deduplicated file record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FileEntry {
    pub id: i64,
    pub original_name: String,
    pub public_name: String,
    pub content_type: Option<String>,
    pub size: i64,
    pub sha256: String,
    pub storage_path: String,
    pub created_at: DateTime<Utc>,
    #[sqlx(try_from = "String")]
    pub status: FileStatus,
    pub note: Option<String>,
}

/// Values for a catalog row about to be created
#[derive(Debug, Clone)]
pub struct NewFileEntry {
    pub original_name: String,
    pub public_name: String,
    pub content_type: Option<String>,
    pub size: i64,
    pub sha256: String,
    pub storage_path: String,
    pub note: Option<String>,
}

// ============================================================================
// Connection-level operations (usable inside a transaction)
// ============================================================================

/// Fetch the active entry holding a content hash
pub async fn find_active_by_hash(
    conn: &mut SqliteConnection,
    sha256: &str,
) -> Result<Option<FileEntry>> {
    let entry = sqlx::query_as::<_, FileEntry>(
        r#"
        SELECT id, original_name, public_name, content_type, size, sha256,
               storage_path, created_at, status, note
        FROM uploaded_file
        WHERE sha256 = ? AND status = 'active'
        LIMIT 1
        "#,
    )
    .bind(sha256)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(entry)
}

/// Fetch the entry holding a public name, whatever its status
pub async fn find_by_public_name(
    conn: &mut SqliteConnection,
    public_name: &str,
) -> Result<Option<FileEntry>> {
    let entry = sqlx::query_as::<_, FileEntry>(
        r#"
        SELECT id, original_name, public_name, content_type, size, sha256,
               storage_path, created_at, status, note
        FROM uploaded_file
        WHERE public_name = ?
        "#,
    )
    .bind(public_name)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(entry)
}

/// Insert a catalog row and return it
pub async fn insert_entry(conn: &mut SqliteConnection, new: &NewFileEntry) -> Result<FileEntry> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO uploaded_file (original_name, public_name, content_type, size, sha256,
                                   storage_path, created_at, status, note)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'active', ?)
        "#,
    )
    .bind(&new.original_name)
    .bind(&new.public_name)
    .bind(&new.content_type)
    .bind(new.size)
    .bind(&new.sha256)
    .bind(&new.storage_path)
    .bind(now)
    .bind(&new.note)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        AppError::conflict_on_unique(
            e,
            format!("Catalog already holds {} or its content", new.public_name),
        )
    })?;

    let entry = sqlx::query_as::<_, FileEntry>(
        r#"
        SELECT id, original_name, public_name, content_type, size, sha256,
               storage_path, created_at, status, note
        FROM uploaded_file
        WHERE id = ?
        "#,
    )
    .bind(result.last_insert_rowid())
    .fetch_one(&mut *conn)
    .await?;

    Ok(entry)
}

// ============================================================================
// Repository
// ============================================================================

/// File catalog repository
pub struct FileRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> FileRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Get an active entry by id
    pub async fn get_active(&self, id: i64) -> Result<Option<FileEntry>> {
        let entry = sqlx::query_as::<_, FileEntry>(
            r#"
            SELECT id, original_name, public_name, content_type, size, sha256,
                   storage_path, created_at, status, note
            FROM uploaded_file
            WHERE id = ? AND status = 'active'
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(entry)
    }

    /// List active entries, newest first
    pub async fn list_active(&self) -> Result<Vec<FileEntry>> {
        let entries = sqlx::query_as::<_, FileEntry>(
            r#"
            SELECT id, original_name, public_name, content_type, size, sha256,
                   storage_path, created_at, status, note
            FROM uploaded_file
            WHERE status = 'active'
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(entries)
    }

    /// Get the active entry holding a content hash
    pub async fn find_active_by_hash(&self, sha256: &str) -> Result<Option<FileEntry>> {
        let mut conn = self.pool.acquire().await?;
        find_active_by_hash(&mut conn, sha256).await
    }

    /// Get the active entry published under a name
    pub async fn find_active_by_public_name(&self, public_name: &str) -> Result<Option<FileEntry>> {
        let mut conn = self.pool.acquire().await?;
        let entry = find_by_public_name(&mut conn, public_name).await?;
        Ok(entry.filter(|e| e.status == FileStatus::Active))
    }

    /// Mark an entry deleted; the stored bytes stay where they are
    pub async fn soft_delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE uploaded_file
            SET status = 'deleted'
            WHERE id = ? AND status = 'active'
            "#,
        )
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
