//! Upload session database operations

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::{AppError, Result};
use crate::upload::{ChunkStats, SessionStatus, UploadChunk, UploadSession};

/// Session fields fixed at initiation
#[derive(Debug, Clone)]
pub struct NewUploadSession {
    pub id: String,
    pub filename: String,
    pub expected_size: Option<i64>,
    pub expected_sha256: Option<String>,
    pub temp_path: String,
}

/// Mark a live session committed. Fails with a conflict when the session
/// already left `initiated`/`receiving`.
pub async fn mark_committed(
    conn: &mut SqliteConnection,
    upload_id: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE uploads
        SET status = 'committed', updated_at = ?
        WHERE id = ? AND status IN ('initiated', 'receiving')
        "#,
    )
    .bind(at)
    .bind(upload_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::Conflict(format!(
            "Upload {} is no longer open",
            upload_id
        )));
    }

    Ok(())
}

/// Upload session repository
pub struct UploadRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UploadRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a fresh session in `initiated`
    pub async fn create(&self, new: &NewUploadSession) -> Result<UploadSession> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO uploads (id, filename, expected_size, expected_sha256, temp_path,
                                 status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'initiated', ?, ?)
            "#,
        )
        .bind(&new.id)
        .bind(&new.filename)
        .bind(new.expected_size)
        .bind(&new.expected_sha256)
        .bind(&new.temp_path)
        .bind(now)
        .bind(now)
        .execute(self.pool)
        .await
        .map_err(|e| AppError::conflict_on_unique(e, format!("Upload {} already exists", new.id)))?;

        Ok(UploadSession {
            id: new.id.clone(),
            filename: new.filename.clone(),
            expected_size: new.expected_size,
            expected_sha256: new.expected_sha256.clone(),
            temp_path: new.temp_path.clone(),
            status: SessionStatus::Initiated,
            created_at: now,
            updated_at: now,
        })
    }

    /// Get a session by id
    pub async fn get(&self, upload_id: &str) -> Result<Option<UploadSession>> {
        let session = sqlx::query_as::<_, UploadSession>(
            r#"
            SELECT id, filename, expected_size, expected_sha256, temp_path,
                   status, created_at, updated_at
            FROM uploads
            WHERE id = ?
            "#,
        )
        .bind(upload_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(session)
    }

    /// Number of chunks recorded for a session and their summed length
    pub async fn chunk_stats(&self, upload_id: &str) -> Result<ChunkStats> {
        let (count, total_bytes): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(size), 0)
            FROM upload_chunks
            WHERE upload_id = ?
            "#,
        )
        .bind(upload_id)
        .fetch_one(self.pool)
        .await?;

        Ok(ChunkStats { count, total_bytes })
    }

    /// Chunks of a session in index order
    pub async fn list_chunks(&self, upload_id: &str) -> Result<Vec<UploadChunk>> {
        let chunks = sqlx::query_as::<_, UploadChunk>(
            r#"
            SELECT upload_id, idx, size, sha256, created_at
            FROM upload_chunks
            WHERE upload_id = ?
            ORDER BY idx ASC
            "#,
        )
        .bind(upload_id)
        .fetch_all(self.pool)
        .await?;

        Ok(chunks)
    }

    /// Record an accepted chunk and move the session to `receiving` in one
    /// transaction. A second writer for the same index loses with a conflict.
    pub async fn record_chunk(
        &self,
        upload_id: &str,
        index: i64,
        size: i64,
        sha256: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO upload_chunks (upload_id, idx, size, sha256, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(upload_id)
        .bind(index)
        .bind(size)
        .bind(sha256)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::conflict_on_unique(e, format!("Chunk {} was already accepted", index))
        })?;

        let result = sqlx::query(
            r#"
            UPDATE uploads
            SET status = 'receiving', updated_at = ?
            WHERE id = ? AND status IN ('initiated', 'receiving')
            "#,
        )
        .bind(now)
        .bind(upload_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // dropping tx rolls the chunk row back
            return Err(AppError::NotFound(format!(
                "Upload {} not found or closed",
                upload_id
            )));
        }

        tx.commit().await?;
        Ok(())
    }

    /// Drop every chunk record and mark the session aborted, atomically
    pub async fn abort(&self, upload_id: &str) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM upload_chunks WHERE upload_id = ?")
            .bind(upload_id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            r#"
            UPDATE uploads
            SET status = 'aborted', updated_at = ?
            WHERE id = ? AND status IN ('initiated', 'receiving')
            "#,
        )
        .bind(now)
        .bind(upload_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Upload {} is no longer open",
                upload_id
            )));
        }

        tx.commit().await?;
        Ok(())
    }

    /// Delete a session row; its chunks go with it
    pub async fn delete(&self, upload_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM uploads WHERE id = ?")
            .bind(upload_id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Open sessions untouched since `cutoff`
    pub async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<UploadSession>> {
        let sessions = sqlx::query_as::<_, UploadSession>(
            r#"
            SELECT id, filename, expected_size, expected_sha256, temp_path,
                   status, created_at, updated_at
            FROM uploads
            WHERE status IN ('initiated', 'receiving') AND updated_at < ?
            ORDER BY updated_at ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(self.pool)
        .await?;

        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_pool;
    use tempfile::TempDir;

    async fn test_pool(dir: &TempDir) -> SqlitePool {
        let url = format!("sqlite://{}", dir.path().join("uploads.db").display());
        create_pool(&url).await.unwrap()
    }

    fn new_session(id: &str) -> NewUploadSession {
        NewUploadSession {
            id: id.to_string(),
            filename: "movie.mp4".to_string(),
            expected_size: Some(10),
            expected_sha256: None,
            temp_path: format!("/tmp/{}.part", id),
        }
    }

    #[tokio::test]
    async fn test_record_chunk_moves_to_receiving() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir).await;
        let repo = UploadRepository::new(&pool);

        let session = repo.create(&new_session("s1")).await.unwrap();
        assert_eq!(session.status, SessionStatus::Initiated);

        repo.record_chunk("s1", 0, 4, "aa").await.unwrap();
        repo.record_chunk("s1", 1, 6, "bb").await.unwrap();

        let session = repo.get("s1").await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Receiving);
        assert_eq!(
            repo.chunk_stats("s1").await.unwrap(),
            ChunkStats { count: 2, total_bytes: 10 }
        );

        let chunks = repo.list_chunks("s1").await.unwrap();
        assert_eq!(chunks.iter().map(|c| c.index).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_duplicate_index_is_conflict() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir).await;
        let repo = UploadRepository::new(&pool);
        repo.create(&new_session("s1")).await.unwrap();

        repo.record_chunk("s1", 0, 4, "aa").await.unwrap();
        let again = repo.record_chunk("s1", 0, 4, "aa").await;
        assert!(matches!(again, Err(AppError::Conflict(_))));
        assert_eq!(repo.chunk_stats("s1").await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_chunk_on_closed_session_rolls_back() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir).await;
        let repo = UploadRepository::new(&pool);
        repo.create(&new_session("s1")).await.unwrap();
        repo.abort("s1").await.unwrap();

        let result = repo.record_chunk("s1", 0, 4, "aa").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(repo.chunk_stats("s1").await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_abort_clears_chunks() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir).await;
        let repo = UploadRepository::new(&pool);
        repo.create(&new_session("s1")).await.unwrap();
        repo.record_chunk("s1", 0, 4, "aa").await.unwrap();

        repo.abort("s1").await.unwrap();
        let session = repo.get("s1").await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Aborted);
        assert_eq!(repo.chunk_stats("s1").await.unwrap(), ChunkStats::default());

        // second abort finds nothing open
        assert!(matches!(repo.abort("s1").await, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_mark_committed_only_once() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir).await;
        let repo = UploadRepository::new(&pool);
        repo.create(&new_session("s1")).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        mark_committed(&mut conn, "s1", Utc::now()).await.unwrap();
        let again = mark_committed(&mut conn, "s1", Utc::now()).await;
        assert!(matches!(again, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_delete_cascades_chunks() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir).await;
        let repo = UploadRepository::new(&pool);
        repo.create(&new_session("s1")).await.unwrap();
        repo.record_chunk("s1", 0, 4, "aa").await.unwrap();

        assert!(repo.delete("s1").await.unwrap());
        assert!(repo.get("s1").await.unwrap().is_none());
        assert_eq!(repo.chunk_stats("s1").await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_list_stale_skips_closed_and_fresh() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir).await;
        let repo = UploadRepository::new(&pool);
        repo.create(&new_session("open")).await.unwrap();
        repo.create(&new_session("closed")).await.unwrap();
        repo.abort("closed").await.unwrap();

        let future = Utc::now() + chrono::Duration::hours(1);
        let stale = repo.list_stale(future).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, "open");

        let past = Utc::now() - chrono::Duration::hours(1);
        assert!(repo.list_stale(past).await.unwrap().is_empty());
    }
}
