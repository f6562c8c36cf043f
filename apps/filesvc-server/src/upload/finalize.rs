//! Finalize
//!
//! The dedup check, atomic move and catalog insert shared by single-shot
//! ingest and session commit. Runs are serialized process-wide so two
//! uploads of the same content or name cannot interleave between the
//! lookup and the insert.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::Mutex;

use crate::config::CollisionPolicy;
use crate::db::{find_active_by_hash, insert_entry, mark_committed, FileEntry, NewFileEntry};
use crate::error::{AppError, Result};
use crate::storage::{atomic, StorageLayout};
use crate::upload::hasher::ContentDigest;
use crate::upload::naming::{resolve_public_name, sanitize_filename, PublicName};

/// Input to a finalize run
#[derive(Debug)]
pub struct FinalizeRequest<'a> {
    /// Fully written temp file
    pub temp_path: &'a Path,
    /// Name the client uploaded under
    pub original_name: &'a str,
    pub digest: ContentDigest,
    pub content_type: Option<String>,
    pub note: Option<String>,
    /// Session to mark committed in the same transaction as the insert
    pub upload_id: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct FinalizeOutcome {
    pub entry: FileEntry,
    /// True when an existing entry was returned instead of a new one
    pub reused: bool,
}

#[derive(Clone)]
pub struct Finalizer {
    pool: SqlitePool,
    layout: StorageLayout,
    policy: CollisionPolicy,
    lock: Arc<Mutex<()>>,
}

impl Finalizer {
    pub fn new(pool: SqlitePool, layout: StorageLayout, policy: CollisionPolicy) -> Self {
        Self {
            pool,
            layout,
            policy,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Publish a finished temp file, or hand back the entry that already
    /// holds its content
    pub async fn finalize(&self, request: FinalizeRequest<'_>) -> Result<FinalizeOutcome> {
        let _guard = self.lock.lock().await;
        let mut conn = self.pool.acquire().await?;

        if let Some(existing) = find_active_by_hash(&mut conn, &request.digest.sha256).await? {
            return self.reuse(&mut conn, existing, &request).await;
        }

        let base = sanitize_filename(request.original_name);
        let public_name =
            match resolve_public_name(&mut conn, &base, &request.digest.sha256).await? {
                PublicName::Reuse(existing) => return self.reuse(&mut conn, existing, &request).await,
                PublicName::Fresh(name) => name,
            };
        drop(conn);

        let final_path = self.layout.final_path(&public_name);
        if self.policy == CollisionPolicy::Reject && tokio::fs::try_exists(&final_path).await? {
            return Err(AppError::Conflict(format!(
                "A file named {} already exists",
                public_name
            )));
        }

        atomic::commit(request.temp_path, &final_path).await?;

        let content_type = request.content_type.clone().or_else(|| {
            mime_guess::from_path(request.original_name)
                .first()
                .map(|m| m.to_string())
        });
        let new_entry = NewFileEntry {
            original_name: request.original_name.to_string(),
            public_name: public_name.clone(),
            content_type,
            size: request.digest.size as i64,
            sha256: request.digest.sha256.to_lowercase(),
            storage_path: final_path.to_string_lossy().into_owned(),
            note: request.note.clone(),
        };

        let entry = match self.record(&new_entry, request.upload_id).await {
            Ok(entry) => entry,
            Err(e) => {
                // the catalog did not take it, so the bytes go back to the caller
                match atomic::restore(&final_path, request.temp_path).await {
                    Ok(()) => tracing::warn!(
                        path = %final_path.display(),
                        "Catalog insert failed, upload moved back to its temp file"
                    ),
                    Err(move_back) => tracing::error!(
                        path = %final_path.display(),
                        temp = %request.temp_path.display(),
                        "Catalog insert failed, best-effort restore of the upload also failed: {}",
                        move_back
                    ),
                }
                return Err(e);
            }
        };

        tracing::info!(
            id = entry.id,
            public_name = %entry.public_name,
            sha256 = %entry.sha256,
            size = entry.size,
            "File finalized"
        );

        Ok(FinalizeOutcome {
            entry,
            reused: false,
        })
    }

    async fn record(&self, new_entry: &NewFileEntry, upload_id: Option<&str>) -> Result<FileEntry> {
        let mut tx = self.pool.begin().await?;
        let entry = insert_entry(&mut tx, new_entry).await?;
        if let Some(upload_id) = upload_id {
            mark_committed(&mut tx, upload_id, Utc::now()).await?;
        }
        tx.commit().await?;
        Ok(entry)
    }

    async fn reuse(
        &self,
        conn: &mut sqlx::SqliteConnection,
        existing: FileEntry,
        request: &FinalizeRequest<'_>,
    ) -> Result<FinalizeOutcome> {
        if let Some(upload_id) = request.upload_id {
            mark_committed(conn, upload_id, Utc::now()).await?;
        }
        atomic::remove_if_exists(request.temp_path).await?;

        tracing::info!(
            id = existing.id,
            public_name = %existing.public_name,
            sha256 = %existing.sha256,
            "Duplicate content, reusing existing entry"
        );

        Ok(FinalizeOutcome {
            entry: existing,
            reused: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::db::{create_pool, FileRepository};
    use crate::upload::hasher::compute_hash;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        pool: SqlitePool,
        layout: StorageLayout,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(&StorageConfig {
            storage_dir: dir.path().join("storage"),
            tmp_dir: dir.path().join("tmp"),
            on_collision: CollisionPolicy::Overwrite,
        });
        layout.ensure_dirs().await.unwrap();
        let url = format!("sqlite://{}", dir.path().join("f.db").display());
        let pool = create_pool(&url).await.unwrap();
        Fixture { _dir: dir, pool, layout }
    }

    async fn staged(layout: &StorageLayout, bytes: &[u8]) -> (std::path::PathBuf, ContentDigest) {
        let path = layout.ingest_temp_path();
        tokio::fs::write(&path, bytes).await.unwrap();
        let digest = ContentDigest {
            size: bytes.len() as u64,
            sha256: compute_hash(bytes),
        };
        (path, digest)
    }

    fn request<'a>(path: &'a Path, name: &'a str, digest: ContentDigest) -> FinalizeRequest<'a> {
        FinalizeRequest {
            temp_path: path,
            original_name: name,
            digest,
            content_type: None,
            note: None,
            upload_id: None,
        }
    }

    #[tokio::test]
    async fn test_identical_content_is_stored_once() {
        let f = fixture().await;
        let finalizer = Finalizer::new(f.pool.clone(), f.layout.clone(), CollisionPolicy::Overwrite);

        let (p1, d1) = staged(&f.layout, b"same bytes").await;
        let first = finalizer.finalize(request(&p1, "a.txt", d1)).await.unwrap();
        assert!(!first.reused);
        assert_eq!(first.entry.content_type.as_deref(), Some("text/plain"));

        let (p2, d2) = staged(&f.layout, b"same bytes").await;
        let second = finalizer.finalize(request(&p2, "other.txt", d2)).await.unwrap();
        assert!(second.reused);
        assert_eq!(second.entry.id, first.entry.id);
        assert!(!p2.exists());

        assert_eq!(FileRepository::new(&f.pool).list_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_same_name_different_content_gets_suffix() {
        let f = fixture().await;
        let finalizer = Finalizer::new(f.pool.clone(), f.layout.clone(), CollisionPolicy::Overwrite);

        let (p1, d1) = staged(&f.layout, b"one").await;
        let first = finalizer.finalize(request(&p1, "clip.mp4", d1)).await.unwrap();
        let (p2, d2) = staged(&f.layout, b"two").await;
        let second = finalizer.finalize(request(&p2, "clip.mp4", d2)).await.unwrap();

        assert_eq!(first.entry.public_name, "clip.mp4");
        assert_eq!(second.entry.public_name, "clip-1.mp4");
        assert_eq!(
            tokio::fs::read(f.layout.final_path("clip-1.mp4")).await.unwrap(),
            b"two"
        );

        // identical to the suffixed entry: same entry back, no third name
        let (p3, d3) = staged(&f.layout, b"two").await;
        let third = finalizer.finalize(request(&p3, "clip.mp4", d3)).await.unwrap();
        assert!(third.reused);
        assert_eq!(third.entry.public_name, "clip-1.mp4");
    }

    #[tokio::test]
    async fn test_reject_policy_refuses_existing_path() {
        let f = fixture().await;
        tokio::fs::write(f.layout.final_path("orphan.bin"), b"left behind")
            .await
            .unwrap();
        let finalizer = Finalizer::new(f.pool.clone(), f.layout.clone(), CollisionPolicy::Reject);

        let (p, d) = staged(&f.layout, b"fresh").await;
        let result = finalizer.finalize(request(&p, "orphan.bin", d)).await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert!(p.exists());
        assert_eq!(
            tokio::fs::read(f.layout.final_path("orphan.bin")).await.unwrap(),
            b"left behind"
        );
    }

    #[tokio::test]
    async fn test_overwrite_policy_replaces_orphan() {
        let f = fixture().await;
        tokio::fs::write(f.layout.final_path("orphan.bin"), b"left behind")
            .await
            .unwrap();
        let finalizer = Finalizer::new(f.pool.clone(), f.layout.clone(), CollisionPolicy::Overwrite);

        let (p, d) = staged(&f.layout, b"fresh").await;
        let outcome = finalizer.finalize(request(&p, "orphan.bin", d)).await.unwrap();

        assert_eq!(outcome.entry.public_name, "orphan.bin");
        assert_eq!(
            tokio::fs::read(f.layout.final_path("orphan.bin")).await.unwrap(),
            b"fresh"
        );
    }

    #[tokio::test]
    async fn test_catalog_failure_returns_bytes_to_temp() {
        let f = fixture().await;
        let finalizer = Finalizer::new(f.pool.clone(), f.layout.clone(), CollisionPolicy::Overwrite);

        let (p, d) = staged(&f.layout, b"orphaned").await;
        let mut req = request(&p, "lost.bin", d);
        req.upload_id = Some("no-such-session");

        let result = finalizer.finalize(req).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(tokio::fs::read(&p).await.unwrap(), b"orphaned");
        assert!(!f.layout.final_path("lost.bin").exists());
        assert!(FileRepository::new(&f.pool).list_active().await.unwrap().is_empty());
    }
}
