//! Resumable Upload State Machine
//!
//! `initiated -> receiving -> committed`, with `aborted` reachable from
//! either open state. Every operation on a session runs under that
//! session's lock; ordering and size/hash checks happen before anything
//! irreversible.

use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};

use axum::body::Bytes;
use axum::http::HeaderValue;
use chrono::Utc;
use futures::Stream;
use mime_guess::Mime;
use sqlx::SqlitePool;
use tokio::fs::OpenOptions;
use uuid::Uuid;

use super::finalize::{FinalizeOutcome, FinalizeRequest, Finalizer};
use super::hasher::{digests_match, hash_file, is_sha256_hex, write_hashed};
use super::locks::SessionLocks;
use super::types::{
    AbortOutcome, ChunkAccepted, CommitRequest, InitiateRequest, SessionStatus, UploadSession,
    UploadStatusResponse,
};
use crate::db::{NewUploadSession, UploadRepository};
use crate::error::{AppError, Result};
use crate::storage::{atomic, StorageLayout};

// ============================================================================
// Upload Service
// ============================================================================

/// Drives resumable upload sessions and single-shot ingest
#[derive(Clone)]
pub struct UploadService {
    pool: SqlitePool,
    layout: StorageLayout,
    finalizer: Finalizer,
    locks: SessionLocks,
    read_size: usize,
}

impl UploadService {
    pub fn new(pool: SqlitePool, layout: StorageLayout, finalizer: Finalizer, read_size: usize) -> Self {
        Self {
            pool,
            layout,
            finalizer,
            locks: SessionLocks::new(),
            read_size,
        }
    }

    pub(super) fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub(super) fn finalizer(&self) -> &Finalizer {
        &self.finalizer
    }

    fn repo(&self) -> UploadRepository<'_> {
        UploadRepository::new(&self.pool)
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Open a session with an empty temp file
    pub async fn initiate(&self, request: InitiateRequest) -> Result<UploadSession> {
        let filename = request.filename.trim();
        if filename.is_empty() {
            return Err(AppError::BadRequest("filename is required".to_string()));
        }
        if let Some(size) = request.expected_size {
            if size < 0 {
                return Err(AppError::BadRequest(format!("Invalid size {}", size)));
            }
        }
        let expected_sha256 = match request.expected_sha256 {
            Some(hash) if !is_sha256_hex(hash.trim()) => {
                return Err(AppError::BadRequest(format!("Invalid sha256 {}", hash)));
            }
            Some(hash) => Some(hash.trim().to_lowercase()),
            None => None,
        };

        let upload_id = Uuid::new_v4().simple().to_string();
        let temp_path = self.layout.session_temp_path(&upload_id);

        match OpenOptions::new().write(true).create_new(true).open(&temp_path).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(AppError::Conflict(format!(
                    "Temp file for upload {} already exists",
                    upload_id
                )));
            }
            Err(e) => return Err(e.into()),
        }

        let created = self
            .repo()
            .create(&NewUploadSession {
                id: upload_id.clone(),
                filename: filename.to_string(),
                expected_size: request.expected_size,
                expected_sha256,
                temp_path: temp_path.to_string_lossy().into_owned(),
            })
            .await;

        let session = match created {
            Ok(session) => session,
            Err(e) => {
                let _ = atomic::remove_if_exists(&temp_path).await;
                return Err(e);
            }
        };

        tracing::info!(
            upload_id = %session.id,
            filename = %session.filename,
            expected_size = ?session.expected_size,
            "Upload session initiated"
        );

        Ok(session)
    }

    /// Append chunk `index` to a session.
    ///
    /// Only the next index is accepted. On any failure the temp file is cut
    /// back to the length it had before this call.
    pub async fn put_chunk<S, E>(
        &self,
        upload_id: &str,
        index: i64,
        body: S,
        chunk_sha256: Option<&str>,
    ) -> Result<ChunkAccepted>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Display,
    {
        let _guard = self.locks.lock(upload_id).await;

        let session = self.open_session(upload_id).await?;
        let stats = self.repo().chunk_stats(upload_id).await?;

        if index != stats.count {
            tracing::warn!(
                upload_id = %upload_id,
                index = index,
                expected = stats.count,
                "Out-of-order chunk rejected"
            );
            return Err(AppError::Conflict(format!(
                "Unexpected chunk index {}, expected {}",
                index, stats.count
            )));
        }

        let temp_path = PathBuf::from(&session.temp_path);
        let prior_len = reconcile_temp(&temp_path, stats.total_bytes as u64).await?;

        let mut file = OpenOptions::new().append(true).open(&temp_path).await?;
        let rollback = RollbackGuard::new(&temp_path, prior_len);

        let digest = write_hashed(&mut file, body).await?;

        if let Some(expected) = chunk_sha256 {
            if !digests_match(expected, &digest.sha256) {
                file.set_len(prior_len).await?;
                tracing::warn!(
                    upload_id = %upload_id,
                    index = index,
                    expected = %expected,
                    actual = %digest.sha256,
                    "Chunk hash mismatch, chunk discarded"
                );
                return Err(AppError::Integrity("Chunk checksum mismatch".to_string()));
            }
        }

        self.repo()
            .record_chunk(upload_id, index, digest.size as i64, &digest.sha256)
            .await?;
        rollback.disarm();

        let received_bytes = prior_len + digest.size;
        tracing::debug!(
            upload_id = %upload_id,
            index = index,
            size = digest.size,
            received_bytes = received_bytes,
            "Chunk accepted"
        );

        Ok(ChunkAccepted {
            upload_id: upload_id.to_string(),
            status: SessionStatus::Receiving,
            received_bytes: received_bytes as i64,
            next_index: index + 1,
        })
    }

    /// Verify the assembled file and publish it
    pub async fn commit(&self, upload_id: &str, request: CommitRequest) -> Result<FinalizeOutcome> {
        let _guard = self.locks.lock(upload_id).await;

        let session = self.open_session(upload_id).await?;
        let content_type = request
            .content_type
            .as_deref()
            .map(checked_content_type)
            .transpose()?;
        let stats = self.repo().chunk_stats(upload_id).await?;
        let temp_path = PathBuf::from(&session.temp_path);
        let actual_size = reconcile_temp(&temp_path, stats.total_bytes as u64).await?;

        if let Some(expected) = request.expected_size.or(session.expected_size) {
            if expected < 0 || expected as u64 != actual_size {
                return Err(AppError::Validation(format!(
                    "Size mismatch: got {}, expected {}",
                    actual_size, expected
                )));
            }
        }

        let digest = hash_file(&temp_path, self.read_size).await?;

        if let Some(expected) = request.expected_sha256.as_deref().or(session.expected_sha256.as_deref()) {
            if !digests_match(expected, &digest.sha256) {
                tracing::warn!(
                    upload_id = %upload_id,
                    expected = %expected,
                    actual = %digest.sha256,
                    "Commit hash mismatch"
                );
                return Err(AppError::Validation("SHA256 mismatch".to_string()));
            }
        }

        let outcome = self
            .finalizer
            .finalize(FinalizeRequest {
                temp_path: &temp_path,
                original_name: &session.filename,
                digest,
                content_type,
                note: request.note,
                upload_id: Some(upload_id),
            })
            .await?;

        tracing::info!(
            upload_id = %upload_id,
            id = outcome.entry.id,
            reused = outcome.reused,
            "Upload committed"
        );

        Ok(outcome)
    }

    /// Drop a session's temp file and chunk records
    pub async fn abort(&self, upload_id: &str) -> Result<AbortOutcome> {
        let _guard = self.locks.lock(upload_id).await;

        let Some(session) = self.repo().get(upload_id).await? else {
            return Ok(AbortOutcome::NotFound);
        };

        if session.status == SessionStatus::Aborted {
            return Ok(AbortOutcome::AlreadyAborted);
        }
        if !session.status.can_transition_to(SessionStatus::Aborted) {
            return Err(AppError::Conflict(format!(
                "Upload {} is already {}",
                upload_id, session.status
            )));
        }

        atomic::remove_if_exists(Path::new(&session.temp_path)).await?;
        self.repo().abort(upload_id).await?;

        tracing::info!(upload_id = %upload_id, "Upload aborted");
        Ok(AbortOutcome::Aborted)
    }

    /// Current state of a session
    pub async fn status(&self, upload_id: &str) -> Result<UploadStatusResponse> {
        let session = self
            .repo()
            .get(upload_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Upload {} not found", upload_id)))?;
        let stats = self.repo().chunk_stats(upload_id).await?;

        let received_bytes = match tokio::fs::metadata(&session.temp_path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        Ok(UploadStatusResponse {
            upload_id: session.id,
            filename: session.filename,
            status: session.status,
            received_bytes,
            chunk_count: stats.count,
            next_index: stats.count,
            expected_size: session.expected_size,
            expected_sha256: session.expected_sha256,
            created_at: session.created_at,
            updated_at: session.updated_at,
        })
    }

    /// Abort every open session idle for longer than `ttl`
    pub async fn sweep_stale(&self, ttl: chrono::Duration) -> Result<usize> {
        let cutoff = Utc::now() - ttl;
        let stale = self.repo().list_stale(cutoff).await?;
        let mut aborted = 0;

        for session in stale {
            match self.abort(&session.id).await {
                Ok(AbortOutcome::Aborted) => {
                    aborted += 1;
                    tracing::info!(
                        upload_id = %session.id,
                        updated_at = %session.updated_at,
                        "Stale upload swept"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(upload_id = %session.id, "Failed to sweep upload: {}", e);
                }
            }
        }

        Ok(aborted)
    }

    async fn open_session(&self, upload_id: &str) -> Result<UploadSession> {
        match self.repo().get(upload_id).await? {
            Some(session) if !session.status.is_terminal() => Ok(session),
            _ => Err(AppError::NotFound(format!(
                "Upload {} not found or already finalized",
                upload_id
            ))),
        }
    }
}

/// A client-declared media type, normalized. It must parse as a MIME type
/// and be usable as a header value.
fn checked_content_type(value: &str) -> Result<String> {
    let mime = value
        .trim()
        .parse::<Mime>()
        .map_err(|_| AppError::BadRequest(format!("Invalid content type {:?}", value)))?;
    let normalized = mime.to_string();
    if HeaderValue::from_str(&normalized).is_err() {
        return Err(AppError::BadRequest(format!("Invalid content type {:?}", value)));
    }
    Ok(normalized)
}

// ============================================================================
// Temp File Helpers
// ============================================================================

/// Make the temp file agree with the recorded chunk total.
///
/// Bytes past the total are left over from an interrupted write and are cut
/// off. A missing or short file means accepted data was lost.
async fn reconcile_temp(path: &Path, recorded: u64) -> Result<u64> {
    let len = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(AppError::Gone("Temporary file missing".to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    if len < recorded {
        return Err(AppError::Gone(format!(
            "Temp file holds {} bytes but {} were accepted",
            len, recorded
        )));
    }

    if len > recorded {
        tracing::warn!(
            path = %path.display(),
            len = len,
            recorded = recorded,
            "Truncating unrecorded bytes from temp file"
        );
        let file = OpenOptions::new().write(true).open(path).await?;
        file.set_len(recorded).await?;
    }

    Ok(recorded)
}

/// Truncates the temp file back to `len` on drop unless disarmed. Covers
/// early returns and a client that goes away mid-chunk.
struct RollbackGuard {
    path: PathBuf,
    len: u64,
    armed: bool,
}

impl RollbackGuard {
    fn new(path: &Path, len: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            len,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let result = std::fs::OpenOptions::new()
            .write(true)
            .open(&self.path)
            .and_then(|f| f.set_len(self.len));
        if let Err(e) = result {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), "Chunk rollback failed: {}", e);
            }
        }
    }
}
