//! Single-Shot Ingest
//!
//! One request, no chunk bookkeeping: the body is hashed while it is written
//! to a fresh temp file, then handed to the shared finalize step.

use std::fmt::Display;
use std::path::{Path, PathBuf};

use axum::body::Bytes;
use futures::Stream;

use super::finalize::{FinalizeOutcome, FinalizeRequest};
use super::hasher::{write_hashed, ContentDigest};
use super::session::UploadService;
use crate::error::Result;

/// A fully received upload waiting to be finalized. The temp file is removed
/// when this is dropped, so an abandoned request leaves nothing behind.
pub struct StagedUpload {
    path: PathBuf,
    digest: ContentDigest,
}

impl StagedUpload {
    pub fn digest(&self) -> &ContentDigest {
        &self.digest
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "Removed staged upload");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Failed to remove staged upload: {}", e);
            }
        }
    }
}

/// Metadata that accompanies a single-shot upload
#[derive(Debug, Clone, Default)]
pub struct IngestMeta {
    pub filename: String,
    pub content_type: Option<String>,
    pub note: Option<String>,
}

impl UploadService {
    /// Write a request body to a new temp file while hashing it
    pub async fn stage<S, E>(&self, body: S) -> Result<StagedUpload>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Display,
    {
        let path = self.layout().ingest_temp_path();
        let mut file = tokio::fs::File::create(&path).await?;

        // from here on the guard owns the temp file
        let mut staged = StagedUpload {
            path,
            digest: ContentDigest {
                size: 0,
                sha256: String::new(),
            },
        };
        staged.digest = write_hashed(&mut file, body).await?;
        file.sync_data().await?;

        tracing::debug!(
            path = %staged.path.display(),
            size = staged.digest.size,
            sha256 = %staged.digest.sha256,
            "Upload staged"
        );

        Ok(staged)
    }

    /// Dedup or publish a staged upload
    pub async fn store(&self, staged: StagedUpload, meta: IngestMeta) -> Result<FinalizeOutcome> {
        let outcome = self
            .finalizer()
            .finalize(FinalizeRequest {
                temp_path: &staged.path,
                original_name: &meta.filename,
                digest: staged.digest.clone(),
                content_type: meta.content_type,
                note: meta.note,
                upload_id: None,
            })
            .await?;

        tracing::info!(
            id = outcome.entry.id,
            public_name = %outcome.entry.public_name,
            reused = outcome.reused,
            "Single-shot upload stored"
        );

        Ok(outcome)
    }

    /// Stage and store in one call
    pub async fn ingest<S, E>(&self, meta: IngestMeta, body: S) -> Result<FinalizeOutcome>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Display,
    {
        let staged = self.stage(body).await?;
        self.store(staged, meta).await
    }
}
