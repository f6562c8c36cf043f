//! On-disk layout
//!
//! `tmp_dir/<upload_id>.part` holds in-progress sessions,
//! `tmp_dir/ingest-<uuid>.part` holds single-shot uploads, and
//! `storage_dir/<public_name>` holds finalized files.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::config::StorageConfig;

/// Suffix marking a file as partial
const PARTIAL_SUFFIX: &str = ".part";

#[derive(Debug, Clone)]
pub struct StorageLayout {
    storage_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            storage_dir: config.storage_dir.clone(),
            tmp_dir: config.tmp_dir.clone(),
        }
    }

    /// Create both directories if absent
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.storage_dir).await?;
        tokio::fs::create_dir_all(&self.tmp_dir).await?;
        Ok(())
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    pub fn session_temp_path(&self, upload_id: &str) -> PathBuf {
        self.tmp_dir.join(format!("{}{}", upload_id, PARTIAL_SUFFIX))
    }

    /// Fresh, unique temp path for a single-shot upload
    pub fn ingest_temp_path(&self) -> PathBuf {
        self.tmp_dir
            .join(format!("ingest-{}{}", Uuid::new_v4().simple(), PARTIAL_SUFFIX))
    }

    /// Final location of a file published under `public_name`
    pub fn final_path(&self, public_name: &str) -> PathBuf {
        self.storage_dir.join(public_name)
    }
}
