//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::storage::StorageLayout;
use crate::stream::RemuxPipe;
use crate::upload::{Finalizer, UploadService};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    db: SqlitePool,
    layout: StorageLayout,
    uploads: UploadService,
    remux: RemuxPipe,
}

impl AppState {
    /// Wire the services together from one configuration
    pub fn new(config: Config, db: SqlitePool) -> Self {
        let layout = StorageLayout::new(&config.storage);
        let finalizer = Finalizer::new(db.clone(), layout.clone(), config.storage.on_collision);
        let uploads = UploadService::new(
            db.clone(),
            layout.clone(),
            finalizer,
            config.media.stream_chunk_bytes,
        );
        let remux = RemuxPipe::new(
            config.media.ffmpeg_path.clone(),
            config.media.stream_chunk_bytes,
        );

        Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                layout,
                uploads,
                remux,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the database pool
    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.inner.layout
    }

    /// Get the upload service
    pub fn uploads(&self) -> &UploadService {
        &self.inner.uploads
    }

    pub fn remux(&self) -> &RemuxPipe {
        &self.inner.remux
    }
}
