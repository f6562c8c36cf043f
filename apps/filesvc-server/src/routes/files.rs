//! Catalog routes
//!
//! JSON listing and soft delete answer with an [`Envelope`]; downloads and
//! public links stream bytes and use plain HTTP status codes.

use std::path::Path as FsPath;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    response::Response,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::{FileEntry, FileRepository, FileStatus};
use crate::error::{AppError, Envelope, Result};
use crate::state::AppState;
use crate::stream::{attachment_disposition, serve_file, ServeOptions, FALLBACK_CONTENT_TYPE};

/// Catalog entry as shown to clients
#[derive(Debug, Clone, Serialize)]
pub struct FileOut {
    pub id: i64,
    pub original_name: String,
    pub public_name: String,
    pub content_type: Option<String>,
    pub size: i64,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
    pub status: FileStatus,
    pub note: Option<String>,
    pub download_url: String,
    pub public_url: String,
}

impl FileOut {
    pub fn from_entry(entry: FileEntry, base_url: &str) -> Self {
        Self {
            download_url: format!("{}/download/{}", base_url, entry.id),
            public_url: format!(
                "{}/{}",
                base_url,
                urlencoding::encode(&entry.public_name)
            ),
            id: entry.id,
            original_name: entry.original_name,
            public_name: entry.public_name,
            content_type: entry.content_type,
            size: entry.size,
            sha256: entry.sha256,
            created_at: entry.created_at,
            status: entry.status,
            note: entry.note,
        }
    }
}

/// `scheme://host` of the current request, or empty for relative links
pub fn base_url(headers: &HeaderMap) -> String {
    let Some(host) = headers.get(header::HOST).and_then(|h| h.to_str().ok()) else {
        return String::new();
    };
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|h| h.to_str().ok())
        .filter(|s| *s == "http" || *s == "https")
        .unwrap_or("http");
    format!("{}://{}", scheme, host)
}

/// Create the catalog router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/files", get(list_files))
        .route("/files/:id", get(get_file).delete(delete_file))
        .route("/download/:id", get(download_file))
        .route("/p/:public_name", get(public_file))
        .route("/:public_name", get(public_file))
}

// ============================================================================
// JSON Handlers
// ============================================================================

/// GET /files
async fn list_files(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<Envelope<Vec<FileOut>>> {
    let base = base_url(&headers);
    let result = FileRepository::new(state.db())
        .list_active()
        .await
        .map(|entries| {
            entries
                .into_iter()
                .map(|e| FileOut::from_entry(e, &base))
                .collect()
        });

    Envelope::from_result(result, "Query succeeded", "Query failed")
}

/// GET /files/:id
async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Json<Envelope<FileOut>> {
    let result = async {
        let entry = FileRepository::new(state.db())
            .get_active(id)
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;
        Ok::<_, AppError>(FileOut::from_entry(entry, &base_url(&headers)))
    }
    .await;

    Envelope::from_result(result, "Query succeeded", "Query failed")
}

#[derive(Debug, Serialize)]
struct DeletedFile {
    id: i64,
}

/// DELETE /files/:id
///
/// Marks the entry deleted. The stored bytes stay on disk.
async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Json<Envelope<DeletedFile>> {
    let result = async {
        if !FileRepository::new(state.db()).soft_delete(id).await? {
            return Err(AppError::NotFound("File not found".to_string()));
        }
        tracing::info!(id = id, "File marked deleted");
        Ok::<_, AppError>(DeletedFile { id })
    }
    .await;

    Envelope::from_result(result, "File deleted", "Delete failed")
}

// ============================================================================
// Byte Handlers
// ============================================================================

/// GET /download/:id
async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Response> {
    let entry = FileRepository::new(state.db())
        .get_active(id)
        .await?
        .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

    send_entry(&state, &entry, &headers).await
}

/// GET /p/:public_name and GET /:public_name
async fn public_file(
    State(state): State<AppState>,
    Path(public_name): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let entry = FileRepository::new(state.db())
        .find_active_by_public_name(&public_name)
        .await?
        .ok_or_else(|| AppError::NotFound("Public file not found".to_string()))?;

    send_entry(&state, &entry, &headers).await
}

async fn send_entry(state: &AppState, entry: &FileEntry, headers: &HeaderMap) -> Result<Response> {
    let path = FsPath::new(&entry.storage_path);
    if !tokio::fs::try_exists(path).await? {
        tracing::warn!(id = entry.id, path = %entry.storage_path, "Catalog entry has no bytes on disk");
        return Err(AppError::Gone("File missing on disk".to_string()));
    }

    let options = ServeOptions {
        content_type: entry
            .content_type
            .clone()
            .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string()),
        disposition: Some(attachment_disposition(&entry.original_name)),
        cache_control: None,
        chunk_size: state.config().media.stream_chunk_bytes,
    };
    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());

    serve_file(path, range, &options).await
}
