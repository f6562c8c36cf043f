//! Upload Routes
//!
//! Endpoints:
//! - POST /upload - Single-shot multipart upload (`file`, optional `note`)
//! - POST /uploads/initiate - Open a resumable session
//! - PUT /uploads/:upload_id/chunk - Multipart chunk (`index`, `chunk`, optional `sha256`)
//! - PUT /uploads/:upload_id/chunks/:index - Raw chunk body, optional `X-Chunk-Sha256`
//! - POST /uploads/:upload_id/commit - Verify and publish
//! - POST /uploads/:upload_id/abort - Cancel
//! - GET /uploads/:upload_id - Session status
//!
//! Every reply is an [`Envelope`] with HTTP 200.

use std::convert::Infallible;

use axum::{
    body::{Body, Bytes},
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{BytesRejection, JsonRejection, PathRejection},
        Multipart, Path, State,
    },
    http::{header, HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use mime_guess::{mime, Mime};
use serde::Serialize;

use super::files::{base_url, FileOut};
use crate::error::{AppError, Envelope};
use crate::state::AppState;
use crate::upload::{
    AbortOutcome, ChunkAccepted, CommitRequest, IngestMeta, InitiateRequest, InitiateResponse,
    UploadStatusResponse,
};

/// Header carrying the SHA-256 of a raw chunk body
pub const CHUNK_SHA256_HEADER: &str = "x-chunk-sha256";

// ============================================================================
// Router
// ============================================================================

/// Create the upload router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload_file))
        .route("/uploads/initiate", post(initiate_upload))
        .route("/uploads/:upload_id", get(upload_status))
        .route("/uploads/:upload_id/chunk", put(put_chunk_multipart))
        .route("/uploads/:upload_id/chunks/:index", put(put_chunk_raw))
        .route("/uploads/:upload_id/commit", post(commit_upload))
        .route("/uploads/:upload_id/abort", post(abort_upload))
}

fn multipart_error(e: MultipartError) -> AppError {
    AppError::BadRequest(format!("Malformed multipart body: {}", e))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /upload
async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Json<Envelope<FileOut>> {
    let result = async {
        let mut multipart = multipart.map_err(|e| AppError::BadRequest(e.body_text()))?;
        let mut staged = None;
        let mut meta = IngestMeta::default();

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().map(str::to_string);
            match name.as_deref() {
                Some("file") => {
                    meta.filename = field.file_name().unwrap_or("file").to_string();
                    meta.content_type = field.content_type().map(str::to_string);
                    staged = Some(state.uploads().stage(field).await?);
                }
                Some("note") => {
                    let note = field.text().await.map_err(multipart_error)?;
                    meta.note = Some(note).filter(|n| !n.is_empty());
                }
                _ => {}
            }
        }

        let staged =
            staged.ok_or_else(|| AppError::BadRequest("file field is required".to_string()))?;
        let outcome = state.uploads().store(staged, meta).await?;
        Ok::<_, AppError>(FileOut::from_entry(outcome.entry, &base_url(&headers)))
    }
    .await;

    Envelope::from_result(result, "Upload succeeded", "Upload failed")
}

/// POST /uploads/initiate
async fn initiate_upload(
    State(state): State<AppState>,
    body: Result<Json<InitiateRequest>, JsonRejection>,
) -> Json<Envelope<InitiateResponse>> {
    let result = async {
        let Json(request) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
        let session = state.uploads().initiate(request).await?;
        Ok::<_, AppError>(InitiateResponse {
            upload_id: session.id,
        })
    }
    .await;

    Envelope::from_result(result, "Upload session created", "Failed to create upload session")
}

/// PUT /uploads/:upload_id/chunk
///
/// The chunk part is buffered because `index` and `sha256` may follow it.
async fn put_chunk_multipart(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Json<Envelope<ChunkAccepted>> {
    let result = async {
        let mut multipart = multipart.map_err(|e| AppError::BadRequest(e.body_text()))?;
        let mut index = None;
        let mut chunk = None;
        let mut sha256 = None;

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().map(str::to_string);
            match name.as_deref() {
                Some("index") => {
                    let text = field.text().await.map_err(multipart_error)?;
                    let parsed = text
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| AppError::BadRequest(format!("Invalid chunk index {}", text)))?;
                    index = Some(parsed);
                }
                Some("chunk") => chunk = Some(field.bytes().await.map_err(multipart_error)?),
                Some("sha256") => {
                    let text = field.text().await.map_err(multipart_error)?;
                    sha256 = Some(text).filter(|s| !s.trim().is_empty());
                }
                _ => {}
            }
        }

        let index = index.ok_or_else(|| AppError::BadRequest("index field is required".to_string()))?;
        let chunk = chunk.ok_or_else(|| AppError::BadRequest("chunk field is required".to_string()))?;
        let body = futures::stream::once(async move { Ok::<Bytes, Infallible>(chunk) });

        state
            .uploads()
            .put_chunk(&upload_id, index, body, sha256.as_deref())
            .await
    }
    .await;

    Envelope::from_result(result, "Chunk uploaded", "Chunk upload failed")
}

/// PUT /uploads/:upload_id/chunks/:index
///
/// Streams the request body straight into the session's temp file.
async fn put_chunk_raw(
    State(state): State<AppState>,
    path: Result<Path<(String, i64)>, PathRejection>,
    headers: HeaderMap,
    body: Body,
) -> Json<Envelope<ChunkAccepted>> {
    let result = async {
        let Path((upload_id, index)) = path.map_err(|e| AppError::BadRequest(e.body_text()))?;
        let sha256 = headers
            .get(CHUNK_SHA256_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        state
            .uploads()
            .put_chunk(&upload_id, index, body.into_data_stream(), sha256.as_deref())
            .await
    }
    .await;

    Envelope::from_result(result, "Chunk uploaded", "Chunk upload failed")
}

/// POST /uploads/:upload_id/commit
///
/// An empty body commits with the expectations captured at initiation.
async fn commit_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Json<Envelope<FileOut>> {
    let result = async {
        let body = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
        let request = commit_request(&headers, &body)?;
        let outcome = state.uploads().commit(&upload_id, request).await?;
        Ok::<_, AppError>(FileOut::from_entry(outcome.entry, &base_url(&headers)))
    }
    .await;

    Envelope::from_result(result, "Upload committed", "Commit failed")
}

/// Decode a commit body. Anything other than nothing or well-formed JSON is
/// refused so declared expectations are never dropped.
fn commit_request(headers: &HeaderMap, body: &Bytes) -> Result<CommitRequest, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(CommitRequest::default());
    }

    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<Mime>().ok())
        .is_some_and(|ct| {
            ct.type_() == mime::APPLICATION
                && (ct.subtype() == mime::JSON || ct.suffix() == Some(mime::JSON))
        });
    if !is_json {
        return Err(AppError::BadRequest(
            "Expected request with `Content-Type: application/json`".to_string(),
        ));
    }

    Json::<CommitRequest>::from_bytes(body)
        .map(|Json(request)| request)
        .map_err(|e| AppError::BadRequest(e.body_text()))
}

#[derive(Debug, Serialize)]
struct AbortedUpload {
    upload_id: String,
}

/// POST /uploads/:upload_id/abort
async fn abort_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Json<Envelope<AbortedUpload>> {
    match state.uploads().abort(&upload_id).await {
        Ok(AbortOutcome::NotFound) => Json(Envelope {
            code: StatusCode::NOT_FOUND.as_u16(),
            msg: "Upload session not found".to_string(),
            data: None,
        }),
        Ok(AbortOutcome::AlreadyAborted) => {
            Json(Envelope::ok("Upload already aborted", AbortedUpload { upload_id }))
        }
        Ok(AbortOutcome::Aborted) => Json(Envelope::ok("Upload aborted", AbortedUpload { upload_id })),
        Err(e) => Envelope::from_result(Err(e), "", "Abort failed"),
    }
}

/// GET /uploads/:upload_id
async fn upload_status(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Json<Envelope<UploadStatusResponse>> {
    let result = state.uploads().status(&upload_id).await;
    Envelope::from_result(result, "Query succeeded", "Query failed")
}
