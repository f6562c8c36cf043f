//! Media streaming routes
//!
//! - GET /video/raw?path= - Range streaming of a file under the media root
//! - GET /video/fmp4?path= - Live remux to fragmented MP4

use std::path::{Component, Path, PathBuf};

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::config::MediaConfig;
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::stream::{serve_file, ServeOptions, FMP4_CONTENT_TYPE};

#[derive(Debug, Deserialize)]
pub struct MediaQuery {
    pub path: Option<String>,
}

/// Create the media router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/video/raw", get(stream_raw))
        .route("/video/fmp4", get(stream_fmp4))
}

/// Resolve a `?path=` argument under the media root.
///
/// Absolute paths and `..` components are refused. Without an argument the
/// configured default source is used.
pub fn resolve_media_path(media: &MediaConfig, requested: Option<&str>) -> Result<PathBuf> {
    let requested = match requested.map(str::trim).filter(|p| !p.is_empty()) {
        Some(requested) => requested,
        None => {
            return media
                .default_media
                .clone()
                .ok_or_else(|| AppError::BadRequest("path query parameter is required".to_string()));
        }
    };

    let relative = Path::new(requested);
    let safe = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !safe {
        return Err(AppError::BadRequest(format!("Invalid media path {}", requested)));
    }

    Ok(media.media_root.join(relative))
}

/// GET /video/raw
async fn stream_raw(
    State(state): State<AppState>,
    Query(query): Query<MediaQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let media = &state.config().media;
    let path = resolve_media_path(media, query.path.as_deref())?;

    let options = ServeOptions {
        content_type: mime_guess::from_path(&path)
            .first_or_octet_stream()
            .to_string(),
        disposition: None,
        cache_control: Some("no-cache"),
        chunk_size: media.stream_chunk_bytes,
    };
    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());

    serve_file(&path, range, &options).await
}

/// GET /video/fmp4
async fn stream_fmp4(
    State(state): State<AppState>,
    Query(query): Query<MediaQuery>,
) -> Result<Response> {
    let path = resolve_media_path(&state.config().media, query.path.as_deref())?;
    let stream = state.remux().spawn(&path).await?;
    tracing::debug!(source = %path.display(), pid = ?stream.id(), "Streaming remux output");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, FMP4_CONTENT_TYPE)
        .header(header::ACCEPT_RANGES, "none")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(e.to_string()))
}
