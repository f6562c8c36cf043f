//! Route modules for the file service

pub mod files;
pub mod health;
pub mod stream;
pub mod upload;

use axum::{extract::DefaultBodyLimit, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full application router
pub fn router(state: AppState) -> Router {
    let max_body = state.config().upload.max_body_bytes;

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let uploads = upload::router()
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body));

    Router::new()
        .merge(health::router())
        .merge(uploads)
        .merge(stream::router())
        .merge(files::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
