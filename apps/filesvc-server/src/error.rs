//! Error types for the file service
//!
//! `AppError::status_code` is the only place an error kind is turned into an
//! HTTP status. Byte-serving routes render errors with the protocol status
//! (`IntoResponse`); JSON routes wrap them in an [`Envelope`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Session, catalog entry or source file does not exist
    #[error("{0}")]
    NotFound(String),

    /// A file the catalog or a session expects is missing from disk
    #[error("{0}")]
    Gone(String),

    /// Out-of-sequence chunk, illegal transition, or name collision
    #[error("{0}")]
    Conflict(String),

    /// A chunk's bytes do not match the digest supplied with it
    #[error("{0}")]
    Integrity(String),

    /// Assembled upload disagrees with the expected size or digest
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    BadRequest(String),

    /// A required external tool is not installed
    #[error("{0}")]
    DependencyMissing(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Gone(_) => StatusCode::GONE,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Integrity(_) => StatusCode::BAD_REQUEST,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::DependencyMissing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) | AppError::Database(_) | AppError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Gone(_) => "gone",
            AppError::Conflict(_) => "conflict",
            AppError::Integrity(_) => "integrity_error",
            AppError::Validation(_) => "validation_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::DependencyMissing(_) => "dependency_missing",
            AppError::Internal(_) => "internal_error",
            AppError::Database(_) => "database_error",
            AppError::Io(_) => "io_error",
        }
    }

    /// Message safe to show to a client; internal details go to the log
    fn public_message(&self) -> String {
        match self {
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "An internal error occurred".to_string()
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "Database error".to_string()
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                "IO error".to_string()
            }
            AppError::DependencyMissing(msg) => {
                tracing::error!("Missing dependency: {}", msg);
                msg.clone()
            }
            other => other.to_string(),
        }
    }

    /// Translate a unique-constraint violation into a conflict
    pub fn conflict_on_unique(err: sqlx::Error, message: impl Into<String>) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::Conflict(message.into())
            }
            _ => AppError::Database(err),
        }
    }
}

/// Error body used by byte-serving routes
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorResponse {
            error: self.kind().to_string(),
            message: self.public_message(),
        });

        (status, body).into_response()
    }
}

/// Structured reply used by every JSON route.
///
/// The transport status is always 200; `code` carries the outcome.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub code: u16,
    pub msg: String,
    pub data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(msg: impl Into<String>, data: T) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            msg: msg.into(),
            data: Some(data),
        }
    }

    pub fn error(err: &AppError) -> Self {
        Self {
            code: err.status_code().as_u16(),
            msg: err.public_message(),
            data: None,
        }
    }

    /// Render a handler outcome, prefixing failures with `context`
    pub fn from_result(result: Result<T>, ok_msg: &str, context: &str) -> Json<Self> {
        match result {
            Ok(data) => Json(Self::ok(ok_msg, data)),
            Err(err) => {
                tracing::debug!(kind = err.kind(), error = %err, "{}", context);
                let mut envelope = Self::error(&err);
                envelope.msg = format!("{}: {}", context, envelope.msg);
                Json(envelope)
            }
        }
    }
}
