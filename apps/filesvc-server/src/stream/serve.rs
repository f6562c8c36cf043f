//! Range-aware file responses

use std::io::SeekFrom;
use std::path::Path;

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use super::range::{parse_range, RangeDecision};
use crate::error::{AppError, Result};

/// Media type used when none is known
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Response headers that do not depend on the range
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub content_type: String,
    /// `Content-Disposition` value, if any
    pub disposition: Option<String>,
    pub cache_control: Option<&'static str>,
    /// Bytes per body frame
    pub chunk_size: usize,
}

/// Stream `path` honoring `range_header`.
///
/// 200 for the whole file, 206 for a satisfiable range, 416 otherwise.
/// Exactly the requested bytes are read; the file is never buffered whole.
pub async fn serve_file(
    path: &Path,
    range_header: Option<&str>,
    options: &ServeOptions,
) -> Result<Response> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::NotFound("File not found".to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        return Err(AppError::NotFound("File not found".to_string()));
    }
    let size = metadata.len();

    let (status, start, length, content_range) = match parse_range(range_header, size) {
        RangeDecision::Full => (StatusCode::OK, 0, size, None),
        RangeDecision::Partial(range) => (
            StatusCode::PARTIAL_CONTENT,
            range.start,
            range.length(),
            Some(range.content_range(size)),
        ),
        RangeDecision::Unsatisfiable => {
            tracing::debug!(path = %path.display(), range = ?range_header, size = size, "Range not satisfiable");
            return Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{}", size))
                .header(header::ACCEPT_RANGES, "bytes")
                .body(Body::empty())
                .map_err(|e| AppError::Internal(e.to_string()));
        }
    };

    if start > 0 {
        file.seek(SeekFrom::Start(start)).await?;
    }
    let stream = ReaderStream::with_capacity(file.take(length), options.chunk_size.max(1));

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type_value(&options.content_type))
        .header(header::CONTENT_LENGTH, length)
        .header(header::ACCEPT_RANGES, "bytes");

    if let Some(content_range) = content_range {
        builder = builder.header(header::CONTENT_RANGE, content_range);
    }
    if let Some(cache_control) = options.cache_control {
        builder = builder.header(header::CACHE_CONTROL, cache_control);
    }
    if let Some(disposition) = &options.disposition {
        builder = builder.header(header::CONTENT_DISPOSITION, header_value(disposition)?);
    }

    builder
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987
/// `filename*` for the real name
pub fn attachment_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(filename)
    )
}

/// An unusable media type is served as generic binary
fn content_type_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| {
        tracing::warn!(content_type = %value, "Unusable content type, serving as binary");
        HeaderValue::from_static(FALLBACK_CONTENT_TYPE)
    })
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| AppError::Internal(format!("Invalid header value: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use tempfile::TempDir;

    fn options() -> ServeOptions {
        ServeOptions {
            content_type: "video/mp4".to_string(),
            disposition: None,
            cache_control: Some("no-cache"),
            chunk_size: 64,
        }
    }

    async fn fixture() -> (TempDir, std::path::PathBuf, Vec<u8>) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.mp4");
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        tokio::fs::write(&path, &data).await.unwrap();
        (dir, path, data)
    }

    fn header<'a>(response: &'a Response, name: header::HeaderName) -> &'a str {
        response.headers().get(name).unwrap().to_str().unwrap()
    }

    #[tokio::test]
    async fn test_full_response() {
        let (_dir, path, data) = fixture().await;
        let response = serve_file(&path, None, &options()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, header::CONTENT_LENGTH), "1000");
        assert_eq!(header(&response, header::ACCEPT_RANGES), "bytes");
        assert_eq!(header(&response, header::CACHE_CONTROL), "no-cache");
        assert!(response.headers().get(header::CONTENT_RANGE).is_none());

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn test_partial_stops_at_end() {
        let (_dir, path, data) = fixture().await;
        let response = serve_file(&path, Some("bytes=100-299"), &options()).await.unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(header(&response, header::CONTENT_RANGE), "bytes 100-299/1000");
        assert_eq!(header(&response, header::CONTENT_LENGTH), "200");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), &data[100..300]);
    }

    #[tokio::test]
    async fn test_unsatisfiable() {
        let (_dir, path, _data) = fixture().await;
        let response = serve_file(&path, Some("bytes=2000-3000"), &options()).await.unwrap();

        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(header(&response, header::CONTENT_RANGE), "bytes */1000");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = serve_file(&dir.path().join("nope"), None, &options()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_directory_is_not_found() {
        let dir = TempDir::new().unwrap();
        tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();
        let result = serve_file(&dir.path().join("sub"), None, &options()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unusable_content_type_falls_back() {
        let (_dir, path, _data) = fixture().await;
        let mut options = options();
        options.content_type = "text/plain\nX-Evil: 1".to_string();

        let response = serve_file(&path, None, &options).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, header::CONTENT_TYPE), FALLBACK_CONTENT_TYPE);
        assert!(response.headers().get("x-evil").is_none());
    }

    #[test]
    fn test_attachment_disposition() {
        assert_eq!(
            attachment_disposition("report.pdf"),
            "attachment; filename=\"report.pdf\"; filename*=UTF-8''report.pdf"
        );
        assert_eq!(
            attachment_disposition("视频 1.mp4"),
            "attachment; filename=\"__ 1.mp4\"; filename*=UTF-8''%E8%A7%86%E9%A2%91%201.mp4"
        );
    }
}
