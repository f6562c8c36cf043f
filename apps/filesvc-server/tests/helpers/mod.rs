#![allow(dead_code)]

use std::path::PathBuf;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request};
use axum::response::Response;
use axum::Router;
use axum_test::TestServer;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use filesvc_server::config::Config;
use filesvc_server::db::create_pool;
use filesvc_server::routes;
use filesvc_server::state::AppState;

pub const BOUNDARY: &str = "filesvc-test-boundary";

/// Test application backed by a scratch directory
pub struct TestApp {
    pub router: Router,
    pub server: TestServer,
    pub state: AppState,
    pub _temp_dir: TempDir,
}

impl TestApp {
    /// Get the HTTP test client
    pub fn client(&self) -> &TestServer {
        &self.server
    }

    /// Drive one request through the router
    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub fn media_root(&self) -> PathBuf {
        self.state.config().media.media_root.clone()
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.state.config().storage.tmp_dir.clone()
    }
}

/// Setup a test application with an isolated database and storage
pub async fn setup_test_app() -> TestApp {
    setup_with(|_| {}).await
}

/// Same as [`setup_test_app`] with a chance to adjust the configuration
pub async fn setup_with(adjust: impl FnOnce(&mut Config)) -> TestApp {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = Config::for_root(temp_dir.path());
    adjust(&mut config);

    std::fs::create_dir_all(&config.media.media_root).unwrap();
    let pool = create_pool(&config.database.url)
        .await
        .expect("Failed to create test database");

    let state = AppState::new(config, pool);
    state.layout().ensure_dirs().await.unwrap();

    let router = routes::router(state.clone());
    let server = TestServer::new(router.clone()).expect("Failed to create test server");

    TestApp {
        router,
        server,
        state,
        _temp_dir: temp_dir,
    }
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

pub async fn json_body(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// One part of a multipart/form-data body
pub enum Part<'a> {
    Text(&'a str, &'a str),
    File {
        name: &'a str,
        filename: &'a str,
        content_type: &'a str,
        data: &'a [u8],
    },
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File {
                name,
                filename,
                content_type,
                data,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                        name, filename, content_type
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn multipart_request(method: &str, uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

/// Single-shot upload of `data` as `filename`; returns the envelope
pub async fn upload(app: &TestApp, filename: &str, data: &[u8]) -> Value {
    let request = multipart_request(
        "POST",
        "/upload",
        &[Part::File {
            name: "file",
            filename,
            content_type: "application/octet-stream",
            data,
        }],
    );
    json_body(app.send(request).await).await
}

pub fn sha256_hex(data: &[u8]) -> String {
    filesvc_server::upload::hasher::compute_hash(data)
}
