mod helpers;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::Value;

use helpers::{body_bytes, json_body, setup_test_app, setup_with, upload, TestApp};

use filesvc_server::config::CollisionPolicy;

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn fetch(app: &TestApp, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app.send(get(uri)).await;
    let status = response.status();
    (status, body_bytes(response).await)
}

#[tokio::test]
async fn test_name_collisions_get_numbered() {
    let app = setup_test_app().await;

    let first = upload(&app, "My Report.pdf", b"version one").await;
    let second = upload(&app, "My Report.pdf", b"version two").await;
    let third = upload(&app, "My Report.pdf", b"version three").await;

    assert_eq!(first["data"]["public_name"], "My_Report.pdf");
    assert_eq!(second["data"]["public_name"], "My_Report-1.pdf");
    assert_eq!(third["data"]["public_name"], "My_Report-2.pdf");
    assert_eq!(second["data"]["original_name"], "My Report.pdf");

    let repeat = upload(&app, "My Report.pdf", b"version two").await;
    assert_eq!(repeat["data"]["id"], second["data"]["id"]);
    assert_eq!(repeat["data"]["public_name"], "My_Report-1.pdf");

    let (status, body) = fetch(&app, "/My_Report-1.pdf").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"version two");

    let (status, body) = fetch(&app, "/p/My_Report-2.pdf").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"version three");

    let (status, _) = fetch(&app, "/nobody-uploaded-this.pdf").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_links_follow_request_host() {
    let app = setup_test_app().await;
    upload(&app, "photo.jpg", b"jpeg bytes").await;

    let response = app
        .send(
            Request::builder()
                .uri("/files")
                .header(header::HOST, "files.example.test")
                .header("x-forwarded-proto", "https")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    let listed = json_body(response).await;
    let entry = &listed["data"][0];
    let id = entry["id"].as_i64().unwrap();
    assert_eq!(
        entry["download_url"],
        format!("https://files.example.test/download/{}", id)
    );
    assert_eq!(entry["public_url"], "https://files.example.test/photo.jpg");
}

#[tokio::test]
async fn test_get_single_file() {
    let app = setup_test_app().await;
    let stored = upload(&app, "notes.txt", b"remember").await;
    let id = stored["data"]["id"].as_i64().unwrap();

    let found = app.client().get(&format!("/files/{}", id)).await.json::<Value>();
    assert_eq!(found["code"], 200);
    assert_eq!(found["data"]["public_name"], "notes.txt");
    assert_eq!(found["data"]["status"], "active");

    let missing = app.client().get("/files/9999").await.json::<Value>();
    assert_eq!(missing["code"], 404);
    assert_eq!(missing["msg"], "Query failed: File not found");
}

#[tokio::test]
async fn test_soft_delete_hides_entry() {
    let app = setup_test_app().await;
    let stored = upload(&app, "old.txt", b"stale").await;
    let id = stored["data"]["id"].as_i64().unwrap();

    let deleted = app
        .send(
            Request::builder()
                .method("DELETE")
                .uri(format!("/files/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    let deleted = json_body(deleted).await;
    assert_eq!(deleted["code"], 200);

    let found = app.client().get(&format!("/files/{}", id)).await.json::<Value>();
    assert_eq!(found["code"], 404);

    let listed = app.client().get("/files").await.json::<Value>();
    assert!(listed["data"].as_array().unwrap().is_empty());

    let (status, _) = fetch(&app, &format!("/download/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = fetch(&app, "/old.txt").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Deleted names stay reserved
    let again = upload(&app, "old.txt", b"fresh").await;
    assert_eq!(again["data"]["public_name"], "old-1.txt");
}

#[tokio::test]
async fn test_missing_bytes_are_gone() {
    let app = setup_test_app().await;
    let stored = upload(&app, "vanish.bin", b"now you see me").await;
    let id = stored["data"]["id"].as_i64().unwrap();

    let on_disk = app.state.config().storage.storage_dir.join("vanish.bin");
    std::fs::remove_file(on_disk).unwrap();

    let (status, _) = fetch(&app, &format!("/download/{}", id)).await;
    assert_eq!(status, StatusCode::GONE);
    let (status, _) = fetch(&app, "/vanish.bin").await;
    assert_eq!(status, StatusCode::GONE);
}

#[tokio::test]
async fn test_download_supports_ranges() {
    let app = setup_test_app().await;
    let stored = upload(&app, "digits.txt", b"0123456789").await;
    let id = stored["data"]["id"].as_i64().unwrap();

    let response = app
        .send(
            Request::builder()
                .uri(format!("/download/{}", id))
                .header(header::RANGE, "bytes=2-5")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 2-5/10");
    assert_eq!(body_bytes(response).await, b"2345");
}

#[tokio::test]
async fn test_reject_policy_refuses_foreign_file() {
    let app = setup_with(|config| config.storage.on_collision = CollisionPolicy::Reject).await;

    let storage = app.state.config().storage.storage_dir.clone();
    std::fs::write(storage.join("taken.txt"), b"placed by hand").unwrap();

    let reply = upload(&app, "taken.txt", b"uploaded").await;
    assert_eq!(reply["code"], 409);
    assert_eq!(std::fs::read(storage.join("taken.txt")).unwrap(), b"placed by hand");
}

#[tokio::test]
async fn test_overwrite_policy_replaces_foreign_file() {
    let app = setup_test_app().await;

    let storage = app.state.config().storage.storage_dir.clone();
    std::fs::write(storage.join("taken.txt"), b"placed by hand").unwrap();

    let reply = upload(&app, "taken.txt", b"uploaded").await;
    assert_eq!(reply["code"], 200);
    assert_eq!(reply["data"]["public_name"], "taken.txt");
    assert_eq!(std::fs::read(storage.join("taken.txt")).unwrap(), b"uploaded");
}
