//! End-to-end tests for artifact retention.

#![cfg(unix)]

mod common;

use common::{multipart_body, TestServer};
use reqwest::StatusCode;
use std::time::Duration;

async fn upload(server: &TestServer, data: &[u8]) -> serde_json::Value {
    let (content_type, body) = multipart_body("file", "clip.mp3", data);
    let response = reqwest::Client::new()
        .post(format!("{}/upload", server.base_url))
        .header("content-type", content_type)
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    response.json().await.unwrap()
}

#[tokio::test]
async fn swept_artifacts_stop_being_downloadable() {
    let server = TestServer::spawn().await;
    let json = upload(&server, b"soon-stale").await;
    let url = json["url"].as_str().unwrap().to_string();

    let download = reqwest::get(format!("{}{}", server.base_url, url))
        .await
        .unwrap();
    assert_eq!(download.status(), StatusCode::OK);

    // A zero retention window makes the artifact immediately stale.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let deleted = amrelay::sweeper::sweep_once(&server.downloads_dir, Duration::ZERO).await;
    assert_eq!(deleted, 1);

    let after = reqwest::get(format!("{}{}", server.base_url, url))
        .await
        .unwrap();
    assert_eq!(after.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn artifacts_inside_the_retention_window_survive_sweeps() {
    let server = TestServer::spawn().await;
    let json = upload(&server, b"fresh").await;
    let url = json["url"].as_str().unwrap().to_string();

    let deleted =
        amrelay::sweeper::sweep_once(&server.downloads_dir, Duration::from_secs(3600)).await;
    assert_eq!(deleted, 0);

    let download = reqwest::get(format!("{}{}", server.base_url, url))
        .await
        .unwrap();
    assert_eq!(download.status(), StatusCode::OK);
}
