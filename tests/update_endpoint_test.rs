//! Device polls against the HTTP router, driven in-process

mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::*;
use firmhub_lib::engine::api::{create_router, ApiState};
use firmhub_lib::engine::release::SyncStatusBoard;
use tower::ServiceExt;

fn router(fixture: &Fixture) -> Router {
    create_router(ApiState {
        store: fixture.store.clone(),
        artifacts: Arc::new(fixture.artifacts()),
        sync_status: Arc::new(SyncStatusBoard::new()),
    })
}

async fn body_bytes(body: Body) -> Vec<u8> {
    to_bytes(body, usize::MAX).await.expect("read body").to_vec()
}

#[tokio::test]
async fn test_newer_release_is_served_with_digest() {
    let fixture = Fixture::new();
    fixture.write_release("1.2.0");

    let response = router(&fixture)
        .oneshot(esp8266_request("1.1.0", "sketch"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    let firmware = firmware_for("1.2.0");
    assert_eq!(headers["x-MD5"], md5_hex(&firmware).as_str());
    assert_eq!(headers["content-type"], "application/octet-stream");
    assert_eq!(headers["content-length"], firmware.len().to_string().as_str());
    assert_eq!(
        headers["content-disposition"],
        "attachment; filename=\"Widget_firmware_1.2.0.bin\""
    );
    assert_eq!(
        headers["cache-control"],
        "no-store, no-cache, must-revalidate, post-check=0, pre-check=0, max-age=0"
    );
    assert_eq!(headers["pragma"], "no-cache");
    assert_eq!(headers["expires"], "-1");
    assert!(headers.contains_key("last-modified"));
    assert_eq!(body_bytes(response.into_body()).await, firmware);
}

#[tokio::test]
async fn test_digest_header_comes_from_manifest_entry() {
    let fixture = Fixture::new();
    let dir = fixture.write_release("1.2.0");
    let firmware = firmware_for("1.2.0");
    let filesystem = filesystem_for("1.2.0");
    // Uppercase checksums with the binary marker, as written by some tools
    let listing = format!(
        "{} *{}\n{} *{}\n",
        md5_hex(&firmware).to_uppercase(),
        FIRMWARE,
        md5_hex(&filesystem).to_uppercase(),
        FILESYSTEM
    );
    fs::write(dir.join("MD5SUMS"), listing).unwrap();

    let response = router(&fixture)
        .oneshot(esp8266_request("1.1.0", "sketch"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-MD5"], md5_hex(&firmware).as_str());
    assert_eq!(body_bytes(response.into_body()).await, firmware);
}

#[tokio::test]
async fn test_spiffs_mode_serves_filesystem_image() {
    let fixture = Fixture::new();
    fixture.write_release("1.2.0");

    let response = router(&fixture)
        .oneshot(esp8266_request("1.1.0", "spiffs"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response.into_body()).await, filesystem_for("1.2.0"));
}

#[tokio::test]
async fn test_current_or_newer_device_gets_not_modified() {
    let fixture = Fixture::new();
    fixture.write_release("1.2.0");

    for version in ["1.2.0", "v1.2", "1.3.0"] {
        let response = router(&fixture)
            .oneshot(esp8266_request(version, "sketch"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED, "device at {}", version);
        assert!(body_bytes(response.into_body()).await.is_empty());
    }
}

#[tokio::test]
async fn test_empty_store_gets_not_modified() {
    let fixture = Fixture::new();
    let response = router(&fixture)
        .oneshot(esp8266_request("0.0.1", "sketch"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn test_missing_chip_id_is_forbidden() {
    let fixture = Fixture::new();
    fixture.write_release("1.2.0");

    let response = router(&fixture)
        .oneshot(esp8266_request_without("1.1.0", "sketch", Some("x-ESP8266-Chip-ID")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_client_is_forbidden() {
    let fixture = Fixture::new();
    fixture.write_release("1.2.0");

    let response = router(&fixture)
        .oneshot(esp8266_request_without("1.1.0", "sketch", Some("User-Agent")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = router(&fixture)
        .oneshot(Request::builder().uri("/update").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_corrupted_image_falls_back_to_older_release() {
    let fixture = Fixture::new();
    fixture.write_release("1.1.0");
    let latest = fixture.write_release("1.2.0");
    fs::write(latest.join(FIRMWARE), b"flipped bits").unwrap();

    // 1.2.0 no longer verifies, so 1.1.0 is the latest verified release
    let response = router(&fixture)
        .oneshot(esp8266_request("1.0.0", "sketch"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response.into_body()).await, firmware_for("1.1.0"));

    let response = router(&fixture)
        .oneshot(esp8266_request("1.1.0", "sketch"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn test_release_being_written_is_never_served() {
    let fixture = Fixture::new();
    fixture.write_release("1.1.0");

    // Synchronizer holds the lock while 1.2.0 is half written
    let guard = fixture.store.lock().await.expect("store lock");
    let partial = fixture.release_dir("1.2.0");
    fs::create_dir_all(&partial).unwrap();
    fs::write(partial.join(FIRMWARE), firmware_for("1.2.0")).unwrap();

    let poll = tokio::spawn(router(&fixture).oneshot(esp8266_request("1.1.0", "sketch")));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!poll.is_finished());

    // Finish the release, then let the poll through
    fs::remove_dir_all(&partial).unwrap();
    drop(guard);
    fixture.write_release("1.2.0");

    let response = tokio::time::timeout(Duration::from_secs(5), poll)
        .await
        .expect("poll did not finish")
        .unwrap()
        .unwrap();
    // Either the complete 1.2.0 or nothing, never the partial directory
    match response.status() {
        StatusCode::OK => assert_eq!(body_bytes(response.into_body()).await, firmware_for("1.2.0")),
        status => assert_eq!(status, StatusCode::NOT_MODIFIED),
    }
}

#[tokio::test]
async fn test_releases_listing() {
    let fixture = Fixture::new();
    fixture.write_release("1.1.0");
    fs::create_dir_all(fixture.release_dir("1.2.0")).unwrap();

    let response = router(&fixture)
        .oneshot(Request::builder().uri("/api/releases").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_bytes(response.into_body()).await;
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["source"], "acme/Widget");
    assert_eq!(json["latest_verified"], "1.1.0");
    assert_eq!(json["releases"][0]["verified"], true);
    assert_eq!(json["releases"][1]["version"], "1.2.0");
    assert_eq!(json["releases"][1]["verified"], false);
}

#[tokio::test]
async fn test_operational_routes() {
    let fixture = Fixture::new();

    for uri in ["/", "/api/health", "/api/status", "/api/openapi.json"] {
        let response = router(&fixture)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{}", uri);
    }

    let response = router(&fixture)
        .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_bytes(response.into_body()).await;
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["runs"], 0);
}
