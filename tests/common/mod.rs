//! Shared fixtures for the integration tests
//!
//! A temporary release store plus wiremock helpers that imitate the GitHub
//! releases API for one repository.

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use md5::{Digest, Md5};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use firmhub_lib::engine::device::Artifacts;
use firmhub_lib::engine::release::{ChecksumAlgorithm, ReleaseSource, ReleaseStore};

pub const OWNER: &str = "acme";
pub const REPO: &str = "Widget";
pub const FIRMWARE: &str = "Widget_firmware.bin";
pub const FILESYSTEM: &str = "Widget_spiffs.bin";

pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// `MD5SUMS` content for the given files
pub fn manifest(files: &[(&str, &[u8])]) -> String {
    files
        .iter()
        .map(|(name, data)| format!("{}  {}\n", md5_hex(data), name))
        .collect()
}

pub fn firmware_for(tag: &str) -> Vec<u8> {
    format!("firmware image {}", tag).into_bytes()
}

pub fn filesystem_for(tag: &str) -> Vec<u8> {
    format!("spiffs image {}", tag).into_bytes()
}

/// Temporary update folder with an MD5 store for acme/Widget
pub struct Fixture {
    pub dir: TempDir,
    pub store: Arc<ReleaseStore>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(ReleaseStore::new(
            dir.path().to_path_buf(),
            ReleaseSource::new(OWNER, REPO),
            ChecksumAlgorithm::Md5,
        ));
        Self { dir, store }
    }

    pub fn release_dir(&self, tag: &str) -> PathBuf {
        self.store.source_dir().join(tag)
    }

    /// Write a complete, verifiable release with both images
    pub fn write_release(&self, tag: &str) -> PathBuf {
        let firmware = firmware_for(tag);
        let filesystem = filesystem_for(tag);
        let files: [(&str, &[u8]); 2] = [
            (FIRMWARE, firmware.as_slice()),
            (FILESYSTEM, filesystem.as_slice()),
        ];

        let dir = self.release_dir(tag);
        fs::create_dir_all(&dir).expect("create release dir");
        for (name, data) in files {
            fs::write(dir.join(name), data).expect("write asset");
        }
        fs::write(dir.join("MD5SUMS"), manifest(&files)).expect("write manifest");
        dir
    }

    pub fn artifacts(&self) -> Artifacts {
        Artifacts::for_repo(REPO)
    }
}

/// Mount `releases/latest` for `tag` plus one download route per asset.
///
/// Asset ids are their index in `files`; the manifest gets id 100. Every
/// asset route expects exactly `downloads` hits.
pub async fn mock_release(
    server: &MockServer,
    tag: &str,
    files: &[(&str, Vec<u8>)],
    manifest: Option<String>,
    downloads: u64,
) {
    let mut assets: Vec<(u64, String, Vec<u8>)> = files
        .iter()
        .enumerate()
        .map(|(i, (name, data))| (i as u64, name.to_string(), data.clone()))
        .collect();
    if let Some(manifest) = manifest {
        assets.push((100, "MD5SUMS".to_string(), manifest.into_bytes()));
    }

    let listing: Vec<_> = assets
        .iter()
        .map(|(id, name, data)| json!({"id": id, "name": name, "size": data.len()}))
        .collect();
    Mock::given(method("GET"))
        .and(path(format!("/repos/{}/{}/releases/latest", OWNER, REPO)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tag_name": tag,
            "body": format!("Release {}", tag),
            "assets": listing,
        })))
        .mount(server)
        .await;

    for (id, _, data) in assets {
        Mock::given(method("GET"))
            .and(path(format!("/repos/{}/{}/releases/assets/{}", OWNER, REPO, id)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(data))
            .expect(downloads)
            .mount(server)
            .await;
    }
}

/// Mount a release whose manifest matches its files
pub async fn mock_good_release(server: &MockServer, tag: &str, downloads: u64) {
    let firmware = firmware_for(tag);
    let filesystem = filesystem_for(tag);
    let manifest = manifest(&[
        (FIRMWARE, firmware.as_slice()),
        (FILESYSTEM, filesystem.as_slice()),
    ]);
    mock_release(
        server,
        tag,
        &[(FIRMWARE, firmware), (FILESYSTEM, filesystem)],
        Some(manifest),
        downloads,
    )
    .await;
}

/// Device poll as sent by the ESP8266 Arduino updater
pub fn esp8266_request(version: &str, mode: &str) -> Request<Body> {
    esp8266_request_without(version, mode, None)
}

pub fn esp8266_request_without(version: &str, mode: &str, skip: Option<&str>) -> Request<Body> {
    let headers = [
        ("User-Agent", "ESP8266-http-Update"),
        ("x-ESP8266-Chip-ID", "1234567"),
        ("x-ESP8266-STA-MAC", "18:FE:AA:AA:AA:AA"),
        ("x-ESP8266-AP-MAC", "1A:FE:AA:AA:AA:AA"),
        ("x-ESP8266-free-space", "671744"),
        ("x-ESP8266-sketch-size", "373940"),
        ("x-ESP8266-sketch-md5", "a56f8ef78a0bebd812f62067daf1408a"),
        ("x-ESP8266-chip-size", "4194304"),
        ("x-ESP8266-sdk-version", "1.3.0"),
        ("x-ESP8266-version", version),
        ("x-ESP8266-mode", mode),
    ];

    let mut builder = Request::builder().method("GET").uri("/update");
    for (name, value) in headers {
        if Some(name) != skip {
            builder = builder.header(name, value);
        }
    }
    builder.body(Body::empty()).expect("request")
}
