//! HTTP Download Manager
//!
//! Streams release assets into a release directory. Bytes go to
//! `<name>.partial` first and the file only takes its final name once the
//! whole body has arrived.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{RequestBuilder, StatusCode};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

pub const USER_AGENT: &str = concat!("firmhub/", env!("CARGO_PKG_VERSION"));

/// Download result with metadata
#[derive(Debug)]
pub struct DownloadResult {
    pub path: PathBuf,
    pub bytes_downloaded: u64,
}

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Unexpected HTTP status {0}")]
    Status(StatusCode),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Download manager for release assets
pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    /// Create a downloader whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(15).min(timeout))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Send `request` and stream a successful body into `dest`.
    ///
    /// `on_progress` receives `(downloaded, total)`; `total` is 0 when the
    /// server sends no content length.
    pub async fn download<F>(
        &self,
        request: RequestBuilder,
        dest: &Path,
        mut on_progress: F,
    ) -> Result<DownloadResult, DownloadError>
    where
        F: FnMut(u64, u64),
    {
        let response = request.send().await?;
        if response.status() != StatusCode::OK {
            return Err(DownloadError::Status(response.status()));
        }

        let total_size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        let partial_path = partial_path(dest);
        let mut file = File::create(&partial_path).await?;

        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            on_progress(downloaded, total_size);
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&partial_path, dest).await?;

        Ok(DownloadResult {
            path: dest.to_path_buf(),
            bytes_downloaded: downloaded,
        })
    }
}

/// `fw.bin` -> `fw.bin.partial`
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    dest.with_file_name(name)
}
