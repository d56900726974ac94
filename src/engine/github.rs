//! GitHub Releases Upstream
//!
//! Reads the latest published release of a repository and downloads its
//! assets through the REST API.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::engine::release::download::{DownloadError, Downloader};
use crate::engine::release::sync::{UpstreamAsset, UpstreamError, UpstreamRelease, UpstreamSource};
use crate::engine::release::ReleaseSource;

pub const GITHUB_API_URL: &str = "https://api.github.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubRepo {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub private: bool,
}

pub struct GitHubClient {
    api_url: String,
    token: Option<String>,
    downloader: Downloader,
}

impl GitHubClient {
    /// Client against the public API; every request gives up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, UpstreamError> {
        let downloader = Downloader::new(timeout)
            .map_err(|e| UpstreamError::Api(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            api_url: GITHUB_API_URL.to_string(),
            token: None,
            downloader,
        })
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    fn get(&self, url: String, accept: &str) -> RequestBuilder {
        let request = self.downloader.client().get(url).header(ACCEPT, accept);
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    /// Repository metadata, `None` if it does not exist (or is invisible to the token).
    pub async fn get_repo(
        &self,
        source: &ReleaseSource,
    ) -> Result<Option<GitHubRepo>, UpstreamError> {
        let response = self
            .get(
                format!("{}/repos/{}/{}", self.api_url, source.owner, source.repo),
                "application/vnd.github+json",
            )
            .send()
            .await
            .map_err(network_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let repo: GitHubRepo = check_status(response)?.json().await.map_err(network_error)?;
        Ok(Some(repo))
    }
}

#[async_trait]
impl UpstreamSource for GitHubClient {
    async fn latest_release(
        &self,
        source: &ReleaseSource,
    ) -> Result<Option<UpstreamRelease>, UpstreamError> {
        let url = format!(
            "{}/repos/{}/{}/releases/latest",
            self.api_url, source.owner, source.repo
        );
        info!("Checking for releases at {}", url);

        let response = self
            .get(url, "application/vnd.github+json")
            .send()
            .await
            .map_err(network_error)?;

        // GitHub answers 404 both for a missing repository and for one without releases
        if response.status() == StatusCode::NOT_FOUND {
            return match self.get_repo(source).await? {
                Some(repo) => {
                    debug!("{} exists but has no published release", repo.full_name);
                    Ok(None)
                }
                None => Err(UpstreamError::RepositoryNotFound(source.full_name())),
            };
        }

        let release: UpstreamRelease = check_status(response)?.json().await.map_err(|e| {
            if e.is_decode() {
                UpstreamError::Api(format!("Failed to parse release info: {}", e))
            } else {
                network_error(e)
            }
        })?;
        debug!(
            "Latest release of {} is {} with {} assets",
            source,
            release.tag_name,
            release.assets.len()
        );
        Ok(Some(release))
    }

    async fn download_asset(
        &self,
        source: &ReleaseSource,
        asset: &UpstreamAsset,
        dest: &Path,
    ) -> Result<u64, UpstreamError> {
        let url = format!(
            "{}/repos/{}/{}/releases/assets/{}",
            self.api_url, source.owner, source.repo, asset.id
        );
        let request = self.get(url, "application/octet-stream");

        let result = self
            .downloader
            .download(request, dest, |done, total| {
                trace!("{}: {}/{} bytes", asset.name, done, total)
            })
            .await
            .map_err(|e| match e {
                DownloadError::Network(e) => UpstreamError::AssetDownloadFailed {
                    asset: asset.name.clone(),
                    reason: e.to_string(),
                },
                DownloadError::Status(status) => UpstreamError::AssetDownloadFailed {
                    asset: asset.name.clone(),
                    reason: format!("HTTP {}", status),
                },
                DownloadError::Io(e) => UpstreamError::Io(e),
            })?;
        Ok(result.bytes_downloaded)
    }
}

fn network_error(e: reqwest::Error) -> UpstreamError {
    UpstreamError::NetworkUnavailable(e.to_string())
}

/// Map a non-success API response onto the transient/fatal split.
fn check_status(response: Response) -> Result<Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let exhausted = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "0")
        .unwrap_or(false);

    match status {
        StatusCode::TOO_MANY_REQUESTS => Err(UpstreamError::RateLimited),
        StatusCode::FORBIDDEN if exhausted => Err(UpstreamError::RateLimited),
        StatusCode::UNAUTHORIZED => Err(UpstreamError::Api("Bad credentials".to_string())),
        s if s.is_server_error() => Err(UpstreamError::NetworkUnavailable(format!(
            "GitHub API returned {}",
            s
        ))),
        s => Err(UpstreamError::Api(format!("GitHub API error: {}", s))),
    }
}
