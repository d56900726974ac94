//! Release Synchronization
//!
//! Polls an upstream source for its latest release and mirrors it into the
//! [`ReleaseStore`]. A release becomes visible to devices only once its
//! manifest verifies, because the store only ever reports verified
//! directories as latest.

use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use super::store::{ReleaseStore, StoreError, StoreGuard};
use super::verify::VerificationResult;
use super::version::{Version, VersionError};
use super::ReleaseSource;

/// Asset attached to an upstream release
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamAsset {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

/// Latest published upstream release
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamRelease {
    pub tag_name: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub assets: Vec<UpstreamAsset>,
}

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),
    #[error("Rate limited by upstream API")]
    RateLimited,
    #[error("Repository {0} not found")]
    RepositoryNotFound(String),
    #[error("Failed to download {asset}: {reason}")]
    AssetDownloadFailed { asset: String, reason: String },
    #[error("Upstream API error: {0}")]
    Api(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl UpstreamError {
    /// Failures that the next scheduled run may not hit again
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NetworkUnavailable(_) | Self::RateLimited | Self::AssetDownloadFailed { .. }
        )
    }
}

/// Where releases come from
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// Latest published release, or `None` when nothing is published yet.
    async fn latest_release(
        &self,
        source: &ReleaseSource,
    ) -> Result<Option<UpstreamRelease>, UpstreamError>;

    /// Download one asset to `dest`, returning the number of bytes written.
    async fn download_asset(
        &self,
        source: &ReleaseSource,
        asset: &UpstreamAsset,
        dest: &Path,
    ) -> Result<u64, UpstreamError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    NoReleases,
    UpToDate {
        local: Option<Version>,
        upstream: Version,
    },
    AlreadyDownloaded(Version),
    Downloaded(Version),
    /// Transient failure, partial data kept for the next run
    Deferred(String),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("Upstream tag is not a valid version: {0}")]
    InvalidUpstreamTag(#[from] VersionError),
    #[error("Release {version} failed verification: {result}")]
    Verification {
        version: String,
        result: VerificationResult,
    },
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Upstream(e) if e.is_transient())
    }
}

/// Mirrors the latest upstream release into the store
pub struct ReleaseSynchronizer<U> {
    store: Arc<ReleaseStore>,
    upstream: U,
}

impl<U: UpstreamSource> ReleaseSynchronizer<U> {
    pub fn new(store: Arc<ReleaseStore>, upstream: U) -> Self {
        Self { store, upstream }
    }

    pub fn store(&self) -> &Arc<ReleaseStore> {
        &self.store
    }

    /// Run once, turning transient failures into [`SyncOutcome::Deferred`].
    ///
    /// Only fatal failures are returned as errors.
    pub async fn run(&self) -> Result<SyncOutcome, SyncError> {
        match self.sync().await {
            Err(e) if e.is_transient() => {
                warn!("Synchronization of {} deferred: {}", self.store.source(), e);
                Ok(SyncOutcome::Deferred(e.to_string()))
            }
            Err(e) => {
                error!("Synchronization of {} failed: {}", self.store.source(), e);
                Err(e)
            }
            Ok(outcome) => Ok(outcome),
        }
    }

    /// Run once, returning every failure.
    pub async fn sync(&self) -> Result<SyncOutcome, SyncError> {
        let source = self.store.source().clone();
        let known = self.local_baseline().await?;

        let Some(release) = self.upstream.latest_release(&source).await? else {
            warn!("No release is available for {}", source);
            return Ok(SyncOutcome::NoReleases);
        };

        let upstream = Version::parse(&release.tag_name)?;
        if let Some(local) = &known {
            if !upstream.is_newer_than(local) {
                info!("{} is already the newest version: {}", source, local);
                return Ok(SyncOutcome::UpToDate {
                    local: known,
                    upstream,
                });
            }
        }

        // Readers must not look at the directory until it is complete
        let guard = self.store.lock().await?;
        let required = self.store.required_files();
        let dir = guard.path(&upstream);
        if dir.is_dir() && guard.verify(&upstream, required).is_verified() {
            info!("{} was already downloaded", dir.display());
            return Ok(SyncOutcome::AlreadyDownloaded(upstream));
        }
        guard.create_dir(&upstream)?;

        self.download_assets(&guard, &source, &release, &upstream).await?;

        match guard.verify(&upstream, required) {
            VerificationResult::AllVerified => {
                info!(
                    "{}-{} was successfully downloaded to {}, body: {:?}",
                    source.repo,
                    upstream,
                    dir.display(),
                    release.body.as_deref().unwrap_or_default()
                );
                Ok(SyncOutcome::Downloaded(upstream))
            }
            result => {
                guard.delete_corrupt(&upstream)?;
                Err(SyncError::Verification {
                    version: upstream.to_string(),
                    result,
                })
            }
        }
    }

    /// Newest verified local release. An unverified newest directory is
    /// deleted first, so a release with the same tag upstream is fetched again.
    async fn local_baseline(&self) -> Result<Option<Version>, SyncError> {
        let guard = self.store.lock().await?;
        let Some(latest) = guard.latest_listed()? else {
            return Ok(None);
        };

        let result = guard.verify(&latest, self.store.required_files());
        if result.is_verified() {
            debug!("Local release {} verifies", latest);
            return Ok(Some(latest));
        }

        warn!("Local release {} is not usable ({}), deleting it", latest, result);
        guard.delete_corrupt(&latest)?;
        Ok(guard.latest_verified()?)
    }

    async fn download_assets(
        &self,
        guard: &StoreGuard<'_>,
        source: &ReleaseSource,
        release: &UpstreamRelease,
        version: &Version,
    ) -> Result<(), SyncError> {
        let dir = guard.path(version);
        let manifest_name = self.store.verifier().algorithm().manifest_name();
        let required = self.store.required_files();

        for asset in &release.assets {
            let wanted = asset.name == manifest_name
                || required.map_or(true, |names| names.iter().any(|n| n == &asset.name));
            if !wanted {
                info!("Skipping {}", asset.name);
                continue;
            }
            if !is_safe_asset_name(&asset.name) {
                warn!("Skipping asset with unsafe name {:?}", asset.name);
                continue;
            }

            let dest = dir.join(&asset.name);
            info!("Downloading {} ({} bytes) to {}", asset.name, asset.size, dest.display());
            match self.upstream.download_asset(source, asset, &dest).await {
                Ok(bytes) => trace!("Downloaded {} bytes of {}", bytes, asset.name),
                Err(e) => {
                    error!("Failed to download {}: {}", asset.name, e);
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }
}

/// Asset names become file names inside a release directory
pub fn is_safe_asset_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && !name.ends_with(".partial")
}
