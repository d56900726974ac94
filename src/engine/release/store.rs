//! Release Store
//!
//! Manages the on-disk release layout:
//!
//! ```text
//! <update_folder>/<repo>/<tag>/<asset files> + MD5SUMS
//! ```
//!
//! All reads and writes go through a [`StoreGuard`], which holds the
//! store-wide lock for as long as it lives. The lock is an in-process mutex
//! plus an advisory lock on `<repo>/.lock`, so a `firmhub sync` run and a
//! running server never interleave on the same tree either.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;

use fs4::fs_std::FileExt;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::verify::{ChecksumAlgorithm, ChecksumVerifier, VerificationResult};
use super::version::Version;
use super::ReleaseSource;

/// Advisory lock file inside the source directory
pub const LOCK_FILE_NAME: &str = ".lock";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Verification state of one release directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseState {
    Absent,
    /// Mid-download or corrupt; never served.
    Unverified(VerificationResult),
    Verified,
}

impl ReleaseState {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified)
    }
}

#[derive(Debug, Clone)]
pub struct ReleaseEntry {
    pub version: Version,
    pub state: ReleaseState,
}

/// Release directories for one upstream source
pub struct ReleaseStore {
    update_folder: PathBuf,
    source: ReleaseSource,
    verifier: ChecksumVerifier,
    /// Files a release must contain to count as verified (all manifest entries when `None`)
    required_files: Option<Vec<String>>,
    lock: Mutex<()>,
}

impl ReleaseStore {
    pub fn new(
        update_folder: PathBuf,
        source: ReleaseSource,
        algorithm: ChecksumAlgorithm,
    ) -> Self {
        Self {
            update_folder,
            source,
            verifier: ChecksumVerifier::new(algorithm),
            required_files: None,
            lock: Mutex::new(()),
        }
    }

    pub fn with_required_files(mut self, files: Option<Vec<String>>) -> Self {
        self.required_files = files;
        self
    }

    pub fn source(&self) -> &ReleaseSource {
        &self.source
    }

    pub fn verifier(&self) -> &ChecksumVerifier {
        &self.verifier
    }

    pub fn required_files(&self) -> Option<&[String]> {
        self.required_files.as_deref()
    }

    /// Directory holding one subdirectory per release tag
    pub fn source_dir(&self) -> PathBuf {
        self.update_folder.join(&self.source.repo)
    }

    /// Create the directory structure
    pub fn init(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.source_dir())?;
        Ok(())
    }

    /// Acquire the store lock. It is released when the guard is dropped,
    /// including on early returns and errors.
    ///
    /// Creates the source directory if needed, since the lock file lives there.
    pub async fn lock(&self) -> Result<StoreGuard<'_>, StoreError> {
        let guard = self.lock.lock().await;

        let lock_path = self.source_dir().join(LOCK_FILE_NAME);
        let lock_file = tokio::task::spawn_blocking(move || -> io::Result<File> {
            if let Some(parent) = lock_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&lock_path)?;
            // Blocks while another process holds the tree
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .map_err(io::Error::other)??;

        Ok(StoreGuard {
            store: self,
            _lock_file: lock_file,
            _guard: guard,
        })
    }
}

/// Exclusive access to the release tree.
pub struct StoreGuard<'a> {
    store: &'a ReleaseStore,
    // Closing the file releases the advisory lock
    _lock_file: File,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> StoreGuard<'a> {
    pub fn store(&self) -> &ReleaseStore {
        self.store
    }

    /// Directory of a release, whether or not it exists
    pub fn path(&self, version: &Version) -> PathBuf {
        self.store.source_dir().join(version.as_str())
    }

    /// Release directories whose names parse as versions, oldest first.
    pub fn list_versions(&self) -> Result<Vec<Version>, StoreError> {
        let source_dir = self.store.source_dir();
        if !source_dir.exists() {
            return Ok(vec![]);
        }

        let mut versions = Vec::new();
        for entry in fs::read_dir(&source_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!("Skipping non UTF-8 directory in {}", source_dir.display());
                continue;
            };
            match Version::parse(&name) {
                Ok(version) => versions.push(version),
                Err(e) => warn!("Skipping {}: {}", entry.path().display(), e),
            }
        }

        versions.sort();
        Ok(versions)
    }

    /// Verify a release directory, optionally only the named files.
    pub fn verify(&self, version: &Version, restrict_to: Option<&[String]>) -> VerificationResult {
        self.store.verifier.verify_manifest(&self.path(version), restrict_to)
    }

    pub fn state(&self, version: &Version) -> ReleaseState {
        if !self.path(version).is_dir() {
            return ReleaseState::Absent;
        }
        match self.verify(version, self.store.required_files()) {
            VerificationResult::AllVerified => ReleaseState::Verified,
            other => ReleaseState::Unverified(other),
        }
    }

    /// Newest release directory on disk, verified or not.
    pub fn latest_listed(&self) -> Result<Option<Version>, StoreError> {
        Ok(self.list_versions()?.pop())
    }

    /// Newest release directory that passes verification.
    pub fn latest_verified(&self) -> Result<Option<Version>, StoreError> {
        for version in self.list_versions()?.into_iter().rev() {
            match self.state(&version) {
                ReleaseState::Verified => {
                    debug!("Latest verified release: {}", version);
                    return Ok(Some(version));
                }
                state => warn!("Release {} is not verified: {:?}", version, state),
            }
        }
        Ok(None)
    }

    /// Every release directory with its state, oldest first.
    pub fn scan(&self) -> Result<Vec<ReleaseEntry>, StoreError> {
        Ok(self
            .list_versions()?
            .into_iter()
            .map(|version| {
                let state = self.state(&version);
                ReleaseEntry { version, state }
            })
            .collect())
    }

    /// Create a release directory if it does not exist yet.
    pub fn create_dir(&self, version: &Version) -> Result<PathBuf, StoreError> {
        let path = self.path(version);
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Remove a release directory that failed verification.
    pub fn delete_corrupt(&self, version: &Version) -> Result<(), StoreError> {
        let path = self.path(version);
        if path.exists() {
            warn!("{} is invalid, deleting it", path.display());
            fs::remove_dir_all(&path)?;
            info!("Deleted {}", path.display());
        }
        Ok(())
    }
}
