//! Firmhub Release Pipeline
//!
//! Keeps a local, checksum-verified copy of an upstream project's releases.
//!
//! Components:
//! - `version` - Release tag parsing and ordering
//! - `verify` - Streaming checksums and manifest verification
//! - `store` - Lock-guarded on-disk release directories
//! - `download` - Streaming asset downloads
//! - `sync` - Periodic upstream synchronization
//! - `status` - Record of recent synchronization runs

pub mod version;
pub mod verify;
pub mod store;
pub mod download;
pub mod sync;
pub mod status;

use serde::{Deserialize, Serialize};

pub use status::{SyncReport, SyncStatus, SyncStatusBoard};
pub use store::{ReleaseState, ReleaseStore, StoreGuard};
pub use sync::{ReleaseSynchronizer, SyncError, SyncOutcome, UpstreamSource};
pub use verify::{ChecksumAlgorithm, ChecksumVerifier, VerificationResult};
pub use version::Version;

/// Upstream project publishing the releases (`owner/repo`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseSource {
    pub owner: String,
    pub repo: String,
}

impl ReleaseSource {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

impl std::fmt::Display for ReleaseSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}
