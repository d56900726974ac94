//! Synchronization Status
//!
//! In-memory record of what the background synchronizer last did, served by
//! the status endpoint and printed by the CLI.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::sync::SyncOutcome;

/// Result of one synchronization run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncStatus {
    /// Run still in progress
    Running,
    /// Upstream has no published release
    NoReleases,
    /// Upstream release is not newer than the local one
    UpToDate { local: Option<String>, upstream: String },
    /// Release was already complete on disk
    AlreadyDownloaded { version: String },
    /// Release downloaded and verified
    Downloaded { version: String },
    /// Transient failure; retried on the next tick
    Deferred { reason: String },
    /// Fatal failure; alert raised
    Failed { reason: String },
}

impl From<&SyncOutcome> for SyncStatus {
    fn from(outcome: &SyncOutcome) -> Self {
        match outcome {
            SyncOutcome::NoReleases => Self::NoReleases,
            SyncOutcome::UpToDate { local, upstream } => Self::UpToDate {
                local: local.as_ref().map(|v| v.to_string()),
                upstream: upstream.to_string(),
            },
            SyncOutcome::AlreadyDownloaded(version) => Self::AlreadyDownloaded {
                version: version.to_string(),
            },
            SyncOutcome::Downloaded(version) => Self::Downloaded {
                version: version.to_string(),
            },
            SyncOutcome::Deferred(reason) => Self::Deferred {
                reason: reason.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: SyncStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SyncSummary {
    pub runs: u64,
    pub failures: u64,
    pub last: Option<SyncReport>,
    /// Last run that downloaded a release
    pub last_download: Option<SyncReport>,
}

/// Shared between the scheduler (writer) and the HTTP handlers (readers)
#[derive(Debug, Default)]
pub struct SyncStatusBoard {
    inner: RwLock<SyncSummary>,
}

impl SyncStatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a run as started
    pub fn start(&self) -> DateTime<Utc> {
        let started_at = Utc::now();
        if let Ok(mut summary) = self.inner.write() {
            summary.runs += 1;
            summary.last = Some(SyncReport {
                started_at,
                finished_at: None,
                status: SyncStatus::Running,
            });
        }
        started_at
    }

    /// Record how a run started at `started_at` ended
    pub fn finish(&self, started_at: DateTime<Utc>, status: SyncStatus) {
        let report = SyncReport {
            started_at,
            finished_at: Some(Utc::now()),
            status,
        };
        if let Ok(mut summary) = self.inner.write() {
            match report.status {
                SyncStatus::Failed { .. } => summary.failures += 1,
                SyncStatus::Downloaded { .. } => summary.last_download = Some(report.clone()),
                _ => {}
            }
            summary.last = Some(report);
        }
    }

    pub fn snapshot(&self) -> SyncSummary {
        self.inner.read().map(|s| s.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::release::Version;

    #[test]
    fn test_board_default() {
        let board = SyncStatusBoard::new();
        let summary = board.snapshot();
        assert_eq!(summary.runs, 0);
        assert!(summary.last.is_none());
    }

    #[test]
    fn test_board_transitions() {
        let board = SyncStatusBoard::new();

        let started = board.start();
        assert_eq!(board.snapshot().last.unwrap().status, SyncStatus::Running);

        let outcome = SyncOutcome::Downloaded(Version::parse("v1.2.0").unwrap());
        board.finish(started, SyncStatus::from(&outcome));

        let summary = board.snapshot();
        assert_eq!(summary.runs, 1);
        assert_eq!(summary.failures, 0);
        assert_eq!(
            summary.last_download.unwrap().status,
            SyncStatus::Downloaded { version: "v1.2.0".to_string() }
        );

        let started = board.start();
        board.finish(started, SyncStatus::Failed { reason: "boom".to_string() });
        let summary = board.snapshot();
        assert_eq!(summary.runs, 2);
        assert_eq!(summary.failures, 1);
        assert!(summary.last.unwrap().finished_at.is_some());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_value(SyncStatus::UpToDate {
            local: Some("1.2.0".to_string()),
            upstream: "1.1.0".to_string(),
        })
        .unwrap();
        assert_eq!(json["status"], "up_to_date");
        assert_eq!(json["upstream"], "1.1.0");
    }
}
