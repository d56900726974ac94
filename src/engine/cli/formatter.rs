//! CLI Output Formatting Module
//! Colorized terminal output for releases, verification and sync results

use colored::Colorize;

use crate::engine::api::ReleasesResponse;
use crate::engine::release::{SyncStatus, VerificationResult};

pub struct CliFormatter;

impl CliFormatter {
    /// Print a success message
    pub fn success(message: &str) {
        println!("{} {}", "✓".green().bold(), message);
    }

    /// Print an error message
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red().bold(), message);
    }

    /// Print a warning message
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow().bold(), message);
    }

    /// Print an info message
    pub fn info(message: &str) {
        println!("{} {}", "ℹ".blue().bold(), message);
    }

    /// Print a section header
    pub fn header(title: &str) {
        println!("\n{}", title.bright_cyan().bold());
        println!("{}", "─".repeat(title.chars().count()).bright_black());
    }

    /// Print a key-value pair
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", key.bright_white().bold(), value);
    }

    pub fn releases(report: &ReleasesResponse) {
        Self::header(&format!("Releases of {}", report.source));
        if report.releases.is_empty() {
            Self::info("No release has been downloaded yet");
            return;
        }

        for release in report.releases.iter().rev() {
            let latest = report.latest_verified.as_deref() == Some(release.version.as_str());
            let marker = if latest { " (latest)".bright_cyan().to_string() } else { String::new() };
            match &release.problem {
                None => println!("  {} {}{}", "✓".green().bold(), release.version, marker),
                Some(problem) => println!(
                    "  {} {} {}",
                    "✗".red().bold(),
                    release.version,
                    problem.bright_black()
                ),
            }
        }
    }

    pub fn verification(version: &str, result: &VerificationResult) {
        if result.is_verified() {
            Self::success(&format!("{} verified", version));
        } else {
            Self::error(&format!("{} failed verification: {}", version, result));
        }
    }

    pub fn sync_status(status: &SyncStatus) {
        match status {
            SyncStatus::Running => Self::info("Synchronization is running"),
            SyncStatus::NoReleases => Self::warning("Upstream has no published release"),
            SyncStatus::UpToDate { local, upstream } => Self::success(&format!(
                "Up to date (local {}, upstream {})",
                local.as_deref().unwrap_or("none"),
                upstream
            )),
            SyncStatus::AlreadyDownloaded { version } => {
                Self::success(&format!("{} was already downloaded", version))
            }
            SyncStatus::Downloaded { version } => {
                Self::success(&format!("Downloaded and verified {}", version))
            }
            SyncStatus::Deferred { reason } => {
                Self::warning(&format!("Deferred until the next run: {}", reason))
            }
            SyncStatus::Failed { reason } => {
                Self::error(&format!("Synchronization failed: {}", reason))
            }
        }
    }
}

/// Format file size in human-readable format
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Format duration in human-readable format
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
