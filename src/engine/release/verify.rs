//! Checksum Verification
//!
//! Streams files through MD5 or SHA-256 and checks a release directory
//! against its checksum manifest (`MD5SUMS` / `SHA256SUMS`).

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, error, info};

/// Read buffer size used while hashing.
pub const CHUNK_SIZE: usize = 8192;

/// Digest used for manifests and for the digest header sent to devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// What the ESP Arduino HTTP update clients verify.
    #[default]
    Md5,
    Sha256,
}

impl ChecksumAlgorithm {
    /// Name of the manifest file inside a release directory.
    pub fn manifest_name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5SUMS",
            Self::Sha256 => "SHA256SUMS",
        }
    }

    /// Response header carrying the served artifact's digest.
    pub fn header_name(&self) -> &'static str {
        match self {
            Self::Md5 => "x-MD5",
            Self::Sha256 => "x-SHA256",
        }
    }

    fn digest_len(&self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha256 => 64,
        }
    }
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Md5 => write!(f, "md5"),
            Self::Sha256 => write!(f, "sha256"),
        }
    }
}

fn digest_file<D: Digest>(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = D::new();

    let mut buffer = [0u8; CHUNK_SIZE];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Manifest not found: {0}")]
    Missing(String),
    #[error("Failed to read manifest: {0}")]
    Io(#[from] io::Error),
    #[error("Malformed manifest line {line}: {content:?}")]
    Malformed { line: usize, content: String },
}

/// One `checksum filename` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub checksum: String,
    pub file_name: String,
}

/// Ordered list of expected checksums for a release directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Parse whitespace separated `checksum filename` lines.
    ///
    /// Blank lines are ignored and a leading `*` on the file name (binary
    /// mode marker written by `md5sum -b`) is dropped.
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let mut entries = Vec::new();
        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            let malformed = || ManifestError::Malformed {
                line: index + 1,
                content: raw.to_string(),
            };

            let (checksum, rest) = line.split_once(char::is_whitespace).ok_or_else(malformed)?;
            let file_name = rest.trim_start();
            let file_name = file_name.strip_prefix('*').unwrap_or(file_name);

            if file_name.is_empty() || !checksum.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(malformed());
            }

            entries.push(ManifestEntry {
                checksum: checksum.to_ascii_lowercase(),
                file_name: file_name.to_string(),
            });
        }
        Ok(Self { entries })
    }

    pub fn read(path: &Path) -> Result<Self, ManifestError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ManifestError::Missing(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Self::parse(&content)
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn get(&self, file_name: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.file_name == file_name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of checking a release directory against its manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResult {
    AllVerified,
    /// A file's content does not hash to the manifest value (or could not be read).
    ChecksumMismatch(String),
    /// Required files absent from the manifest, or listed but absent on disk.
    MissingFromManifest(Vec<String>),
    /// Manifest missing, unreadable, malformed, or listing nothing to verify.
    ManifestUnreadable(String),
}

impl VerificationResult {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::AllVerified)
    }
}

impl std::fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllVerified => write!(f, "all files verified"),
            Self::ChecksumMismatch(name) => write!(f, "checksum mismatch for {}", name),
            Self::MissingFromManifest(names) => write!(f, "missing files: {}", names.join(", ")),
            Self::ManifestUnreadable(reason) => write!(f, "manifest unreadable: {}", reason),
        }
    }
}

/// Verifier for release directories
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumVerifier {
    algorithm: ChecksumAlgorithm,
}

impl ChecksumVerifier {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Hex digest of a file, read in `CHUNK_SIZE` pieces.
    pub fn hash(&self, path: &Path) -> io::Result<String> {
        match self.algorithm {
            ChecksumAlgorithm::Md5 => digest_file::<Md5>(path),
            ChecksumAlgorithm::Sha256 => digest_file::<Sha256>(path),
        }
    }

    /// Check one file against an expected hex digest.
    pub fn verify_file(&self, path: &Path, expected: &str) -> io::Result<bool> {
        let actual = self.hash(path)?;
        Ok(expected.len() == self.algorithm.digest_len() && actual.eq_ignore_ascii_case(expected))
    }

    /// Verify `dir` against its manifest.
    ///
    /// With `restrict_to`, only the named files are checked and every one of
    /// them must be listed. Without it, every listed file is checked and the
    /// manifest must list at least one.
    pub fn verify_manifest(
        &self,
        dir: &Path,
        restrict_to: Option<&[String]>,
    ) -> VerificationResult {
        let manifest_path = dir.join(self.algorithm.manifest_name());
        let manifest = match Manifest::read(&manifest_path) {
            Ok(manifest) => manifest,
            Err(e) => {
                error!("Failed to read {}: {}", manifest_path.display(), e);
                return VerificationResult::ManifestUnreadable(e.to_string());
            }
        };
        self.verify_entries(dir, &manifest, restrict_to)
    }

    pub fn verify_entries(
        &self,
        dir: &Path,
        manifest: &Manifest,
        restrict_to: Option<&[String]>,
    ) -> VerificationResult {
        let selected: Vec<&ManifestEntry> = match restrict_to {
            Some(required) => {
                let unlisted: Vec<String> = required
                    .iter()
                    .filter(|name| manifest.get(name).is_none())
                    .cloned()
                    .collect();
                if !unlisted.is_empty() {
                    error!("Not listed in manifest: {:?}", unlisted);
                    return VerificationResult::MissingFromManifest(unlisted);
                }
                manifest
                    .entries()
                    .iter()
                    .filter(|e| required.contains(&e.file_name))
                    .collect()
            }
            None => {
                if manifest.is_empty() {
                    error!("Manifest in {} lists no files", dir.display());
                    return VerificationResult::ManifestUnreadable(
                        "manifest lists no files".to_string(),
                    );
                }
                manifest.entries().iter().collect()
            }
        };

        let mut missing = Vec::new();
        for entry in selected {
            let file_path = dir.join(&entry.file_name);
            debug!("Verifying checksum of {}", file_path.display());
            match self.verify_file(&file_path, &entry.checksum) {
                Ok(true) => info!("Checksum verified for {}", file_path.display()),
                Ok(false) => {
                    error!("Checksum failed for {}", file_path.display());
                    return VerificationResult::ChecksumMismatch(entry.file_name.clone());
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    missing.push(entry.file_name.clone());
                }
                Err(e) => {
                    error!("Failed to read {}: {}", file_path.display(), e);
                    return VerificationResult::ChecksumMismatch(entry.file_name.clone());
                }
            }
        }

        if !missing.is_empty() {
            error!("Not all files were present in {}: {:?}", dir.display(), missing);
            return VerificationResult::MissingFromManifest(missing);
        }

        VerificationResult::AllVerified
    }
}
