//! Release Version Ordering
//!
//! Parses release tags and device-reported versions into a total order.
//! Accepted grammar: optional `v` prefix, one to three dotted numeric
//! segments, then optional `-prerelease` and `+build` suffixes
//! (`1`, `1.2`, `v1.2.3`, `1.2.3-rc.1+build.7`). Missing segments are zero.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Invalid version '{tag}': {reason}")]
    InvalidVersion { tag: String, reason: String },
    #[error("No versions to compare")]
    NoVersions,
}

/// A release tag together with its parsed, comparable form.
///
/// The original tag text is kept because it names the release directory on
/// disk; equality and ordering only look at the parsed value, so `v1.2.0`
/// and `1.2` are the same version.
#[derive(Debug, Clone)]
pub struct Version {
    tag: String,
    parsed: semver::Version,
}

impl Version {
    pub fn parse(tag: &str) -> Result<Self, VersionError> {
        let invalid = |reason: &str| VersionError::InvalidVersion {
            tag: tag.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = tag.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty version"));
        }

        let body = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        let split_at = body.find(['-', '+']).unwrap_or(body.len());
        let (core, suffix) = body.split_at(split_at);

        let segments: Vec<&str> = core.split('.').collect();
        if segments.len() > 3 {
            return Err(invalid("more than three numeric segments"));
        }

        let mut numbers = [0u64; 3];
        for (slot, segment) in numbers.iter_mut().zip(&segments) {
            if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid("segments must be non-empty decimal numbers"));
            }
            *slot = segment
                .parse()
                .map_err(|_| invalid("numeric segment out of range"))?;
        }

        let normalized = format!("{}.{}.{}{}", numbers[0], numbers[1], numbers[2], suffix);
        let parsed = semver::Version::parse(&normalized).map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            tag: trimmed.to_string(),
            parsed,
        })
    }

    /// The tag exactly as published (minus surrounding whitespace).
    pub fn as_str(&self) -> &str {
        &self.tag
    }

    /// Whether this version should replace `current`. Equal versions never do.
    pub fn is_newer_than(&self, current: &Version) -> bool {
        self > current
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.parsed == other.parsed
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parsed.hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parsed.cmp(&other.parsed)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Compare two version strings, rejecting anything outside the grammar.
pub fn compare(a: &str, b: &str) -> Result<Ordering, VersionError> {
    Ok(Version::parse(a)?.cmp(&Version::parse(b)?))
}

/// Largest version of a non-empty collection.
pub fn max<I>(versions: I) -> Result<Version, VersionError>
where
    I: IntoIterator<Item = Version>,
{
    versions.into_iter().max().ok_or(VersionError::NoVersions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_basic_ordering() {
        assert!(v("1.2.0") > v("1.1.0"));
        assert!(v("1.10.0") > v("1.9.9"));
        assert!(v("2") > v("1.99.99"));
        assert_eq!(compare("0.1.1", "0.1.0").unwrap(), Ordering::Greater);
        assert_eq!(compare("0.1.0", "0.2.0").unwrap(), Ordering::Less);
    }

    #[test]
    fn test_prefix_and_padding_are_equal() {
        assert_eq!(v("v1.2.0"), v("1.2"));
        assert_eq!(compare("V1", "1.0.0").unwrap(), Ordering::Equal);
        assert_eq!(v("v1.2.0").as_str(), "v1.2.0");
    }

    #[test]
    fn test_prerelease_sorts_before_release() {
        assert!(v("1.0.0-rc.1") < v("1.0.0"));
        assert!(v("1.0.0-alpha") < v("1.0.0-beta"));
        assert!(v("1.0.0-rc.1") > v("0.9.9"));
    }

    #[test]
    fn test_sentinel_zero_parses() {
        assert_eq!(v("0"), v("0.0.0"));
        assert!(v("0.0.1").is_newer_than(&v("0")));
    }

    #[test]
    fn test_equal_is_not_newer() {
        assert!(!v("1.2.0").is_newer_than(&v("1.2.0")));
        assert!(!v("1.1.0").is_newer_than(&v("1.2.0")));
        assert!(v("1.2.0").is_newer_than(&v("1.1.0")));
    }

    #[test]
    fn test_invalid_versions_rejected() {
        for bad in ["", "   ", "abc", "1..2", "1.2.3.4", "1.x", "v", "1.2.3-", "-1.0", "1.0/../x"] {
            assert!(
                matches!(Version::parse(bad), Err(VersionError::InvalidVersion { .. })),
                "expected '{}' to be rejected",
                bad
            );
        }
        assert!(compare("1.0.0", "garbage").is_err());
    }

    #[test]
    fn test_order_is_antisymmetric_and_transitive() {
        let tags = [
            "0", "0.9", "1.0.0-alpha", "1.0.0-rc.1", "1.0.0", "v1.0.1", "1.10", "2.0.0",
        ];
        let samples: Vec<Version> = tags.iter().map(|s| v(s)).collect();

        for a in &samples {
            assert_eq!(a.cmp(a), Ordering::Equal);
            for b in &samples {
                assert_eq!(a.cmp(b), b.cmp(a).reverse());
                for c in &samples {
                    if a <= b && b <= c {
                        assert!(a <= c);
                    }
                }
            }
        }
    }

    #[test]
    fn test_max() {
        let latest = max(vec![v("1.0.0"), v("v1.2.0"), v("1.1.5")]).unwrap();
        assert_eq!(latest.as_str(), "v1.2.0");
        assert_eq!(max(Vec::new()), Err(VersionError::NoVersions));
    }
}
