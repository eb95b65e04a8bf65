//! Semantic versions and the registry tag convention.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ManifestError, ManifestResult};

/// Prefix used for registry tags naming a version (`v1.2.3`).
pub const TAG_PREFIX: &str = "v";

/// A semantic version identifying one migration artifact.
///
/// Ordering follows semver precedence: numeric major/minor/patch, then
/// prerelease comparison (a version without a prerelease is greater than
/// one with, for an equal major.minor.patch triple). Once an artifact
/// naming a version has been pushed, the version is immutable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(semver::Version);

impl Version {
    /// Parse a version from a bare semver string like `1.2.3` or
    /// `1.0.0-beta.1+build.5`.
    pub fn parse(input: &str) -> ManifestResult<Self> {
        semver::Version::parse(input)
            .map(Self)
            .map_err(|e| ManifestError::invalid_version(input, e))
    }

    /// Parse a registry tag of the form `v{semver}`.
    pub fn parse_tag(tag: &str) -> ManifestResult<Self> {
        let bare = tag
            .strip_prefix(TAG_PREFIX)
            .ok_or_else(|| ManifestError::InvalidTag(tag.to_string()))?;
        Self::parse(bare).map_err(|_| ManifestError::InvalidTag(tag.to_string()))
    }

    /// Render this version as a registry tag (`v1.2.3`).
    pub fn tag(&self) -> String {
        format!("{TAG_PREFIX}{}", self.0)
    }

    /// Access the underlying semver version.
    pub fn inner(&self) -> &semver::Version {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Version {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<semver::Version> for Version {
    fn from(v: semver::Version) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let v = Version::parse("1.2.3").unwrap();
        assert_eq!(v.to_string(), "1.2.3");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(Version::parse("not-a-version").is_err());
        assert!(Version::parse("1.2").is_err());
    }

    #[test]
    fn test_ordering() {
        let parse = |s| Version::parse(s).unwrap();
        assert!(parse("1.0.0") < parse("1.0.1"));
        assert!(parse("1.0.1") < parse("1.1.0"));
        assert!(parse("1.1.0") < parse("2.0.0"));
        assert!(parse("1.0.0-beta.1") < parse("1.0.0"));
        assert_eq!(parse("1.0.0"), parse("1.0.0"));
    }

    #[test]
    fn test_tag_round_trip() {
        let v = Version::parse("1.0.0-rc.2").unwrap();
        assert_eq!(v.tag(), "v1.0.0-rc.2");
        assert_eq!(Version::parse_tag(&v.tag()).unwrap(), v);
    }

    #[test]
    fn test_parse_tag_invalid() {
        assert!(Version::parse_tag("1.0.0").is_err());
        assert!(Version::parse_tag("vlatest").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let v = Version::parse("1.2.3").unwrap();
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"1.2.3\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
