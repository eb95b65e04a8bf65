//! Error types for manifest construction and validation.

use thiserror::Error;

/// Result type alias for manifest operations.
pub type ManifestResult<T> = Result<T, ManifestError>;

/// Errors that can occur while building or validating manifests.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// A version string did not parse as a semantic version.
    #[error("invalid version '{input}': {source}")]
    InvalidVersion {
        /// The offending input string.
        input: String,
        /// The underlying parse error.
        source: semver::Error,
    },

    /// A registry tag did not follow the `v{semver}` convention.
    #[error("invalid version tag '{0}': expected v{{major}}.{{minor}}.{{patch}}")]
    InvalidTag(String),

    /// Manifest serialization failed.
    #[error("manifest serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ManifestError {
    /// Create an invalid-version error.
    pub fn invalid_version(input: impl Into<String>, source: semver::Error) -> Self {
        Self::InvalidVersion {
            input: input.into(),
            source,
        }
    }
}
