//! The security provider contract.
//!
//! Optional collaborator: when configured, the engine signs manifests
//! at package time and verifies signatures before executing an
//! artifact. Signatures are computed over the manifest checksum, which
//! is itself content-addressed over the file set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use drydock_manifest::Manifest;

/// Result type alias for security operations.
pub type SecurityResult<T> = Result<T, SecurityError>;

/// Errors surfaced by a security provider.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// Signing failed.
    #[error("signing failed: {0}")]
    Sign(String),

    /// Verification could not be performed (distinct from an invalid
    /// signature, which is a `false` verify result).
    #[error("verification failed: {0}")]
    Verify(String),

    /// Provenance generation failed.
    #[error("provenance generation failed: {0}")]
    Provenance(String),
}

/// Build information attached to a provenance record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildInfo {
    /// Identity of the builder (CI job, user).
    pub builder: String,
    /// Source reference (repository URL, commit).
    pub source: Option<String>,
    /// Version of the build tool.
    pub tool_version: String,
}

/// A provenance record tying an artifact to its build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    /// Version the record describes.
    pub version: String,
    /// Manifest checksum at build time.
    pub checksum: String,
    /// Build information.
    pub build: BuildInfo,
    /// When the record was generated.
    pub generated_at: DateTime<Utc>,
}

/// Signing and verification capability consumed by the engine.
pub trait SecurityProvider: Send + Sync {
    /// Produce an opaque signature over the given bytes.
    fn sign(&self, data: &[u8]) -> SecurityResult<String>;

    /// Check a signature over the given bytes. `Ok(false)` means the
    /// signature is well-formed but does not match.
    fn verify(&self, data: &[u8], signature: &str) -> SecurityResult<bool>;

    /// Generate a provenance record for a built manifest.
    fn generate_provenance(
        &self,
        manifest: &Manifest,
        build_info: &BuildInfo,
    ) -> SecurityResult<Provenance> {
        Ok(Provenance {
            version: manifest.version.to_string(),
            checksum: manifest.checksum.clone(),
            build: build_info.clone(),
            generated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drydock_manifest::{ManifestBuilder, MigrationKind, Version};

    struct StubProvider;

    impl SecurityProvider for StubProvider {
        fn sign(&self, data: &[u8]) -> SecurityResult<String> {
            Ok(format!("sig-{}", data.len()))
        }

        fn verify(&self, data: &[u8], signature: &str) -> SecurityResult<bool> {
            Ok(signature == format!("sig-{}", data.len()))
        }
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let provider = StubProvider;
        let sig = provider.sign(b"payload").unwrap();
        assert!(provider.verify(b"payload", &sig).unwrap());
        assert!(!provider.verify(b"other payload!", &sig).unwrap());
    }

    #[test]
    fn test_default_provenance() {
        let manifest = ManifestBuilder::new(Version::parse("1.0.0").unwrap())
            .file("custom/a.sql", b"SELECT 1;", MigrationKind::Custom)
            .build();
        let build = BuildInfo {
            builder: "ci".into(),
            source: Some("git@example.com:team/db.git".into()),
            tool_version: "0.3.0".into(),
        };

        let provenance = StubProvider.generate_provenance(&manifest, &build).unwrap();
        assert_eq!(provenance.version, "1.0.0");
        assert_eq!(provenance.checksum, manifest.checksum);
    }
}
