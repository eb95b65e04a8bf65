//! The artifact manifest and its builder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::migration::{MigrationKind, compute_checksum};
use crate::version::Version;

/// Checksum algorithm used for all manifest digests.
pub const CHECKSUM_ALGORITHM: &str = "sha256";

/// Describes one file inside an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Relative path inside the artifact.
    pub path: String,
    /// SHA-256 checksum of the file content.
    pub checksum: String,
    /// Content size in bytes.
    pub size: u64,
    /// Migration kind of the file.
    pub kind: MigrationKind,
}

/// Build-environment fingerprint. Informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    /// Operating system the artifact was built on.
    pub os: String,
    /// CPU architecture.
    pub arch: String,
    /// Runtime/tool version string.
    pub runtime: String,
}

impl Platform {
    /// Capture the current build environment.
    pub fn current(runtime: impl Into<String>) -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            runtime: runtime.into(),
        }
    }
}

/// Metadata record describing one version's artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// The version this manifest describes.
    pub version: Version,
    /// Informational back-reference to the previous version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<Version>,
    /// When the manifest was built.
    pub created: DateTime<Utc>,
    /// Checksum over the sorted (path, file-checksum) pairs.
    pub checksum: String,
    /// Algorithm used for all checksums in this manifest.
    pub checksum_algorithm: String,
    /// Optional signature produced by a security provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// The files contained in the artifact.
    pub files: Vec<FileEntry>,
    /// Versions this one presupposes. Advisory only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Version>,
    /// Build-environment fingerprint.
    pub platform: Platform,
    /// Free-text notes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Author of this version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Version of the tool that built the manifest.
    pub tool_version: String,
}

impl Manifest {
    /// Look up the declared checksum for a file path.
    pub fn file_checksum(&self, path: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|f| f.path == path)
            .map(|f| f.checksum.as_str())
    }

    /// Recompute the overall checksum from the file entries.
    ///
    /// The result depends only on the (path, checksum) pairs sorted by
    /// path, never on the order files were collected in.
    pub fn recompute_checksum(&self) -> String {
        compute_manifest_checksum(&self.files)
    }

    /// Verify the stored overall checksum against the file entries.
    pub fn verify_checksum(&self) -> bool {
        self.recompute_checksum() == self.checksum
    }
}

/// Compute the overall manifest checksum from file entries.
///
/// Hashes the concatenation of `(path, checksum)` pairs sorted by path.
/// Sorting here is a correctness requirement: file collection order is
/// otherwise nondeterministic.
pub fn compute_manifest_checksum(files: &[FileEntry]) -> String {
    let mut pairs: Vec<(&str, &str)> = files
        .iter()
        .map(|f| (f.path.as_str(), f.checksum.as_str()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Sha256::new();
    for (path, checksum) in pairs {
        hasher.update(path.as_bytes());
        hasher.update(checksum.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Builder for [`Manifest`].
///
/// Pure except for the wall-clock `created` timestamp: the same inputs
/// always produce the same checksum.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    version: Version,
    previous_version: Option<Version>,
    notes: Option<String>,
    author: Option<String>,
    tool_version: String,
    dependencies: Vec<Version>,
    files: Vec<FileEntry>,
}

impl ManifestBuilder {
    /// Create a builder for the given version.
    pub fn new(version: Version) -> Self {
        Self {
            version,
            previous_version: None,
            notes: None,
            author: None,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            dependencies: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Set the previous version back-reference.
    pub fn previous_version(mut self, version: Version) -> Self {
        self.previous_version = Some(version);
        self
    }

    /// Set free-text notes.
    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Set the author.
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Set the build-tool version string.
    pub fn tool_version(mut self, version: impl Into<String>) -> Self {
        self.tool_version = version.into();
        self
    }

    /// Add an advisory dependency on another version.
    pub fn dependency(mut self, version: Version) -> Self {
        self.dependencies.push(version);
        self
    }

    /// Add a file, computing its checksum from the raw content.
    pub fn file(mut self, path: impl Into<String>, content: &[u8], kind: MigrationKind) -> Self {
        self.files.push(FileEntry {
            path: path.into(),
            checksum: compute_checksum(content),
            size: content.len() as u64,
            kind,
        });
        self
    }

    /// Build the manifest.
    pub fn build(self) -> Manifest {
        let checksum = compute_manifest_checksum(&self.files);
        Manifest {
            version: self.version,
            previous_version: self.previous_version,
            created: Utc::now(),
            checksum,
            checksum_algorithm: CHECKSUM_ALGORITHM.to_string(),
            signature: None,
            files: self.files,
            dependencies: self.dependencies,
            platform: Platform::current(format!("rust-{}", env!("CARGO_PKG_VERSION"))),
            notes: self.notes,
            author: self.author,
            tool_version: self.tool_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn version(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn build_with_order(paths: &[(&str, &[u8], MigrationKind)]) -> Manifest {
        let mut builder = ManifestBuilder::new(version("1.0.0"));
        for (path, content, kind) in paths {
            builder = builder.file(*path, content, *kind);
        }
        builder.build()
    }

    #[test]
    fn test_checksum_order_independent() {
        let files: [(&str, &[u8], MigrationKind); 3] = [
            ("drizzle/0001.sql", b"CREATE TABLE a();", MigrationKind::Drizzle),
            ("custom/fix.sql", b"ALTER TABLE a;", MigrationKind::Custom),
            ("seed/data.sql", b"INSERT INTO a;", MigrationKind::Seed),
        ];

        let forward = build_with_order(&files);
        let mut reversed = files;
        reversed.reverse();
        let backward = build_with_order(&reversed);

        assert_eq!(forward.checksum, backward.checksum);
    }

    #[test]
    fn test_checksum_changes_with_content() {
        let a = build_with_order(&[("x.sql", b"SELECT 1;", MigrationKind::Custom)]);
        let b = build_with_order(&[("x.sql", b"SELECT 2;", MigrationKind::Custom)]);
        assert_ne!(a.checksum, b.checksum);
    }

    #[test]
    fn test_verify_checksum() {
        let mut manifest = build_with_order(&[("x.sql", b"SELECT 1;", MigrationKind::Custom)]);
        assert!(manifest.verify_checksum());

        manifest.files[0].checksum = "0".repeat(64);
        assert!(!manifest.verify_checksum());
    }

    #[test]
    fn test_file_entry_fields() {
        let manifest =
            build_with_order(&[("drizzle/0001.sql", b"CREATE TABLE t;", MigrationKind::Drizzle)]);
        let entry = &manifest.files[0];
        assert_eq!(entry.size, 15);
        assert_eq!(entry.kind, MigrationKind::Drizzle);
        assert_eq!(entry.checksum.len(), 64);
    }

    #[test]
    fn test_builder_metadata() {
        let manifest = ManifestBuilder::new(version("1.1.0"))
            .previous_version(version("1.0.0"))
            .notes("adds posts table")
            .author("alice")
            .tool_version("9.9.9")
            .dependency(version("1.0.0"))
            .build();

        assert_eq!(manifest.previous_version, Some(version("1.0.0")));
        assert_eq!(manifest.notes.as_deref(), Some("adds posts table"));
        assert_eq!(manifest.author.as_deref(), Some("alice"));
        assert_eq!(manifest.tool_version, "9.9.9");
        assert_eq!(manifest.dependencies, vec![version("1.0.0")]);
        assert!(!manifest.platform.os.is_empty());
    }

    #[test]
    fn test_manifest_serde_round_trip() {
        let manifest = build_with_order(&[("x.sql", b"SELECT 1;", MigrationKind::Custom)]);
        let json = serde_json::to_string(&manifest).unwrap();
        let back: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn test_file_checksum_lookup() {
        let manifest = build_with_order(&[("x.sql", b"SELECT 1;", MigrationKind::Custom)]);
        assert!(manifest.file_checksum("x.sql").is_some());
        assert!(manifest.file_checksum("missing.sql").is_none());
    }
}
