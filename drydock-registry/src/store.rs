//! The artifact storage contract.

use async_trait::async_trait;

use drydock_manifest::{Manifest, Version};

use crate::error::StorageResult;

/// An artifact blob together with its manifest, as returned by a pull.
#[derive(Debug, Clone)]
pub struct PulledArtifact {
    /// The raw archive bytes.
    pub artifact: Vec<u8>,
    /// The manifest describing the archive.
    pub manifest: Manifest,
}

/// Storage capability the migration engine depends on.
///
/// Implementations must be interchangeable: a registry, a filesystem
/// directory, and an in-memory map all satisfy the same contract.
/// Artifacts are immutable once pushed; `list` always returns versions
/// sorted ascending.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Upload an artifact tagged by version. Returns a location string.
    ///
    /// The transport allows overwriting an existing tag; refusing to
    /// re-push an already applied version is the engine's job.
    async fn push(
        &self,
        version: &Version,
        artifact: &[u8],
        manifest: &Manifest,
    ) -> StorageResult<String>;

    /// Download the artifact and manifest for a version.
    async fn pull(&self, version: &Version) -> StorageResult<PulledArtifact>;

    /// Cheap existence probe. Never errors for "not found", only for
    /// transport failure.
    async fn exists(&self, version: &Version) -> StorageResult<bool>;

    /// Enumerate all stored versions, sorted ascending.
    ///
    /// A repository that does not exist yet is an empty list, not an
    /// error.
    async fn list(&self) -> StorageResult<Vec<Version>>;

    /// Delete a version's artifact and manifest record.
    ///
    /// Deleting an absent version is not an error.
    async fn delete(&self, version: &Version) -> StorageResult<()>;

    /// Fetch only the manifest for a version.
    async fn get_manifest(&self, version: &Version) -> StorageResult<Manifest>;
}
