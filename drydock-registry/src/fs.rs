//! Filesystem-backed artifact store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use drydock_manifest::{Manifest, Version};

use crate::error::{StorageError, StorageResult};
use crate::store::{ArtifactStore, PulledArtifact};

/// Filename of the artifact blob inside a version directory.
const ARTIFACT_FILE: &str = "artifact.tar.gz";

/// Filename of the manifest record inside a version directory.
const MANIFEST_FILE: &str = "manifest.json";

/// An [`ArtifactStore`] backed by a plain directory.
///
/// Layout: `{root}/{version}/artifact.tar.gz` plus
/// `{root}/{version}/manifest.json`. Interchangeable with the registry
/// client.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create a store rooted at the given directory. The directory is
    /// created lazily on first push.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn version_dir(&self, version: &Version) -> PathBuf {
        self.root.join(version.to_string())
    }
}

#[async_trait]
impl ArtifactStore for FsStore {
    async fn push(
        &self,
        version: &Version,
        artifact: &[u8],
        manifest: &Manifest,
    ) -> StorageResult<String> {
        let dir = self.version_dir(version);
        tokio::fs::create_dir_all(&dir).await?;

        tokio::fs::write(dir.join(ARTIFACT_FILE), artifact).await?;
        let manifest_json = serde_json::to_vec_pretty(manifest)?;
        tokio::fs::write(dir.join(MANIFEST_FILE), manifest_json).await?;

        info!(%version, dir = %dir.display(), "artifact stored");
        Ok(dir.display().to_string())
    }

    async fn pull(&self, version: &Version) -> StorageResult<PulledArtifact> {
        let dir = self.version_dir(version);
        let artifact = tokio::fs::read(dir.join(ARTIFACT_FILE))
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    StorageError::not_found(format!("version {version}"))
                }
                _ => StorageError::Io(e),
            })?;
        let manifest_json = tokio::fs::read(dir.join(MANIFEST_FILE)).await?;
        let manifest: Manifest = serde_json::from_slice(&manifest_json)?;
        Ok(PulledArtifact { artifact, manifest })
    }

    async fn exists(&self, version: &Version) -> StorageResult<bool> {
        Ok(tokio::fs::try_exists(self.version_dir(version).join(ARTIFACT_FILE)).await?)
    }

    async fn list(&self) -> StorageResult<Vec<Version>> {
        if !tokio::fs::try_exists(&self.root).await? {
            return Ok(Vec::new());
        }

        let mut versions = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Ok(version) = Version::parse(name) {
                versions.push(version);
            }
        }

        versions.sort();
        debug!(count = versions.len(), "listed versions");
        Ok(versions)
    }

    async fn delete(&self, version: &Version) -> StorageResult<()> {
        let dir = self.version_dir(version);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(%version, "artifact deleted");
                Ok(())
            }
            // Deleting an absent version is not an error.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn get_manifest(&self, version: &Version) -> StorageResult<Manifest> {
        let path = self.version_dir(version).join(MANIFEST_FILE);
        let manifest_json = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::not_found(format!("version {version}")),
            _ => StorageError::Io(e),
        })?;
        Ok(serde_json::from_slice(&manifest_json)?)
    }
}
