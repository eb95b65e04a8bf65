//! In-memory artifact store, for tests and embedding.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use drydock_manifest::{Manifest, Version};

use crate::error::{StorageError, StorageResult};
use crate::store::{ArtifactStore, PulledArtifact};

/// An [`ArtifactStore`] backed by an in-process map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<Version, (Vec<u8>, Manifest)>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored versions.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn push(
        &self,
        version: &Version,
        artifact: &[u8],
        manifest: &Manifest,
    ) -> StorageResult<String> {
        self.entries
            .lock()
            .insert(version.clone(), (artifact.to_vec(), manifest.clone()));
        Ok(format!("memory://{version}"))
    }

    async fn pull(&self, version: &Version) -> StorageResult<PulledArtifact> {
        self.entries
            .lock()
            .get(version)
            .map(|(artifact, manifest)| PulledArtifact {
                artifact: artifact.clone(),
                manifest: manifest.clone(),
            })
            .ok_or_else(|| StorageError::not_found(format!("version {version}")))
    }

    async fn exists(&self, version: &Version) -> StorageResult<bool> {
        Ok(self.entries.lock().contains_key(version))
    }

    async fn list(&self) -> StorageResult<Vec<Version>> {
        // BTreeMap keys iterate in ascending Version order.
        Ok(self.entries.lock().keys().cloned().collect())
    }

    async fn delete(&self, version: &Version) -> StorageResult<()> {
        self.entries.lock().remove(version);
        Ok(())
    }

    async fn get_manifest(&self, version: &Version) -> StorageResult<Manifest> {
        self.entries
            .lock()
            .get(version)
            .map(|(_, manifest)| manifest.clone())
            .ok_or_else(|| StorageError::not_found(format!("version {version}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drydock_manifest::{ManifestBuilder, MigrationKind};

    fn manifest(version: &Version) -> Manifest {
        ManifestBuilder::new(version.clone())
            .file("custom/a.sql", b"SELECT 1;", MigrationKind::Custom)
            .build()
    }

    #[tokio::test]
    async fn test_round_trip_and_list_order() {
        let store = MemoryStore::new();
        for v in ["1.1.0", "1.0.0", "1.0.0-beta.1"] {
            let version = Version::parse(v).unwrap();
            store.push(&version, b"x", &manifest(&version)).await.unwrap();
        }

        let listed = store.list().await.unwrap();
        let strings: Vec<_> = listed.iter().map(|v| v.to_string()).collect();
        assert_eq!(strings, ["1.0.0-beta.1", "1.0.0", "1.1.0"]);

        let version = Version::parse("1.0.0").unwrap();
        assert!(store.exists(&version).await.unwrap());
        store.delete(&version).await.unwrap();
        assert!(!store.exists(&version).await.unwrap());
        // Absent delete is a no-op.
        store.delete(&version).await.unwrap();
    }
}
