//! # Drydock
//!
//! Versioned, checksummed database migration artifacts with OCI
//! registry distribution.
//!
//! Drydock provides:
//! - Deterministic, content-addressed manifests over a migration file
//!   set, versioned with semver
//! - A reproducible tar+gzip artifact codec with per-file checksum
//!   verification on extraction
//! - Artifact storage backends: an OCI Distribution v2 registry
//!   client, a filesystem store, and an in-memory store
//! - A migration engine with named locking, idempotency, fixed
//!   execution ordering, transactional apply, rollback, and
//!   append-only history
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use drydock::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), drydock::engine::MigrationError> {
//!     let store = RegistryClient::builder("https://registry.example.com", "team/app-db")
//!         .credentials("ci", "s3cret")
//!         .build()?;
//!     let engine = MigrationEngine::new(driver, store, EngineConfig::new());
//!
//!     let version: Version = "1.4.0".parse()?;
//!     let report = engine.apply(&version).await?;
//!     println!("applied {} migrations", report.executed.len());
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Manifest construction, versioning, and checksums.
pub mod manifest {
    pub use drydock_manifest::*;
}

/// Artifact encoding and verified extraction.
pub mod artifact {
    pub use drydock_artifact::*;
}

/// Artifact storage backends and the OCI registry client.
pub mod registry {
    pub use drydock_registry::*;
}

/// The migration engine and its driver/security contracts.
pub mod engine {
    pub use drydock_engine::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::artifact::{decode, encode, ArchiveFile};
    pub use crate::engine::{
        DatabaseDriver, EngineConfig, MigrationEngine, PackageInput, SecurityProvider,
    };
    pub use crate::manifest::{Manifest, ManifestBuilder, MigrationKind, Version};
    pub use crate::registry::{ArtifactStore, FsStore, MemoryStore, RegistryClient};
}

// Re-export key types at the crate root
pub use drydock_engine::{EngineConfig, MigrationEngine};
pub use drydock_manifest::{Manifest, Version};
pub use drydock_registry::{ArtifactStore, RegistryClient};
