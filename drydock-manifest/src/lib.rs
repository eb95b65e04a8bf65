//! # drydock-manifest
//!
//! Core data model for the Drydock migration engine:
//!
//! - Semantic versions and the `v{semver}` registry tag convention
//! - Migration files and their execution-priority kinds
//! - The artifact manifest: a deterministic, checksum-backed description
//!   of one version's migration file set
//!
//! The manifest checksum is reproducible purely from the file set: two
//! manifests built from the same paths and contents always hash
//! identically, regardless of the order the files were collected in.
//!
//! ## Example
//!
//! ```rust
//! use drydock_manifest::{ManifestBuilder, MigrationKind, Version};
//!
//! let version = Version::parse("1.0.0").unwrap();
//! let manifest = ManifestBuilder::new(version)
//!     .author("alice")
//!     .file("drizzle/0001_init.sql", b"CREATE TABLE t(id int);", MigrationKind::Drizzle)
//!     .build();
//!
//! assert_eq!(manifest.files.len(), 1);
//! assert_eq!(manifest.checksum_algorithm, "sha256");
//! ```

pub mod error;
pub mod manifest;
pub mod migration;
pub mod version;

pub use error::{ManifestError, ManifestResult};
pub use manifest::{FileEntry, Manifest, ManifestBuilder, Platform};
pub use migration::{Migration, MigrationKind, sort_migrations};
pub use version::Version;
