//! # drydock-registry
//!
//! Artifact storage backends for the Drydock migration engine.
//!
//! The [`ArtifactStore`] trait is the storage contract the engine
//! consumes: push, pull, exists, list, delete, and manifest retrieval,
//! keyed by semantic version. Three interchangeable implementations
//! live here:
//!
//! - [`RegistryClient`]: a container-registry v2 (OCI) HTTP client
//!   with tag pagination, bearer-token auth challenges, and
//!   digest-addressed deletion
//! - [`FsStore`]: a plain filesystem directory
//! - [`MemoryStore`]: an in-memory map, for tests and embedding
//!
//! ## Example
//!
//! ```rust,ignore
//! use drydock_registry::{ArtifactStore, RegistryClient};
//!
//! let client = RegistryClient::builder("https://registry.example.com", "team/migrations")
//!     .credentials("ci-bot", "s3cret")
//!     .build()?;
//!
//! let versions = client.list().await?; // sorted ascending
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod fs;
pub mod memory;
pub mod store;

pub use auth::{BearerChallenge, Credentials, TokenCache};
pub use client::{RegistryClient, RegistryClientBuilder};
pub use error::{StorageError, StorageResult};
pub use fs::FsStore;
pub use memory::MemoryStore;
pub use store::{ArtifactStore, PulledArtifact};
