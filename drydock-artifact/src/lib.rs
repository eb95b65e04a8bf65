//! # drydock-artifact
//!
//! Archive codec for Drydock migration artifacts.
//!
//! An artifact is a gzip-compressed tar archive containing every
//! migration file listed in its manifest, each at its declared relative
//! path, plus the serialized manifest itself at `manifest.json`.
//!
//! The codec guarantees a byte-identical round trip: decoding an
//! encoded file set reproduces every listed file exactly, and any
//! divergence between archive content and manifest checksums is a
//! fatal decode error naming the offending path.

pub mod codec;
pub mod error;

pub use codec::{ArchiveFile, MANIFEST_PATH, MIGRATION_EXTENSION, decode, encode};
pub use error::{ArtifactError, ArtifactResult};
