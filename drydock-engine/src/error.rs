//! Error types for the migration engine.

use thiserror::Error;

use crate::driver::DatabaseError;
use crate::security::SecurityError;

/// Result type alias for engine operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A migration's SQL failed to execute.
    #[error("migration '{path}' failed: {message}")]
    Execution {
        /// Path of the failing migration.
        path: String,
        /// Driver error message.
        message: String,
    },

    /// Artifact or file content did not match its declared checksum.
    #[error(transparent)]
    Checksum(drydock_artifact::ArtifactError),

    /// Re-apply of an already-successful version, or rollback of a
    /// never-applied version.
    #[error("version conflict: {0}")]
    VersionConflict(String),

    /// Lock acquisition timed out or was denied.
    #[error("failed to acquire migration lock: {0}")]
    Lock(String),

    /// Signature verification failed or could not be performed.
    #[error("security error: {0}")]
    Security(String),

    /// Storage or registry failure.
    #[error(transparent)]
    Storage(#[from] drydock_registry::StorageError),

    /// Driver-level database failure.
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// The artifact contains no rollback scripts.
    #[error("version {0} has no rollback migrations")]
    NoRollbackScripts(String),

    /// Manifest construction or validation failure.
    #[error(transparent)]
    Manifest(#[from] drydock_manifest::ManifestError),

    /// Artifact encode/decode failure other than a checksum mismatch.
    #[error(transparent)]
    Artifact(drydock_artifact::ArtifactError),
}

impl MigrationError {
    /// Create an execution error for a migration path.
    pub fn execution(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a version-conflict error.
    pub fn version_conflict(msg: impl Into<String>) -> Self {
        Self::VersionConflict(msg.into())
    }

    /// Create a lock error.
    pub fn lock(msg: impl Into<String>) -> Self {
        Self::Lock(msg.into())
    }

    /// Create a security error.
    pub fn security(msg: impl Into<String>) -> Self {
        Self::Security(msg.into())
    }
}

impl From<drydock_artifact::ArtifactError> for MigrationError {
    fn from(err: drydock_artifact::ArtifactError) -> Self {
        match err {
            drydock_artifact::ArtifactError::Checksum { .. } => Self::Checksum(err),
            other => Self::Artifact(other),
        }
    }
}

impl From<SecurityError> for MigrationError {
    fn from(err: SecurityError) -> Self {
        Self::Security(err.to_string())
    }
}
