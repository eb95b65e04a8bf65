//! Error types for artifact encoding and decoding.

use thiserror::Error;

/// Result type alias for artifact operations.
pub type ArtifactResult<T> = Result<T, ArtifactError>;

/// Errors that can occur while encoding or decoding artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Archive I/O error.
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest serialization error.
    #[error("manifest serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A file's content does not match the manifest's declared checksum.
    #[error("checksum mismatch for '{path}': expected {expected}, got {actual}")]
    Checksum {
        /// Path of the offending file.
        path: String,
        /// Checksum declared in the manifest.
        expected: String,
        /// Checksum recomputed from the archive content.
        actual: String,
    },

    /// A manifest-listed file was missing from the archive.
    #[error("Failed to extract migrations: {0}")]
    Extraction(String),

    /// A migration file was not valid UTF-8.
    #[error("migration '{path}' is not valid UTF-8")]
    Utf8 {
        /// Path of the offending file.
        path: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_error_names_both_sums() {
        let err = ArtifactError::Checksum {
            path: "custom/a.sql".into(),
            expected: "aaa".into(),
            actual: "bbb".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("custom/a.sql"));
        assert!(msg.contains("aaa"));
        assert!(msg.contains("bbb"));
    }
}
