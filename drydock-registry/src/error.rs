//! Error types for artifact storage backends.

use thiserror::Error;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage or registry operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested version or reference does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The registry refuses the requested verb (e.g. HTTP 405 on delete).
    #[error("operation not supported by registry: {0}")]
    Unsupported(String),

    /// The caller lacks permission for the operation (HTTP 403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Authentication failed after the bearer-token exchange.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Connection failure or request timeout.
    #[error("transport error: {0}")]
    Transport(String),

    /// Any other non-success registry response.
    #[error("registry error (HTTP {status}): {body}")]
    Registry {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnosis.
        body: String,
    },

    /// A deletion could not be confirmed: the tag still resolves.
    #[error("delete verification failed: {0}")]
    DeleteVerification(String),

    /// A pulled blob's content did not match its declared digest.
    #[error("digest mismatch for {reference}: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Tag or digest that was pulled.
        reference: String,
        /// Digest declared by the registry.
        expected: String,
        /// Digest recomputed from the content.
        actual: String,
    },

    /// Filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest or wire-format (de)serialization error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A malformed URL or reference.
    #[error("invalid reference: {0}")]
    InvalidReference(String),
}

impl StorageError {
    /// Create a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create an auth error.
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// Classify a reqwest failure: connection errors and timeouts are
    /// transport errors, everything else is surfaced verbatim.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Transport(err.to_string())
        } else {
            Self::Transport(format!("request failed: {err}"))
        }
    }

    /// Check whether this error means the target was absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
