//! The database driver contract.
//!
//! The engine is the sole consumer of this contract; concrete drivers
//! (PostgreSQL, MySQL, ...) implement it outside this crate. The
//! contract assumes the driver provides real transactional semantics:
//! on engines without transactional DDL, a mid-transaction failure can
//! leave partial schema changes even though the history record is
//! correctly rolled back. Driver implementers must document their
//! engine's actual behavior.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single result row, as a column-name to JSON-value map.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Result type alias for driver operations.
pub type DriverResult<T> = Result<T, DatabaseError>;

/// Errors surfaced by a database driver.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// SQL execution failed.
    #[error("sql error: {0}")]
    Sql(String),

    /// Connection failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// Lock acquisition timed out or was denied.
    #[error("lock error: {0}")]
    Lock(String),

    /// Transaction begin/commit/rollback failure.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Any other driver failure.
    #[error("database error: {0}")]
    Other(String),
}

impl DatabaseError {
    /// Create a SQL error.
    pub fn sql(msg: impl Into<String>) -> Self {
        Self::Sql(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a lock error.
    pub fn lock(msg: impl Into<String>) -> Self {
        Self::Lock(msg.into())
    }
}

/// One applied-version history row: one row per apply attempt,
/// successful or failed, plus one per rollback attempt.
///
/// A version counts as currently applied only when the most recent
/// record naming it has `success = true`; a failed attempt never
/// blocks a retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedVersion {
    /// Version string, or a synthetic `rollback-{version}-{ts}` name.
    pub version: String,
    /// When the attempt finished.
    pub applied_at: DateTime<Utc>,
    /// Identity that ran the attempt.
    pub applied_by: String,
    /// Manifest checksum of the artifact.
    pub checksum: String,
    /// Whether the attempt succeeded.
    pub success: bool,
    /// Error message for failed attempts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// For rollback rows, the version that was rolled back.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_of: Option<String>,
}

/// Input for writing a new history row.
#[derive(Debug, Clone)]
pub struct VersionRecord {
    /// Version string or synthetic rollback name.
    pub version: String,
    /// Manifest checksum.
    pub checksum: String,
    /// Identity running the operation.
    pub applied_by: String,
    /// Whether the attempt succeeded.
    pub success: bool,
    /// Error message for failed attempts.
    pub error: Option<String>,
    /// For rollback rows, the version rolled back.
    pub rollback_of: Option<String>,
}

/// Guard for a named mutual-exclusion lock.
///
/// The release closure runs exactly once: either explicitly via
/// [`LockGuard::release`] or on drop, so the lock is freed on every
/// exit path including panics and early errors.
pub struct LockGuard {
    key: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    /// Create a guard from a release closure.
    pub fn new(key: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            key: key.into(),
            release: Some(Box::new(release)),
        }
    }

    /// The lock key this guard holds.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock now.
    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}

/// An open database transaction.
///
/// `execute` takes `&self` so a driver may permit bounded-concurrency
/// execution inside one transaction; drivers that cannot should
/// serialize internally.
#[async_trait]
pub trait DriverTransaction: Send + Sync {
    /// Execute a SQL statement inside the transaction.
    async fn execute(&self, sql: &str) -> DriverResult<()>;

    /// Run a query inside the transaction.
    async fn query(&self, sql: &str) -> DriverResult<Vec<Row>>;

    /// Write a history row inside the transaction.
    async fn record_version(&self, record: &VersionRecord) -> DriverResult<()>;

    /// Commit the transaction. The commit is the atomicity boundary.
    async fn commit(self: Box<Self>) -> DriverResult<()>;

    /// Abort the transaction.
    async fn rollback(self: Box<Self>) -> DriverResult<()>;
}

/// Contract between the engine and a concrete database.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Open the connection.
    async fn connect(&self) -> DriverResult<()>;

    /// Close the connection.
    async fn disconnect(&self) -> DriverResult<()>;

    /// Execute a SQL statement outside any transaction.
    async fn execute(&self, sql: &str) -> DriverResult<()>;

    /// Run a query outside any transaction.
    async fn query(&self, sql: &str) -> DriverResult<Vec<Row>>;

    /// Begin a transaction.
    async fn begin(&self) -> DriverResult<Box<dyn DriverTransaction>>;

    /// Read the full applied-version history.
    async fn applied_versions(&self) -> DriverResult<Vec<AppliedVersion>>;

    /// Write a history row outside any transaction. Used for recording
    /// failures after a transaction has been aborted.
    async fn record_version(&self, record: &VersionRecord) -> DriverResult<()>;

    /// Acquire a named mutual-exclusion lock, waiting at most
    /// `timeout_ms` when given.
    async fn lock(&self, key: &str, timeout_ms: Option<u64>) -> DriverResult<LockGuard>;
}
