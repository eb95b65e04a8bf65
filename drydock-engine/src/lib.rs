//! # drydock-engine
//!
//! The migration engine: applies versioned, checksummed migration
//! artifacts to a database under a named mutual-exclusion lock, with
//! idempotency checks, integrity and signature verification, fixed
//! migration ordering, transactional execution, and append-only
//! failure recording. Rollback, status, and non-mutating verification
//! ride on the same machinery.
//!
//! The engine depends only on contracts: [`DatabaseDriver`] for the
//! database, [`ArtifactStore`](drydock_registry::ArtifactStore) for
//! artifact storage, and the optional [`SecurityProvider`] for
//! signing. Concrete drivers and stores are supplied by the caller.
//!
//! ## Example
//!
//! ```rust,ignore
//! use drydock_engine::{EngineConfig, MigrationEngine};
//! use drydock_registry::FsStore;
//!
//! let engine = MigrationEngine::new(driver, FsStore::new("./artifacts"), EngineConfig::new());
//! let report = engine.apply(&"1.0.0".parse()?).await?;
//! println!("applied {} migrations", report.executed.len());
//! ```

pub mod driver;
pub mod engine;
pub mod error;
pub mod security;

pub use driver::{
    AppliedVersion, DatabaseDriver, DatabaseError, DriverResult, DriverTransaction, LockGuard,
    Row, VersionRecord,
};
pub use engine::{
    ApplyReport, EngineConfig, MigrationEngine, MigrationFailure, MigrationHook, PackageInput,
    RollbackReport, StatusReport, VerifyReport,
};
pub use error::{MigrateResult, MigrationError};
pub use security::{BuildInfo, Provenance, SecurityError, SecurityProvider, SecurityResult};
