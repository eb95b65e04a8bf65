//! Migration types and execution ordering.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The kind of a migration file, determining its execution priority.
///
/// Within one version, generated baseline migrations must run before
/// hand-written SQL, which must run before data seeding. Rollback
/// scripts are never executed during a forward apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationKind {
    /// Generated baseline schema migrations.
    Drizzle,
    /// Hand-written migrations.
    Custom,
    /// Data seeding scripts.
    Seed,
    /// Reverse-migration scripts, used only by rollback.
    Rollback,
}

impl MigrationKind {
    /// Execution priority within a version. Lower runs first.
    pub fn priority(self) -> u8 {
        match self {
            Self::Drizzle => 0,
            Self::Custom => 1,
            Self::Seed => 2,
            Self::Rollback => 3,
        }
    }

    /// All kinds, in execution-priority order.
    pub fn all() -> [Self; 4] {
        [Self::Drizzle, Self::Custom, Self::Seed, Self::Rollback]
    }
}

impl std::fmt::Display for MigrationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Drizzle => "drizzle",
            Self::Custom => "custom",
            Self::Seed => "seed",
            Self::Rollback => "rollback",
        };
        f.write_str(name)
    }
}

/// A single migration extracted from an artifact.
///
/// Migrations are ephemeral: they exist in memory for the duration of
/// one apply or rollback call and are reconstructed from the artifact
/// each time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    /// Relative path of the migration file inside the artifact.
    pub path: String,
    /// The SQL text.
    pub sql: String,
    /// Migration kind.
    pub kind: MigrationKind,
    /// SHA-256 checksum of the SQL content.
    pub checksum: String,
}

impl Migration {
    /// Create a new migration, computing its checksum from the SQL.
    pub fn new(path: impl Into<String>, sql: impl Into<String>, kind: MigrationKind) -> Self {
        let sql = sql.into();
        let checksum = compute_checksum(sql.as_bytes());
        Self {
            path: path.into(),
            sql,
            kind,
            checksum,
        }
    }

    /// Verify the checksum matches the SQL content.
    pub fn verify_checksum(&self) -> bool {
        compute_checksum(self.sql.as_bytes()) == self.checksum
    }
}

/// Sort migrations into execution order: by kind priority, then
/// lexically by path within equal priority.
pub fn sort_migrations(migrations: &mut [Migration]) {
    migrations.sort_by(|a, b| {
        a.kind
            .priority()
            .cmp(&b.kind.priority())
            .then_with(|| a.path.cmp(&b.path))
    });
}

/// Compute a hex-encoded SHA-256 checksum of raw content.
pub fn compute_checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
