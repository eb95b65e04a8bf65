//! Migration engine implementation.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, info, warn};

use drydock_artifact::{ArchiveFile, ArtifactError, decode, encode};
use drydock_manifest::{
    Manifest, ManifestBuilder, Migration, MigrationKind, Version, sort_migrations,
};
use drydock_registry::ArtifactStore;

use crate::driver::{AppliedVersion, DatabaseDriver, DriverTransaction, VersionRecord};
use crate::error::{MigrateResult, MigrationError};
use crate::security::SecurityProvider;

/// Observability hook fired per migration file. Hooks never affect
/// control flow.
pub type MigrationHook = Arc<dyn Fn(&Migration) + Send + Sync>;

/// Configuration for the migration engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Lock acquisition timeout in milliseconds. `None` blocks until
    /// the driver's own limit.
    pub lock_timeout_ms: Option<u64>,
    /// Whether to stop after printing the ordered plan, without
    /// touching the database.
    pub dry_run: bool,
    /// Whether a failing migration aborts the whole operation
    /// (default true).
    pub stop_on_error: bool,
    /// Maximum migrations in flight within one apply. Defaults to 1:
    /// statement ordering inside one version is normally significant,
    /// so concurrency is opt-in.
    pub concurrency: usize,
    /// Identity recorded in history rows.
    pub applied_by: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: None,
            dry_run: false,
            stop_on_error: true,
            concurrency: 1,
            applied_by: "drydock".to_string(),
        }
    }
}

impl EngineConfig {
    /// Create a default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lock acquisition timeout.
    pub fn lock_timeout_ms(mut self, timeout: u64) -> Self {
        self.lock_timeout_ms = Some(timeout);
        self
    }

    /// Enable dry-run mode.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set whether a failing migration aborts the operation.
    pub fn stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    /// Set the bounded per-file concurrency within one apply.
    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit.max(1);
        self
    }

    /// Set the identity recorded in history rows.
    pub fn applied_by(mut self, who: impl Into<String>) -> Self {
        self.applied_by = who.into();
        self
    }
}

/// A migration that failed while `stop_on_error` was disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFailure {
    /// Path of the failing migration.
    pub path: String,
    /// Driver error message.
    pub message: String,
}

/// Result of an apply operation.
#[derive(Debug)]
pub struct ApplyReport {
    /// The applied version.
    pub version: Version,
    /// Paths executed, in execution order. For a dry run this is the
    /// ordered plan.
    pub executed: Vec<String>,
    /// Failures accumulated when `stop_on_error` is disabled.
    pub failures: Vec<MigrationFailure>,
    /// Total duration in milliseconds.
    pub duration_ms: i64,
    /// Whether this was a dry run.
    pub dry_run: bool,
}

impl ApplyReport {
    /// Whether every migration executed cleanly.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Result of a rollback operation.
#[derive(Debug)]
pub struct RollbackReport {
    /// The version that was rolled back.
    pub version: Version,
    /// Rollback scripts executed, in execution order.
    pub executed: Vec<String>,
    /// Synthetic history record name (`rollback-{version}-{ts}`).
    pub record_name: String,
    /// Total duration in milliseconds.
    pub duration_ms: i64,
}

/// Migration status information.
#[derive(Debug)]
pub struct StatusReport {
    /// Version from the most recent successful apply record.
    pub current: Option<String>,
    /// Full applied-version history.
    pub applied: Vec<AppliedVersion>,
    /// All versions available in storage, sorted ascending.
    pub available: Vec<Version>,
}

/// Result of a non-mutating verification.
#[derive(Debug)]
pub struct VerifyReport {
    /// Whether every check passed.
    pub valid: bool,
    /// Problems found. Content problems never throw; callers decide
    /// whether to proceed despite them.
    pub errors: Vec<String>,
}

/// One input file for packaging.
#[derive(Debug, Clone)]
pub struct PackageInput {
    /// Relative path inside the artifact.
    pub path: String,
    /// Raw file content.
    pub content: Vec<u8>,
    /// Migration kind.
    pub kind: MigrationKind,
}

impl PackageInput {
    /// Create a package input.
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>, kind: MigrationKind) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            kind,
        }
    }
}

/// The migration engine.
///
/// Orchestrates apply/rollback/status/verify over a database driver
/// and an artifact store, with an optional security provider for
/// signing and verification.
pub struct MigrationEngine<D: DatabaseDriver, S: ArtifactStore> {
    driver: D,
    store: S,
    security: Option<Arc<dyn SecurityProvider>>,
    config: EngineConfig,
    before_each: Option<MigrationHook>,
    after_each: Option<MigrationHook>,
}

impl<D: DatabaseDriver, S: ArtifactStore> MigrationEngine<D, S> {
    /// Create an engine.
    pub fn new(driver: D, store: S, config: EngineConfig) -> Self {
        Self {
            driver,
            store,
            security: None,
            config,
            before_each: None,
            after_each: None,
        }
    }

    /// Attach a security provider for signing and verification.
    pub fn with_security(mut self, provider: Arc<dyn SecurityProvider>) -> Self {
        self.security = Some(provider);
        self
    }

    /// Set a hook fired before each migration file.
    pub fn before_each(mut self, hook: MigrationHook) -> Self {
        self.before_each = Some(hook);
        self
    }

    /// Set a hook fired after each migration file.
    pub fn after_each(mut self, hook: MigrationHook) -> Self {
        self.after_each = Some(hook);
        self
    }

    /// The underlying driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Build an artifact and manifest from a file set, signing the
    /// manifest when a security provider is configured.
    pub fn package(
        &self,
        version: &Version,
        files: &[PackageInput],
        previous: Option<Version>,
    ) -> MigrateResult<(Vec<u8>, Manifest)> {
        let mut builder = ManifestBuilder::new(version.clone());
        if let Some(previous) = previous {
            builder = builder.previous_version(previous);
        }
        for file in files {
            builder = builder.file(&file.path, &file.content, file.kind);
        }
        let mut manifest = builder.build();

        if let Some(provider) = &self.security {
            manifest.signature = Some(provider.sign(manifest.checksum.as_bytes())?);
        }

        let archive_files: Vec<ArchiveFile> = files
            .iter()
            .map(|f| ArchiveFile::new(&f.path, f.content.clone()))
            .collect();
        let bytes = encode(&archive_files, &manifest)?;
        info!(%version, files = files.len(), "packaged artifact");
        Ok((bytes, manifest))
    }

    /// Package and push an artifact, refusing to overwrite a version
    /// that has already been successfully applied.
    pub async fn publish(
        &self,
        version: &Version,
        files: &[PackageInput],
        previous: Option<Version>,
    ) -> MigrateResult<String> {
        let applied = self.driver.applied_versions().await?;
        if is_applied(&applied, version) {
            return Err(MigrationError::version_conflict(format!(
                "version {version} has already been applied; refusing to re-push"
            )));
        }
        let (bytes, manifest) = self.package(version, files, previous)?;
        Ok(self.store.push(version, &bytes, &manifest).await?)
    }

    /// Apply a version to the database.
    ///
    /// Runs under a named lock scoped to `apply:{version}`. The lock is
    /// released on every exit path. Re-applying a version whose most
    /// recent attempt succeeded is a version conflict; a prior failed
    /// attempt does not block retry.
    pub async fn apply(&self, version: &Version) -> MigrateResult<ApplyReport> {
        let start = Instant::now();
        let lock_key = format!("apply:{version}");
        let guard = self
            .driver
            .lock(&lock_key, self.config.lock_timeout_ms)
            .await
            .map_err(|e| MigrationError::lock(e.to_string()))?;

        let result = self.apply_locked(version, start).await;
        guard.release();
        result
    }

    async fn apply_locked(&self, version: &Version, start: Instant) -> MigrateResult<ApplyReport> {
        let applied = self.driver.applied_versions().await?;
        if is_applied(&applied, version) {
            return Err(MigrationError::version_conflict(format!(
                "version {version} has already been applied"
            )));
        }

        let pulled = self.store.pull(version).await?;
        let manifest = pulled.manifest;

        // A manifest is known from here on: any failure is recorded as
        // a failed history entry before propagating.
        match self
            .run_apply(version, &manifest, &pulled.artifact, start)
            .await
        {
            Ok(report) => Ok(report),
            Err(err) => {
                self.record_failure(version.to_string(), &manifest, &err, None)
                    .await;
                Err(err)
            }
        }
    }

    async fn run_apply(
        &self,
        version: &Version,
        manifest: &Manifest,
        artifact: &[u8],
        start: Instant,
    ) -> MigrateResult<ApplyReport> {
        self.verify_integrity(manifest)?;
        self.verify_signature(manifest)?;

        let mut migrations = decode(artifact, manifest)?;
        // Rollback scripts ride along in the artifact but never run
        // during a forward apply.
        migrations.retain(|m| m.kind != MigrationKind::Rollback);
        sort_migrations(&mut migrations);

        let plan: Vec<String> = migrations.iter().map(|m| m.path.clone()).collect();

        if self.config.dry_run {
            info!(%version, plan = ?plan, "dry run: stopping before execution");
            return Ok(ApplyReport {
                version: version.clone(),
                executed: plan,
                failures: Vec::new(),
                duration_ms: start.elapsed().as_millis() as i64,
                dry_run: true,
            });
        }

        let tx = self.driver.begin().await?;
        let outcome = self.execute_all(tx.as_ref(), &migrations).await;

        let (executed, failures) = match outcome {
            Ok(pair) => pair,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "transaction rollback failed");
                }
                return Err(err);
            }
        };

        // The history row commits atomically with the schema changes.
        let success = failures.is_empty();
        let record = VersionRecord {
            version: version.to_string(),
            checksum: manifest.checksum.clone(),
            applied_by: self.config.applied_by.clone(),
            success,
            error: summarize_failures(&failures),
            rollback_of: None,
        };
        tx.record_version(&record).await?;
        tx.commit().await?;

        info!(
            %version,
            executed = executed.len(),
            failures = failures.len(),
            "apply complete"
        );
        Ok(ApplyReport {
            version: version.clone(),
            executed,
            failures,
            duration_ms: start.elapsed().as_millis() as i64,
            dry_run: false,
        })
    }

    /// Execute migrations with the configured bounded concurrency,
    /// firing hooks around each file.
    async fn execute_all(
        &self,
        tx: &dyn DriverTransaction,
        migrations: &[Migration],
    ) -> MigrateResult<(Vec<String>, Vec<MigrationFailure>)> {
        let limit = self.config.concurrency.max(1);
        let mut executed = Vec::new();
        let mut failures = Vec::new();

        let mut stream = futures::stream::iter(migrations.iter().map(|migration| async move {
            if let Some(hook) = &self.before_each {
                hook(migration);
            }
            debug!(path = %migration.path, kind = %migration.kind, "executing migration");
            let result = tx.execute(&migration.sql).await;
            if let Some(hook) = &self.after_each {
                hook(migration);
            }
            (migration, result)
        }))
        .buffered(limit);

        while let Some((migration, result)) = stream.next().await {
            match result {
                Ok(()) => executed.push(migration.path.clone()),
                Err(err) if self.config.stop_on_error => {
                    return Err(MigrationError::execution(&migration.path, err.to_string()));
                }
                Err(err) => {
                    warn!(path = %migration.path, error = %err, "migration failed, continuing");
                    failures.push(MigrationFailure {
                        path: migration.path.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }

        Ok((executed, failures))
    }

    /// Roll back a previously applied version.
    ///
    /// Requires a prior successful apply record, pulls the version's
    /// own artifact, and executes only its rollback scripts in reverse
    /// of their forward order. Completion is recorded as a new
    /// synthetic history entry; history is append-only.
    pub async fn rollback(&self, version: &Version) -> MigrateResult<RollbackReport> {
        let start = Instant::now();
        let lock_key = format!("rollback:{version}");
        let guard = self
            .driver
            .lock(&lock_key, self.config.lock_timeout_ms)
            .await
            .map_err(|e| MigrationError::lock(e.to_string()))?;

        let result = self.rollback_locked(version, start).await;
        guard.release();
        result
    }

    async fn rollback_locked(
        &self,
        version: &Version,
        start: Instant,
    ) -> MigrateResult<RollbackReport> {
        let applied = self.driver.applied_versions().await?;
        if !is_applied(&applied, version) {
            return Err(MigrationError::version_conflict(format!(
                "version {version} was never successfully applied"
            )));
        }

        let pulled = self.store.pull(version).await?;
        let manifest = pulled.manifest;

        // A version without rollback scripts cannot be rolled back.
        // Checked against the manifest before anything is recorded, so
        // the attempt leaves no history trace.
        if !manifest
            .files
            .iter()
            .any(|f| f.kind == MigrationKind::Rollback)
        {
            return Err(MigrationError::NoRollbackScripts(version.to_string()));
        }

        let record_name = format!("rollback-{version}-{}", Utc::now().format("%Y%m%d%H%M%S"));

        match self
            .run_rollback(version, &manifest, &pulled.artifact, &record_name, start)
            .await
        {
            Ok(report) => Ok(report),
            Err(err) => {
                self.record_failure(
                    record_name,
                    &manifest,
                    &err,
                    Some(version.to_string()),
                )
                .await;
                Err(err)
            }
        }
    }

    async fn run_rollback(
        &self,
        version: &Version,
        manifest: &Manifest,
        artifact: &[u8],
        record_name: &str,
        start: Instant,
    ) -> MigrateResult<RollbackReport> {
        self.verify_integrity(manifest)?;
        self.verify_signature(manifest)?;

        let mut migrations = decode(artifact, manifest)?;
        migrations.retain(|m| m.kind == MigrationKind::Rollback);
        if migrations.is_empty() {
            return Err(MigrationError::NoRollbackScripts(version.to_string()));
        }

        // Reverse of the forward sort order.
        sort_migrations(&mut migrations);
        migrations.reverse();

        let tx = self.driver.begin().await?;
        let outcome = self.execute_all(tx.as_ref(), &migrations).await;
        let (executed, failures) = match outcome {
            Ok(pair) => pair,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "transaction rollback failed");
                }
                return Err(err);
            }
        };

        let record = VersionRecord {
            version: record_name.to_string(),
            checksum: manifest.checksum.clone(),
            applied_by: self.config.applied_by.clone(),
            success: failures.is_empty(),
            error: summarize_failures(&failures),
            rollback_of: Some(version.to_string()),
        };
        tx.record_version(&record).await?;
        tx.commit().await?;

        info!(%version, executed = executed.len(), "rollback complete");
        Ok(RollbackReport {
            version: version.clone(),
            executed,
            record_name: record_name.to_string(),
            duration_ms: start.elapsed().as_millis() as i64,
        })
    }

    /// Report the current version, full history, and what storage
    /// offers.
    pub async fn status(&self) -> MigrateResult<StatusReport> {
        let applied = self.driver.applied_versions().await?;
        let current = applied
            .iter()
            .filter(|r| r.success && r.rollback_of.is_none())
            .max_by_key(|r| r.applied_at)
            .map(|r| r.version.clone());
        let available = self.store.list().await?;
        Ok(StatusReport {
            current,
            applied,
            available,
        })
    }

    /// Non-mutating dry check of a version: existence, integrity,
    /// signature, and database connectivity. Returns a structured
    /// report instead of throwing so callers can proceed with an
    /// explicit override.
    pub async fn verify(&self, version: &Version) -> VerifyReport {
        let mut errors = Vec::new();

        match self.store.exists(version).await {
            Ok(false) => errors.push(format!("version {version} not found in storage")),
            Err(err) => errors.push(format!("storage probe failed: {err}")),
            Ok(true) => match self.store.pull(version).await {
                Err(err) => errors.push(format!("pull failed: {err}")),
                Ok(pulled) => {
                    if !pulled.manifest.verify_checksum() {
                        errors.push("manifest checksum does not match file entries".to_string());
                    }
                    if let Err(err) = decode(&pulled.artifact, &pulled.manifest) {
                        errors.push(format!("artifact integrity: {err}"));
                    }
                    if let (Some(provider), Some(signature)) =
                        (&self.security, &pulled.manifest.signature)
                    {
                        match provider.verify(pulled.manifest.checksum.as_bytes(), signature) {
                            Ok(true) => {}
                            Ok(false) => {
                                errors.push(format!("invalid signature for version {version}"))
                            }
                            Err(err) => errors.push(format!("signature check failed: {err}")),
                        }
                    }
                }
            },
        }

        if let Err(err) = self.driver.query("SELECT 1").await {
            errors.push(format!("database connectivity: {err}"));
        }

        VerifyReport {
            valid: errors.is_empty(),
            errors,
        }
    }

    fn verify_integrity(&self, manifest: &Manifest) -> MigrateResult<()> {
        if !manifest.verify_checksum() {
            return Err(ArtifactError::Checksum {
                path: "manifest".to_string(),
                expected: manifest.checksum.clone(),
                actual: manifest.recompute_checksum(),
            }
            .into());
        }
        Ok(())
    }

    /// Signature verification runs only when a provider is configured
    /// and the manifest carries a signature.
    fn verify_signature(&self, manifest: &Manifest) -> MigrateResult<()> {
        if let (Some(provider), Some(signature)) = (&self.security, &manifest.signature) {
            let valid = provider.verify(manifest.checksum.as_bytes(), signature)?;
            if !valid {
                return Err(MigrationError::security(format!(
                    "invalid signature for version {}",
                    manifest.version
                )));
            }
        }
        Ok(())
    }

    /// Best-effort failure recording. A failure to write the record is
    /// logged and never masks the original error.
    async fn record_failure(
        &self,
        name: String,
        manifest: &Manifest,
        err: &MigrationError,
        rollback_of: Option<String>,
    ) {
        let record = VersionRecord {
            version: name,
            checksum: manifest.checksum.clone(),
            applied_by: self.config.applied_by.clone(),
            success: false,
            error: Some(err.to_string()),
            rollback_of,
        };
        if let Err(record_err) = self.driver.record_version(&record).await {
            warn!(error = %record_err, "failed to write failure history entry");
        }
    }
}

/// Whether the history shows a successful apply of a version.
fn is_applied(applied: &[AppliedVersion], version: &Version) -> bool {
    let name = version.to_string();
    applied.iter().any(|r| r.version == name && r.success)
}

fn summarize_failures(failures: &[MigrationFailure]) -> Option<String> {
    if failures.is_empty() {
        return None;
    }
    Some(
        failures
            .iter()
            .map(|f| format!("{}: {}", f.path, f.message))
            .collect::<Vec<_>>()
            .join("; "),
    )
}
