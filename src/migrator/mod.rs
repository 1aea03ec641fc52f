//! Versioned migration runner for a single database.

pub mod lock;
pub mod multi;

use crate::constants::{DEFAULT_LOCK_TABLE, DEFAULT_MIGRATIONS_TABLE};
use crate::db::Database;
use crate::error::{MigrateError, Result, format_detailed};
use crate::migration::Migration;
use crate::migration_tracking::{Ledger, LedgerRecord};
use crate::oracle::{ExistenceOracle, InformationSchemaOracle};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub use lock::MigrationLock;
pub use multi::{MultiDatabaseReport, MultiMigrator};

#[derive(Debug, Clone)]
pub struct MigratorConfig {
    pub migrations_table: String,
    pub lock_table: String,
    pub dry_run: bool,
    /// Take over a lock older than this; `None` never takes over.
    pub stale_lock_timeout: Option<Duration>,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            migrations_table: DEFAULT_MIGRATIONS_TABLE.to_string(),
            lock_table: DEFAULT_LOCK_TABLE.to_string(),
            dry_run: false,
            stale_lock_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

/// Outcome of one `up`/`down` run against one database.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub database: String,
    pub direction: Direction,
    /// Versions applied (up) or reverted (down), in execution order.
    /// In a dry run, the versions that would run.
    pub versions: Vec<String>,
    /// Up: versions already applied. Down: ledger versions with no registered unit.
    pub skipped: Vec<String>,
    pub dry_run: bool,
    pub duration: Duration,
}

impl RunReport {
    fn new(database: &str, direction: Direction, dry_run: bool) -> Self {
        Self {
            database: database.to_string(),
            direction,
            versions: Vec::new(),
            skipped: Vec::new(),
            dry_run,
            duration: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationStatus {
    pub version: String,
    pub description: String,
    pub applied: bool,
    pub applied_at: Option<NaiveDateTime>,
    /// Ledger outcome; `None` when the version has no ledger row.
    pub success: Option<bool>,
    pub error_msg: Option<String>,
    /// Whether a unit with this version is registered.
    pub registered: bool,
}

pub struct Migrator {
    config: MigratorConfig,
    ledger: Ledger,
    lock: MigrationLock,
    oracle: Arc<dyn ExistenceOracle>,
    migrations: Vec<Arc<dyn Migration>>,
}

impl Migrator {
    pub fn new(config: MigratorConfig) -> Result<Self> {
        let ledger = Ledger::new(&config.migrations_table)?;
        let lock = MigrationLock::new(&config.lock_table, config.stale_lock_timeout)?;
        Ok(Self {
            config,
            ledger,
            lock,
            oracle: Arc::new(InformationSchemaOracle::new()),
            migrations: Vec::new(),
        })
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn ExistenceOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn with_lock_owner(mut self, owner: impl Into<String>) -> Self {
        self.lock = self.lock.with_owner(owner);
        self
    }

    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    pub fn register(&mut self, migration: Arc<dyn Migration>) {
        self.migrations.push(migration);
        self.migrations
            .sort_by(|a, b| a.version().cmp(b.version()));
    }

    pub fn register_all(&mut self, migrations: impl IntoIterator<Item = Arc<dyn Migration>>) {
        for migration in migrations {
            self.register(migration);
        }
    }

    /// Registered units, sorted by version.
    pub fn migrations(&self) -> &[Arc<dyn Migration>] {
        &self.migrations
    }

    fn check_unique_versions(&self) -> Result<()> {
        for pair in self.migrations.windows(2) {
            if pair[0].version() == pair[1].version() {
                return Err(MigrateError::validation(format!(
                    "migration version {} is registered twice ({} / {})",
                    pair[0].version(),
                    pair[0].description(),
                    pair[1].description()
                )));
            }
        }
        Ok(())
    }

    /// Create the ledger and lock tables and seed the lock row. Idempotent.
    pub async fn init(&self, db: &mut dyn Database) -> Result<()> {
        let database = db.name().to_string();

        if self
            .oracle
            .table_exists(db.executor(), self.ledger.table())
            .await?
        {
            debug!("Ledger table {} already exists on {}", self.ledger.table(), database);
        } else {
            db.executor()
                .execute(&self.ledger.create_table_sql(), &[])
                .await
                .map_err(|e| MigrateError::execution(&database, "ledger table", e))?;
            info!("Created ledger table {} on {}", self.ledger.table(), database);
        }

        if self
            .oracle
            .table_exists(db.executor(), self.lock.table())
            .await?
        {
            debug!("Lock table {} already exists on {}", self.lock.table(), database);
        } else {
            db.executor()
                .execute(&self.lock.create_table_sql(), &[])
                .await
                .map_err(|e| MigrateError::execution(&database, "lock table", e))?;
            info!("Created lock table {} on {}", self.lock.table(), database);
        }

        if self.lock.seed(db.executor()).await? {
            debug!("Seeded lock row on {}", database);
        }
        Ok(())
    }

    async fn ledger_exists(&self, db: &mut dyn Database) -> Result<bool> {
        self.oracle
            .table_exists(db.executor(), self.ledger.table())
            .await
    }

    /// Apply every pending unit in version order.
    pub async fn up(&self, db: &mut dyn Database) -> Result<RunReport> {
        self.check_unique_versions()?;
        let started = Instant::now();

        if self.config.dry_run {
            let mut report = self.plan_up(db).await?;
            report.duration = started.elapsed();
            return Ok(report);
        }

        self.init(db).await?;
        let database = db.name().to_string();
        self.lock.acquire(db.executor(), &database).await?;
        let outcome = self.apply_pending(db).await;
        let released = self.lock.release(db.executor()).await;

        let mut report = finish_locked(outcome, released)?;
        report.duration = started.elapsed();
        if report.versions.is_empty() {
            info!("{}: no pending migrations", report.database);
        } else {
            info!(
                "{}: applied {} migration(s) in {:?}",
                report.database,
                report.versions.len(),
                report.duration
            );
        }
        Ok(report)
    }

    async fn plan_up(&self, db: &mut dyn Database) -> Result<RunReport> {
        let mut report = RunReport::new(db.name(), Direction::Up, true);
        let applied = if self.ledger_exists(db).await? {
            self.ledger.applied_versions(db.executor()).await?
        } else {
            Default::default()
        };
        for migration in &self.migrations {
            if applied.contains(migration.version()) {
                report.skipped.push(migration.version().to_string());
            } else {
                info!(
                    "[dry run] would apply {} - {} on {}",
                    migration.version(),
                    migration.description(),
                    report.database
                );
                report.versions.push(migration.version().to_string());
            }
        }
        Ok(report)
    }

    async fn apply_pending(&self, db: &mut dyn Database) -> Result<RunReport> {
        let database = db.name().to_string();
        let mut report = RunReport::new(&database, Direction::Up, false);
        let applied = self.ledger.applied_versions(db.executor()).await?;
        debug!(
            "{}: {} registered, {} applied",
            database,
            self.migrations.len(),
            applied.len()
        );

        for migration in &self.migrations {
            let version = migration.version();
            if applied.contains(version) {
                debug!("Skipping applied migration {} on {}", version, database);
                report.skipped.push(version.to_string());
                continue;
            }

            info!(
                "Applying {} - {} on {}",
                version,
                migration.description(),
                database
            );
            let mut tx = db.begin().await?;
            let outcome = migration.up(tx.executor()).await;
            let result = match outcome {
                Ok(()) => {
                    self.ledger
                        .record(tx.executor(), version, migration.description(), true, None)
                        .await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => tx.commit().await?,
                Err(e) => {
                    if let Err(rollback_error) = tx.rollback().await {
                        warn!("Rollback of {} on {} failed: {}", version, database, rollback_error);
                    }
                    let message = format_detailed(&e);
                    if let Err(record_error) = self
                        .ledger
                        .record(
                            db.executor(),
                            version,
                            migration.description(),
                            false,
                            Some(message),
                        )
                        .await
                    {
                        warn!(
                            "Could not record failure of {} on {}: {}",
                            version, database, record_error
                        );
                    }
                    return Err(MigrateError::MigrationFailed {
                        database,
                        version: version.to_string(),
                        source: Box::new(e),
                    });
                }
            }
            report.versions.push(version.to_string());
        }
        Ok(report)
    }

    /// Revert the `steps` most recently applied units.
    pub async fn down(&self, db: &mut dyn Database, steps: usize) -> Result<RunReport> {
        if steps == 0 {
            return Err(MigrateError::validation(
                "rollback steps must be greater than 0",
            ));
        }
        let started = Instant::now();

        if self.config.dry_run {
            let mut report = RunReport::new(db.name(), Direction::Down, true);
            if self.ledger_exists(db).await? {
                let records = self.ledger.applied_for_revert(db.executor()).await?;
                let by_version = self.by_version();
                for record in records.into_iter().take(steps) {
                    if by_version.contains_key(record.version.as_str()) {
                        info!("[dry run] would revert {} on {}", record.version, report.database);
                        report.versions.push(record.version);
                    } else {
                        report.skipped.push(record.version);
                    }
                }
            }
            report.duration = started.elapsed();
            return Ok(report);
        }

        self.init(db).await?;
        let database = db.name().to_string();
        self.lock.acquire(db.executor(), &database).await?;
        let outcome = self.revert(db, steps).await;
        let released = self.lock.release(db.executor()).await;

        let mut report = finish_locked(outcome, released)?;
        report.duration = started.elapsed();
        info!(
            "{}: reverted {} migration(s)",
            report.database,
            report.versions.len()
        );
        Ok(report)
    }

    fn by_version(&self) -> HashMap<&str, &Arc<dyn Migration>> {
        self.migrations
            .iter()
            .map(|m| (m.version(), m))
            .collect()
    }

    async fn revert(&self, db: &mut dyn Database, steps: usize) -> Result<RunReport> {
        let database = db.name().to_string();
        let mut report = RunReport::new(&database, Direction::Down, false);
        let records = self.ledger.applied_for_revert(db.executor()).await?;
        if records.is_empty() {
            info!("{}: nothing to revert", database);
            return Ok(report);
        }

        let by_version = self.by_version();
        for record in records.into_iter().take(steps) {
            let Some(migration) = by_version.get(record.version.as_str()) else {
                warn!(
                    "No registered migration for applied version {} on {}, skipping",
                    record.version, database
                );
                report.skipped.push(record.version);
                continue;
            };

            info!(
                "Reverting {} - {} on {}",
                record.version,
                migration.description(),
                database
            );
            let mut tx = db.begin().await?;
            let outcome = migration.down(tx.executor()).await;
            let result = match outcome {
                Ok(()) => self.ledger.remove(tx.executor(), &record.version).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => tx.commit().await?,
                Err(e) => {
                    if let Err(rollback_error) = tx.rollback().await {
                        warn!(
                            "Rollback of {} on {} failed: {}",
                            record.version, database, rollback_error
                        );
                    }
                    return Err(MigrateError::MigrationFailed {
                        database,
                        version: record.version,
                        source: Box::new(e),
                    });
                }
            }
            report.versions.push(record.version);
        }
        Ok(report)
    }

    /// Every registered unit and every ledger row, by version.
    pub async fn status(&self, db: &mut dyn Database) -> Result<Vec<MigrationStatus>> {
        let records: Vec<LedgerRecord> = if self.ledger_exists(db).await? {
            self.ledger.all_records(db.executor()).await?
        } else {
            Vec::new()
        };
        let mut by_version: HashMap<String, LedgerRecord> = records
            .into_iter()
            .map(|r| (r.version.clone(), r))
            .collect();

        let mut statuses: Vec<MigrationStatus> = self
            .migrations
            .iter()
            .map(|migration| {
                let record = by_version.remove(migration.version());
                MigrationStatus {
                    version: migration.version().to_string(),
                    description: migration.description().to_string(),
                    applied: record.as_ref().is_some_and(|r| r.success),
                    applied_at: record.as_ref().and_then(|r| r.applied_at),
                    success: record.as_ref().map(|r| r.success),
                    error_msg: record.and_then(|r| r.error_msg),
                    registered: true,
                }
            })
            .collect();

        statuses.extend(by_version.into_values().map(|record| MigrationStatus {
            version: record.version,
            description: record.description,
            applied: record.success,
            applied_at: record.applied_at,
            success: Some(record.success),
            error_msg: record.error_msg,
            registered: false,
        }));
        statuses.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(statuses)
    }
}

/// Combine a locked run's outcome with the release result; the run's own
/// error wins when both fail.
fn finish_locked(outcome: Result<RunReport>, released: Result<()>) -> Result<RunReport> {
    match (outcome, released) {
        (Ok(report), Ok(())) => Ok(report),
        (Ok(_), Err(release_error)) => Err(release_error),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release_error)) => {
            warn!("Failed to release migration lock: {}", release_error);
            Err(e)
        }
    }
}
