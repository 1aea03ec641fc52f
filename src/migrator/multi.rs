//! Runs the registered migrations against many databases, one at a time.

use crate::database::DatabaseManager;
use crate::db::Database;
use crate::error::{DatabaseFailure, MigrateError, Result};
use crate::migration::{DatabaseTarget, Migration};
use crate::migrator::{MigrationStatus, Migrator, MigratorConfig, RunReport};
use crate::oracle::{ExistenceOracle, InformationSchemaOracle};
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{error, info};

type TargetFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Per-database outcomes of one multi-database run.
#[derive(Debug)]
pub struct MultiDatabaseReport<T> {
    pub successes: Vec<(String, T)>,
    pub failures: Vec<DatabaseFailure>,
}

impl<T> Default for MultiDatabaseReport<T> {
    fn default() -> Self {
        Self {
            successes: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<T> MultiDatabaseReport<T> {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn push(&mut self, database: &str, outcome: Result<T>) {
        match outcome {
            Ok(value) => self.successes.push((database.to_string(), value)),
            Err(error) => {
                error!("{}: {}", database, error);
                self.failures.push(DatabaseFailure {
                    database: database.to_string(),
                    error,
                });
            }
        }
    }

    /// Successes, or every failure aggregated into one error.
    pub fn into_result(self) -> Result<Vec<(String, T)>> {
        if self.failures.is_empty() {
            Ok(self.successes)
        } else {
            Err(MigrateError::MultiDatabase(self.failures))
        }
    }
}

pub struct MultiMigrator {
    config: MigratorConfig,
    default_database: String,
    migrations_dir: Option<PathBuf>,
    oracle: Arc<dyn ExistenceOracle>,
    migrations: Vec<Arc<dyn Migration>>,
}

impl MultiMigrator {
    pub fn new(config: MigratorConfig, default_database: impl Into<String>) -> Self {
        Self {
            config,
            default_database: default_database.into(),
            migrations_dir: None,
            oracle: Arc::new(InformationSchemaOracle::new()),
            migrations: Vec::new(),
        }
    }

    /// Root that per-database subdirectories are resolved against.
    pub fn with_migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = Some(dir.into());
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn ExistenceOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn register(&mut self, migration: Arc<dyn Migration>) {
        self.migrations.push(migration);
    }

    pub fn register_all(&mut self, migrations: impl IntoIterator<Item = Arc<dyn Migration>>) {
        self.migrations.extend(migrations);
    }

    pub fn default_database(&self) -> &str {
        &self.default_database
    }

    /// Whether `migration` belongs to `database`. The first rule that has
    /// an opinion decides: declared single target, declared list, the
    /// subdirectory it was loaded from, then the default database.
    pub fn should_apply(&self, migration: &dyn Migration, database: &str) -> bool {
        match migration.target() {
            DatabaseTarget::Single(name) => return name == database,
            DatabaseTarget::Many(names) => return names.iter().any(|n| n == database),
            DatabaseTarget::Unspecified => {}
        }

        if let Some(dir) = migration.origin().and_then(|path| self.origin_database(path)) {
            return dir == database;
        }

        database == self.default_database
    }

    /// `<migrations_dir>/<db>/file.sql` yields `<db>`; files at the root yield nothing.
    fn origin_database(&self, path: &Path) -> Option<String> {
        let root = self.migrations_dir.as_deref()?;
        let relative = path.strip_prefix(root).ok()?;
        let mut components = relative.components();
        let first = components.next()?;
        components.next()?;
        match first {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        }
    }

    /// A single-database runner holding only the units that apply to `database`.
    pub fn migrator_for(&self, database: &str) -> Result<Migrator> {
        let mut migrator =
            Migrator::new(self.config.clone())?.with_oracle(Arc::clone(&self.oracle));
        migrator.register_all(
            self.migrations
                .iter()
                .filter(|m| self.should_apply(m.as_ref(), database))
                .cloned(),
        );
        Ok(migrator)
    }

    async fn for_each_target<T, F>(
        &self,
        manager: &DatabaseManager,
        databases: &[String],
        run: F,
    ) -> MultiDatabaseReport<T>
    where
        F: for<'a> Fn(&'a Migrator, &'a mut dyn Database) -> TargetFuture<'a, T>,
    {
        let fallback = [self.default_database.clone()];
        let databases = if databases.is_empty() {
            &fallback[..]
        } else {
            databases
        };

        let mut report = MultiDatabaseReport::default();
        for database in databases {
            info!("Processing database {}", database);
            let outcome = match (self.migrator_for(database), manager.database(database).await) {
                (Ok(migrator), Ok(mut db)) => run(&migrator, db.as_mut()).await,
                (Err(e), _) | (_, Err(e)) => Err(e),
            };
            report.push(database, outcome);
        }
        report
    }

    pub async fn init(
        &self,
        manager: &DatabaseManager,
        databases: &[String],
    ) -> MultiDatabaseReport<()> {
        self.for_each_target(manager, databases, |migrator, db| Box::pin(migrator.init(db)))
            .await
    }

    pub async fn up(
        &self,
        manager: &DatabaseManager,
        databases: &[String],
    ) -> MultiDatabaseReport<RunReport> {
        self.for_each_target(manager, databases, |migrator, db| Box::pin(migrator.up(db)))
            .await
    }

    pub async fn down(
        &self,
        manager: &DatabaseManager,
        databases: &[String],
        steps: usize,
    ) -> MultiDatabaseReport<RunReport> {
        self.for_each_target(manager, databases, move |migrator, db| {
            Box::pin(migrator.down(db, steps))
        })
        .await
    }

    pub async fn status(
        &self,
        manager: &DatabaseManager,
        databases: &[String],
    ) -> MultiDatabaseReport<Vec<MigrationStatus>> {
        self.for_each_target(manager, databases, |migrator, db| Box::pin(migrator.status(db)))
            .await
    }
}
