use crate::helpers::fake_db::{FakeServer, options};
use anyhow::{Context, Result};
use dbmt::database::DatabaseManager;
use dbmt::migration::{Migration, discover_migrations};
use dbmt::migrator::{MigratorConfig, MultiMigrator};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// A migrations directory on disk plus a fake server to run it against.
pub struct MigrationTestHelper {
    pub server: FakeServer,
    pub migrations_dir: PathBuf,
    _temp_dir: TempDir,
}

impl MigrationTestHelper {
    pub fn new(databases: &[&str]) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let migrations_dir = temp_dir.path().join("migrations");
        fs::create_dir_all(&migrations_dir).expect("Failed to create migrations directory");
        Self {
            server: FakeServer::with_databases(databases),
            migrations_dir,
            _temp_dir: temp_dir,
        }
    }

    /// Write `content` to `relative` under the migrations directory.
    pub fn write_migration(&self, relative: &str, content: &str) -> Result<PathBuf> {
        let path = self.migrations_dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn manager(&self, configured: &[&str]) -> DatabaseManager {
        self.server.manager(options(configured))
    }

    /// Discover everything under the migrations directory.
    pub fn multi_migrator(&self, default_database: &str) -> Result<MultiMigrator> {
        self.multi_migrator_with(MigratorConfig::default(), default_database)
    }

    pub fn multi_migrator_with(
        &self,
        config: MigratorConfig,
        default_database: &str,
    ) -> Result<MultiMigrator> {
        let migrations = discover_migrations(&self.migrations_dir)?;
        let mut migrator = MultiMigrator::new(config, default_database)
            .with_migrations_dir(&self.migrations_dir);
        migrator.register_all(
            migrations
                .into_iter()
                .map(|m| Arc::new(m) as Arc<dyn Migration>),
        );
        Ok(migrator)
    }

    /// Versions recorded as applied on `database`, in version order.
    pub fn ledger_versions(&self, database: &str) -> Vec<String> {
        let mut versions: Vec<String> = self
            .server
            .rows(database, "schema_migrations")
            .into_iter()
            .filter(|row| row[3].as_bool() == Some(true))
            .filter_map(|row| row[0].as_str().map(str::to_string))
            .collect();
        versions.sort();
        versions
    }
}
