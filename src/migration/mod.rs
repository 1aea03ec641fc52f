//! Migration units: the `Migration` trait plus the SQL-backed implementation
//! loaded from migration files.

pub mod parsing;
pub mod sections;

use crate::db::SqlExecutor;
use crate::error::{MigrateError, Result};
use crate::sqlparse::scanner::{RawStatement, preview, split_statements};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

pub use parsing::{
    discover_migrations, generate_migration_filename, new_migration_file, parse_migration_filename,
};
pub use sections::{MigrationSections, parse_migration_sections};

/// Which databases a migration declares it belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "databases", rename_all = "lowercase")]
pub enum DatabaseTarget {
    Single(String),
    Many(Vec<String>),
    #[default]
    Unspecified,
}

/// One versioned, reversible unit of schema change.
///
/// `up` and `down` receive either a direct connection or an open transaction;
/// the runner decides which.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Lexically sortable identity.
    fn version(&self) -> &str;

    fn description(&self) -> &str;

    fn target(&self) -> DatabaseTarget {
        DatabaseTarget::Unspecified
    }

    /// File the migration was loaded from, if any.
    fn origin(&self) -> Option<&Path> {
        None
    }

    async fn up(&self, exec: &mut dyn SqlExecutor) -> Result<()>;

    async fn down(&self, exec: &mut dyn SqlExecutor) -> Result<()>;
}

/// A migration whose actions are lists of SQL statements.
#[derive(Debug, Clone)]
pub struct SqlMigration {
    version: String,
    description: String,
    target: DatabaseTarget,
    origin: Option<PathBuf>,
    up: Vec<RawStatement>,
    down: Vec<RawStatement>,
}

impl SqlMigration {
    pub fn new(
        version: impl Into<String>,
        description: impl Into<String>,
        up_sql: &str,
        down_sql: &str,
    ) -> Result<Self> {
        Ok(Self {
            version: version.into(),
            description: description.into(),
            target: DatabaseTarget::Unspecified,
            origin: None,
            up: split_statements(up_sql)?,
            down: split_statements(down_sql)?,
        })
    }

    pub fn from_sections(
        version: impl Into<String>,
        description: impl Into<String>,
        sections: MigrationSections,
    ) -> Self {
        Self {
            version: version.into(),
            description: description.into(),
            target: sections.target,
            origin: None,
            up: sections.up,
            down: sections.down,
        }
    }

    /// Load `V<version>_<description>.sql`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let (version, description) = parse_migration_filename(filename).ok_or_else(|| {
            MigrateError::validation(format!(
                "'{}' is not a migration file name (expected V<version>_<description>.sql)",
                path.display()
            ))
        })?;
        let content = std::fs::read_to_string(path).map_err(|e| MigrateError::io(path, e))?;
        let sections = parse_migration_sections(&content).map_err(|e| match e {
            MigrateError::Parse { line, message } => MigrateError::parse(
                line,
                format!("{} ({})", message, path.display()),
            ),
            other => other,
        })?;
        Ok(Self::from_sections(version, description, sections).with_origin(path))
    }

    pub fn with_target(mut self, target: DatabaseTarget) -> Self {
        self.target = target;
        self
    }

    pub fn with_origin(mut self, path: impl Into<PathBuf>) -> Self {
        self.origin = Some(path.into());
        self
    }

    pub fn up_statements(&self) -> &[RawStatement] {
        &self.up
    }

    pub fn down_statements(&self) -> &[RawStatement] {
        &self.down
    }
}

async fn run_statements(exec: &mut dyn SqlExecutor, statements: &[RawStatement]) -> Result<()> {
    for statement in statements {
        debug!("Executing statement at line {}", statement.line);
        exec.execute(&statement.text, &[])
            .await
            .map_err(|source| MigrateError::Statement {
                line: statement.line,
                statement: preview(&statement.text),
                source,
            })?;
    }
    Ok(())
}

#[async_trait]
impl Migration for SqlMigration {
    fn version(&self) -> &str {
        &self.version
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn target(&self) -> DatabaseTarget {
        self.target.clone()
    }

    fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    async fn up(&self, exec: &mut dyn SqlExecutor) -> Result<()> {
        run_statements(exec, &self.up).await
    }

    async fn down(&self, exec: &mut dyn SqlExecutor) -> Result<()> {
        run_statements(exec, &self.down).await
    }
}
