//! Database creation and schema bootstrap from a DDL script.

use crate::constants::{DEFAULT_CHARSET, DEFAULT_COLLATION};
use crate::db::{Database, SqlExecutor, quote_ident};
use crate::error::{MigrateError, Result};
use crate::oracle::{ExistenceOracle, InformationSchemaOracle};
use crate::resolver::resolve_order;
use crate::schema_ops::{OpOutcome, SchemaOps};
use crate::sqlparse::{ObjectKind, Statement, parse_script, validate_statements};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// What to do when the database to create already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfExists {
    #[default]
    Error,
    Skip,
    Prompt,
}

impl FromStr for IfExists {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(IfExists::Error),
            "skip" => Ok(IfExists::Skip),
            "prompt" => Ok(IfExists::Prompt),
            other => Err(MigrateError::validation(format!(
                "invalid if-exists value '{}', expected error, skip or prompt",
                other
            ))),
        }
    }
}

impl fmt::Display for IfExists {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IfExists::Error => "error",
            IfExists::Skip => "skip",
            IfExists::Prompt => "prompt",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateDatabaseOptions {
    pub name: String,
    pub charset: String,
    pub collation: String,
    pub if_exists: IfExists,
}

impl CreateDatabaseOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            charset: DEFAULT_CHARSET.to_string(),
            collation: DEFAULT_COLLATION.to_string(),
            if_exists: IfExists::default(),
        }
    }

    pub fn create_sql(&self) -> String {
        format!(
            "CREATE DATABASE {} CHARACTER SET {} COLLATE {}",
            quote_ident(&self.name),
            self.charset,
            self.collation
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedObject {
    pub kind: ObjectKind,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateFromScriptResult {
    pub database: String,
    /// Whether the database itself was created by this run.
    pub created: bool,
    pub total: usize,
    pub executed: usize,
    pub skipped: usize,
    pub objects: Vec<CreatedObject>,
    pub duration: Duration,
}

impl CreateFromScriptResult {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            created: false,
            total: 0,
            executed: 0,
            skipped: 0,
            objects: Vec::new(),
            duration: Duration::ZERO,
        }
    }
}

/// Decides whether to continue with an existing database under `IfExists::Prompt`.
pub type ConfirmExisting = Arc<dyn Fn(&str) -> bool + Send + Sync>;

pub struct DatabaseCreator {
    oracle: Arc<dyn ExistenceOracle>,
    confirm: Option<ConfirmExisting>,
}

impl Default for DatabaseCreator {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseCreator {
    pub fn new() -> Self {
        Self {
            oracle: Arc::new(InformationSchemaOracle::new()),
            confirm: None,
        }
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn ExistenceOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn with_confirm(mut self, confirm: ConfirmExisting) -> Self {
        self.confirm = Some(confirm);
        self
    }

    pub async fn database_exists(&self, server: &mut dyn SqlExecutor, name: &str) -> Result<bool> {
        self.oracle.database_exists(server, name).await
    }

    /// Create the database. Returns `false` when it already existed and the
    /// `if_exists` policy allowed continuing.
    pub async fn create_database(
        &self,
        server: &mut dyn SqlExecutor,
        options: &CreateDatabaseOptions,
    ) -> Result<bool> {
        if self.database_exists(server, &options.name).await? {
            return match options.if_exists {
                IfExists::Error => Err(MigrateError::validation(format!(
                    "database '{}' already exists",
                    options.name
                ))),
                IfExists::Skip => {
                    info!("Database {} already exists, skipping creation", options.name);
                    Ok(false)
                }
                IfExists::Prompt => match &self.confirm {
                    Some(confirm) if confirm(&options.name) => Ok(false),
                    Some(_) => Err(MigrateError::validation(format!(
                        "database '{}' already exists, aborted",
                        options.name
                    ))),
                    None => Err(MigrateError::validation(format!(
                        "database '{}' already exists and cannot prompt for confirmation",
                        options.name
                    ))),
                },
            };
        }

        server
            .execute(&options.create_sql(), &[])
            .await
            .map_err(|e| MigrateError::execution(&options.name, "CREATE DATABASE", e))?;
        info!(
            "Created database {} (charset {}, collation {})",
            options.name, options.charset, options.collation
        );
        Ok(true)
    }

    /// Parse, validate and order a schema script without touching a database.
    pub fn plan(&self, script: &str) -> Result<Vec<Statement>> {
        let statements = parse_script(script)?;
        if statements.is_empty() {
            return Err(MigrateError::validation("script contains no DDL statements"));
        }
        validate_statements(&statements)?;
        resolve_order(statements)
    }

    /// Execute every statement of `script` in dependency order inside one
    /// transaction, skipping objects that already exist.
    pub async fn execute_script(
        &self,
        db: &mut dyn Database,
        script: &str,
    ) -> Result<CreateFromScriptResult> {
        let started = Instant::now();
        let ordered = self.plan(script)?;
        let database = db.name().to_string();
        let mut result = CreateFromScriptResult::new(&database);
        result.total = ordered.len();
        info!("Executing {} statement(s) on {}", ordered.len(), database);

        let mut tx = db.begin().await?;
        let outcome = self.apply(tx.executor(), &database, &ordered, &mut result).await;
        match outcome {
            Ok(()) => tx.commit().await?,
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!("Rollback on {} failed: {}", database, rollback_error);
                }
                return Err(e);
            }
        }

        result.duration = started.elapsed();
        info!(
            "{}: {} executed, {} skipped in {:?}",
            database, result.executed, result.skipped, result.duration
        );
        Ok(result)
    }

    async fn apply(
        &self,
        exec: &mut dyn SqlExecutor,
        database: &str,
        ordered: &[Statement],
        result: &mut CreateFromScriptResult,
    ) -> Result<()> {
        let mut ops = SchemaOps::new(exec, self.oracle.as_ref(), database);
        for (index, statement) in ordered.iter().enumerate() {
            info!(
                "[{}/{}] {}",
                index + 1,
                ordered.len(),
                statement.label()
            );
            match ops.ensure_statement(statement).await? {
                OpOutcome::Applied => {
                    result.executed += 1;
                    result.objects.push(CreatedObject {
                        kind: statement.kind,
                        name: statement.name.clone(),
                    });
                }
                OpOutcome::Skipped => result.skipped += 1,
            }
        }
        Ok(())
    }
}
