//! Batched loading of INSERT scripts into one or many databases.

use crate::constants::DEFAULT_BATCH_SIZE;
use crate::data::batch::{Deadline, InsertMode, insert_sql, rows_per_statement};
use crate::database::DatabaseManager;
use crate::db::{Database, SqlExecutor, Value};
use crate::error::{MigrateError, Result, format_detailed, is_duplicate_key};
use crate::migrator::MultiDatabaseReport;
use crate::oracle::{ExistenceOracle, InformationSchemaOracle};
use crate::sqlparse::{InsertParser, InsertStatement, table_names, validate_inserts};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Handling of duplicate-key failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Abort and roll back.
    #[default]
    Error,
    /// Skip the failing batch and continue.
    Ignore,
}

impl FromStr for ConflictPolicy {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(ConflictPolicy::Error),
            "ignore" => Ok(ConflictPolicy::Ignore),
            other => Err(MigrateError::validation(format!(
                "invalid conflict policy '{}', expected error or ignore",
                other
            ))),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConflictPolicy::Error => "error",
            ConflictPolicy::Ignore => "ignore",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataInsertConfig {
    pub batch_size: usize,
    pub on_conflict: ConflictPolicy,
    pub stop_on_error: bool,
    pub validate_tables: bool,
    pub use_transaction: bool,
    pub timeout: Option<Duration>,
}

impl Default for DataInsertConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            on_conflict: ConflictPolicy::default(),
            stop_on_error: true,
            validate_tables: true,
            use_transaction: true,
            timeout: None,
        }
    }
}

/// Snapshot passed to the progress callback after each batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadProgress {
    pub database: String,
    pub table: String,
    pub rows_done: usize,
    pub rows_total: usize,
}

pub type LoadProgressFn = Arc<dyn Fn(&LoadProgress) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInsertResult {
    pub table: String,
    pub rows_inserted: usize,
    /// Batch INSERTs executed against the table.
    pub statements_executed: usize,
    /// Rows per INSERT actually used; below the configured batch size for
    /// tables too wide to fit a full batch of placeholders.
    pub effective_batch_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InsertError {
    pub table: String,
    pub line: usize,
    pub batch: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InsertResult {
    pub database: String,
    pub total_statements: usize,
    pub successful_statements: usize,
    pub failed_statements: usize,
    pub total_rows_inserted: usize,
    pub skipped_batches: usize,
    /// In order of first appearance in the script.
    pub tables: Vec<TableInsertResult>,
    pub errors: Vec<InsertError>,
    pub duration: Duration,
}

impl InsertResult {
    fn new(database: &str, total_statements: usize) -> Self {
        Self {
            database: database.to_string(),
            total_statements,
            successful_statements: 0,
            failed_statements: 0,
            total_rows_inserted: 0,
            skipped_batches: 0,
            tables: Vec::new(),
            errors: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableInsertResult> {
        self.tables.iter().find(|t| t.table == name)
    }

    fn table_mut(&mut self, name: &str) -> &mut TableInsertResult {
        let position = match self.tables.iter().position(|t| t.table == name) {
            Some(position) => position,
            None => {
                self.tables.push(TableInsertResult {
                    table: name.to_string(),
                    rows_inserted: 0,
                    statements_executed: 0,
                    effective_batch_size: 0,
                });
                self.tables.len() - 1
            }
        };
        &mut self.tables[position]
    }
}

pub struct DataLoader {
    config: DataInsertConfig,
    oracle: Arc<dyn ExistenceOracle>,
    progress: Option<LoadProgressFn>,
}

impl DataLoader {
    pub fn new(config: DataInsertConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(MigrateError::validation("batch size must be greater than 0"));
        }
        Ok(Self {
            config,
            oracle: Arc::new(InformationSchemaOracle::new()),
            progress: None,
        })
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn ExistenceOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn with_progress(mut self, progress: LoadProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &DataInsertConfig {
        &self.config
    }

    /// Parse and structurally validate a data script.
    pub fn parse_file(path: &Path) -> Result<Vec<InsertStatement>> {
        let statements = InsertParser::new().parse_file(path)?;
        validate_inserts(&statements)?;
        Ok(statements)
    }

    /// Load every statement into `db`.
    pub async fn load(
        &self,
        db: &mut dyn Database,
        statements: &[InsertStatement],
    ) -> Result<InsertResult> {
        let started = Instant::now();
        validate_inserts(statements)?;
        let database = db.name().to_string();

        if self.config.validate_tables {
            let tables = table_names(statements);
            let missing = self.oracle.missing_tables(db.executor(), &tables).await?;
            if !missing.is_empty() {
                return Err(MigrateError::validation(format!(
                    "missing table(s) in database '{}': {}",
                    database,
                    missing.join(", ")
                )));
            }
            debug!("All {} table(s) exist in {}", tables.len(), database);
        }

        let mut result = InsertResult::new(&database, statements.len());
        let deadline = Deadline::after(self.config.timeout);

        if self.config.use_transaction {
            let mut tx = db.begin().await?;
            let outcome = self
                .run(tx.executor(), &database, statements, &mut result, deadline)
                .await;
            match outcome {
                Ok(()) => tx.commit().await?,
                Err(e) => {
                    if let Err(rollback_error) = tx.rollback().await {
                        warn!("Rollback on {} failed: {}", database, rollback_error);
                    }
                    return Err(e);
                }
            }
        } else {
            self.run(db.executor(), &database, statements, &mut result, deadline)
                .await?;
        }

        result.duration = started.elapsed();
        info!(
            "{}: inserted {} row(s) into {} table(s) in {:?}",
            database,
            result.total_rows_inserted,
            result.tables.len(),
            result.duration
        );
        Ok(result)
    }

    async fn run(
        &self,
        exec: &mut dyn SqlExecutor,
        database: &str,
        statements: &[InsertStatement],
        result: &mut InsertResult,
        deadline: Deadline,
    ) -> Result<()> {
        let rows_total: usize = statements.iter().map(InsertStatement::row_count).sum();
        let mut rows_done = 0;

        for (index, statement) in statements.iter().enumerate() {
            info!(
                "[{}/{}] {} ({} rows)",
                index + 1,
                statements.len(),
                statement.table,
                statement.row_count()
            );
            let mode = if statement.ignore {
                InsertMode::Ignore
            } else {
                InsertMode::Plain
            };
            let mut failed = false;
            let width = statement.rows.first().map_or(0, Vec::len);
            let batch_size = rows_per_statement(self.config.batch_size, width);
            if batch_size < self.config.batch_size {
                debug!(
                    "{} has {} columns, limiting batches to {} row(s)",
                    statement.table, width, batch_size
                );
            }
            result.table_mut(&statement.table).effective_batch_size = batch_size;

            for (batch_index, chunk) in statement.rows.chunks(batch_size).enumerate() {
                deadline.check("data insert")?;
                let sql = insert_sql(&statement.table, &statement.columns, width, chunk.len(), mode);
                let args: Vec<Value> = chunk.iter().flatten().cloned().collect();
                debug!(
                    "  batch {}: {} row(s) into {}",
                    batch_index + 1,
                    chunk.len(),
                    statement.table
                );

                match exec.execute(&sql, &args).await {
                    Ok(_) => {
                        let table = result.table_mut(&statement.table);
                        table.rows_inserted += chunk.len();
                        table.statements_executed += 1;
                        result.total_rows_inserted += chunk.len();
                    }
                    Err(e) if is_duplicate_key(&e) => match self.config.on_conflict {
                        ConflictPolicy::Error => {
                            return Err(MigrateError::Conflict {
                                table: statement.table.clone(),
                                source: e,
                            });
                        }
                        ConflictPolicy::Ignore => {
                            warn!(
                                "Duplicate key in batch {} of {}, skipping",
                                batch_index + 1,
                                statement.table
                            );
                            result.skipped_batches += 1;
                        }
                    },
                    Err(e) => {
                        let error = MigrateError::Statement {
                            line: statement.line,
                            statement: format!(
                                "INSERT INTO {} (batch {})",
                                statement.table,
                                batch_index + 1
                            ),
                            source: e,
                        };
                        if self.config.stop_on_error {
                            return Err(error);
                        }
                        warn!("{}", format_detailed(&error));
                        result.errors.push(InsertError {
                            table: statement.table.clone(),
                            line: statement.line,
                            batch: batch_index + 1,
                            message: format_detailed(&error),
                        });
                        result.skipped_batches += 1;
                        failed = true;
                    }
                }

                rows_done += chunk.len();
                if let Some(progress) = &self.progress {
                    progress(&LoadProgress {
                        database: database.to_string(),
                        table: statement.table.clone(),
                        rows_done,
                        rows_total,
                    });
                }
            }

            if failed {
                result.failed_statements += 1;
            } else {
                result.successful_statements += 1;
            }
        }
        Ok(())
    }

    /// Load the same statements into each database in turn.
    pub async fn load_many(
        &self,
        manager: &DatabaseManager,
        databases: &[String],
        statements: &[InsertStatement],
    ) -> MultiDatabaseReport<InsertResult> {
        let mut report = MultiDatabaseReport::default();
        for database in databases {
            info!("Loading data into {}", database);
            let outcome = match manager.database(database).await {
                Ok(mut db) => self.load(db.as_mut(), statements).await,
                Err(e) => Err(e),
            };
            report.push(database, outcome);
        }
        report
    }
}
