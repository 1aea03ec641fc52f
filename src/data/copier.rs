//! Table-by-table copying between databases.

use crate::constants::{DEFAULT_BATCH_SIZE, DEFAULT_COPY_TIMEOUT};
use crate::data::batch::{Deadline, InsertMode, insert_sql, rows_per_statement};
use crate::data::transform::Transform;
use crate::database::DatabaseManager;
use crate::db::{Database, Row, Value, quote_ident};
use crate::error::{MigrateError, Result, format_detailed};
use crate::migrator::MultiDatabaseReport;
use crate::oracle::{ExistenceOracle, InformationSchemaOracle};
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyStrategy {
    /// Truncate the target table, then insert.
    Overwrite,
    /// Upsert on duplicate keys.
    #[default]
    Merge,
    /// Insert rows whose keys are new.
    Insert,
    /// Insert, silently dropping duplicates.
    Ignore,
}

impl CopyStrategy {
    fn insert_mode(self) -> InsertMode {
        match self {
            CopyStrategy::Overwrite => InsertMode::Plain,
            CopyStrategy::Merge => InsertMode::Upsert,
            CopyStrategy::Insert | CopyStrategy::Ignore => InsertMode::Ignore,
        }
    }
}

impl FromStr for CopyStrategy {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "overwrite" => Ok(CopyStrategy::Overwrite),
            "merge" => Ok(CopyStrategy::Merge),
            "insert" => Ok(CopyStrategy::Insert),
            "ignore" => Ok(CopyStrategy::Ignore),
            other => Err(MigrateError::validation(format!(
                "invalid copy strategy '{}', expected overwrite, merge, insert or ignore",
                other
            ))),
        }
    }
}

impl fmt::Display for CopyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CopyStrategy::Overwrite => "overwrite",
            CopyStrategy::Merge => "merge",
            CopyStrategy::Insert => "insert",
            CopyStrategy::Ignore => "ignore",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    #[default]
    Stop,
    Continue,
    Rollback,
}

impl FromStr for OnError {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "stop" => Ok(OnError::Stop),
            "continue" => Ok(OnError::Continue),
            "rollback" => Ok(OnError::Rollback),
            other => Err(MigrateError::validation(format!(
                "invalid on-error policy '{}', expected stop, continue or rollback",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source_field: String,
    pub target_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CopyConfig {
    pub strategy: CopyStrategy,
    pub tables: Vec<String>,
    /// Table name to SQL `WHERE` condition.
    pub conditions: BTreeMap<String, String>,
    pub field_mappings: BTreeMap<String, Vec<FieldMapping>>,
    pub batch_size: usize,
    #[serde(deserialize_with = "crate::config::duration::deserialize")]
    pub timeout: Duration,
    pub on_error: OnError,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            strategy: CopyStrategy::default(),
            tables: Vec::new(),
            conditions: BTreeMap::new(),
            field_mappings: BTreeMap::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: DEFAULT_COPY_TIMEOUT,
            on_error: OnError::default(),
        }
    }
}

/// Parse `table:condition` arguments.
pub fn parse_conditions(values: &[String]) -> Result<BTreeMap<String, String>> {
    let mut conditions = BTreeMap::new();
    for value in values {
        let Some((table, condition)) = value.split_once(':') else {
            return Err(MigrateError::validation(format!(
                "invalid condition '{}', expected table:condition",
                value
            )));
        };
        conditions.insert(table.trim().to_string(), condition.trim().to_string());
    }
    Ok(conditions)
}

/// Parse `table:src=dst,src2=dst2` arguments.
pub fn parse_mappings(values: &[String]) -> Result<BTreeMap<String, Vec<FieldMapping>>> {
    let mut mappings: BTreeMap<String, Vec<FieldMapping>> = BTreeMap::new();
    for value in values {
        let invalid = || {
            MigrateError::validation(format!(
                "invalid mapping '{}', expected table:source=target[,source=target]",
                value
            ))
        };
        let (table, pairs) = value.split_once(':').ok_or_else(invalid)?;
        for pair in pairs.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (source, target) = pair.split_once('=').ok_or_else(invalid)?;
            mappings
                .entry(table.trim().to_string())
                .or_default()
                .push(FieldMapping {
                    source_field: source.trim().to_string(),
                    target_field: target.trim().to_string(),
                    transform: None,
                });
        }
    }
    Ok(mappings)
}

/// Reported after every written batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyProgress {
    pub target: String,
    pub table: String,
    pub copied: u64,
    pub total: u64,
}

pub type CopyProgressFn = Arc<dyn Fn(&CopyProgress) + Send + Sync>;

#[derive(Debug, Clone, Serialize)]
pub struct TableCopyResult {
    pub table: String,
    pub total_rows: u64,
    pub rows_copied: u64,
    pub batches: usize,
    /// Rows per INSERT actually used.
    pub effective_batch_size: usize,
    /// Set when the table failed under `on_error: continue`.
    pub error: Option<String>,
    pub duration: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct CopyReport {
    pub source: String,
    pub target: String,
    pub tables: Vec<TableCopyResult>,
    pub duration: Duration,
}

impl CopyReport {
    pub fn rows_copied(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_copied).sum()
    }

    pub fn failed_tables(&self) -> impl Iterator<Item = &TableCopyResult> {
        self.tables.iter().filter(|t| t.error.is_some())
    }
}

/// Column layout for one table: what to select, what to write and how to
/// transform each value on the way.
#[derive(Debug)]
struct ColumnPlan {
    source: Vec<String>,
    target: Vec<String>,
    transforms: Vec<Option<Transform>>,
}

pub struct DataCopier {
    config: CopyConfig,
    transforms: BTreeMap<String, Vec<(FieldMapping, Option<Transform>)>>,
    oracle: Arc<dyn ExistenceOracle>,
    progress: Option<CopyProgressFn>,
}

impl DataCopier {
    /// Validates the configuration, including every transform template.
    pub fn new(config: CopyConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(MigrateError::validation("batch size must be greater than 0"));
        }
        if config.tables.is_empty() {
            return Err(MigrateError::validation("no tables to copy"));
        }

        let mut transforms = BTreeMap::new();
        for (table, mappings) in &config.field_mappings {
            let compiled = mappings
                .iter()
                .map(|mapping| {
                    let transform = mapping
                        .transform
                        .as_deref()
                        .filter(|t| !t.trim().is_empty())
                        .map(Transform::from_str)
                        .transpose()?;
                    Ok((mapping.clone(), transform))
                })
                .collect::<Result<Vec<_>>>()?;
            transforms.insert(table.clone(), compiled);
        }

        Ok(Self {
            config,
            transforms,
            oracle: Arc::new(InformationSchemaOracle::new()),
            progress: None,
        })
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn ExistenceOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn with_progress(mut self, progress: CopyProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &CopyConfig {
        &self.config
    }

    fn plan_columns(&self, table: &str, source_columns: Vec<String>) -> Result<ColumnPlan> {
        let mappings = self.transforms.get(table);
        if let Some(mappings) = mappings {
            for (mapping, _) in mappings {
                if !source_columns
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(&mapping.source_field))
                {
                    return Err(MigrateError::validation(format!(
                        "mapping for {}: source column '{}' does not exist",
                        table, mapping.source_field
                    )));
                }
            }
        }

        let mut target = Vec::with_capacity(source_columns.len());
        let mut transforms = Vec::with_capacity(source_columns.len());
        for column in &source_columns {
            let mapping = mappings.and_then(|m| {
                m.iter()
                    .find(|(mapping, _)| mapping.source_field.eq_ignore_ascii_case(column))
            });
            match mapping {
                Some((mapping, transform)) => {
                    target.push(mapping.target_field.clone());
                    transforms.push(transform.clone());
                }
                None => {
                    target.push(column.clone());
                    transforms.push(None);
                }
            }
        }

        Ok(ColumnPlan {
            source: source_columns,
            target,
            transforms,
        })
    }

    /// Copy every configured table from `source` to `target`, honouring `on_error`.
    pub async fn copy(
        &self,
        source: &mut dyn Database,
        target: &mut dyn Database,
    ) -> Result<CopyReport> {
        let started = Instant::now();
        let deadline = Deadline::after(Some(self.config.timeout));
        let mut report = CopyReport {
            source: source.name().to_string(),
            target: target.name().to_string(),
            tables: Vec::new(),
            duration: Duration::ZERO,
        };
        info!(
            "Copying {} table(s) from {} to {} ({})",
            self.config.tables.len(),
            report.source,
            report.target,
            self.config.strategy
        );

        for table in &self.config.tables {
            let table_started = Instant::now();
            match self.copy_table(source, target, table, deadline).await {
                Ok(result) => report.tables.push(result),
                Err(e) => match self.config.on_error {
                    OnError::Stop => return Err(e),
                    OnError::Rollback => {
                        return Err(MigrateError::RollbackUnsupported {
                            table: table.clone(),
                            source: Box::new(e),
                        });
                    }
                    OnError::Continue => {
                        error!("Copy of {} failed: {}", table, format_detailed(&e));
                        report.tables.push(TableCopyResult {
                            table: table.clone(),
                            total_rows: 0,
                            rows_copied: 0,
                            batches: 0,
                            effective_batch_size: 0,
                            error: Some(format_detailed(&e)),
                            duration: table_started.elapsed(),
                        });
                    }
                },
            }
        }

        report.duration = started.elapsed();
        Ok(report)
    }

    async fn copy_table(
        &self,
        source: &mut dyn Database,
        target: &mut dyn Database,
        table: &str,
        deadline: Deadline,
    ) -> Result<TableCopyResult> {
        let started = Instant::now();
        let source_name = source.name().to_string();
        let target_name = target.name().to_string();

        if !self.oracle.table_exists(source.executor(), table).await? {
            return Err(MigrateError::validation(format!(
                "source table '{}' does not exist in '{}'",
                table, source_name
            )));
        }
        if !self.oracle.table_exists(target.executor(), table).await? {
            return Err(MigrateError::validation(format!(
                "target table '{}' does not exist in '{}'",
                table, target_name
            )));
        }

        let condition = self
            .config
            .conditions
            .get(table)
            .map(|c| c.trim())
            .filter(|c| !c.is_empty());
        let where_clause = condition
            .map(|c| format!(" WHERE {}", c))
            .unwrap_or_default();

        let total = source
            .executor()
            .query_count(
                &format!("SELECT COUNT(*) FROM {}{}", quote_ident(table), where_clause),
                &[],
            )
            .await
            .map_err(|e| MigrateError::execution(&source_name, format!("count {}", table), e))?;
        let total = u64::try_from(total).unwrap_or(0);

        let columns = self.oracle.table_columns(source.executor(), table).await?;
        let plan = self.plan_columns(table, columns)?;
        let primary_key = self
            .oracle
            .primary_key_columns(source.executor(), table)
            .await?;

        if self.config.strategy == CopyStrategy::Overwrite {
            target
                .executor()
                .execute(&format!("TRUNCATE TABLE {}", quote_ident(table)), &[])
                .await
                .map_err(|e| MigrateError::execution(&target_name, format!("truncate {}", table), e))?;
            debug!("Truncated {} on {}", table, target_name);
        }

        let batch_size = rows_per_statement(self.config.batch_size, plan.target.len());
        if batch_size < self.config.batch_size {
            debug!(
                "{} has {} columns, limiting batches to {} row(s)",
                table,
                plan.target.len(),
                batch_size
            );
        }
        let mut result = TableCopyResult {
            table: table.to_string(),
            total_rows: total,
            rows_copied: 0,
            batches: 0,
            effective_batch_size: batch_size,
            error: None,
            duration: Duration::ZERO,
        };
        let writer = BatchWriter {
            target_name: &target_name,
            table,
            plan: &plan,
            mode: self.config.strategy.insert_mode(),
            now: Local::now().naive_local(),
            total,
            progress: self.progress.as_ref(),
        };

        let columns = plan
            .source
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let key_index = match primary_key.as_slice() {
            [key] => plan.source.iter().position(|c| c.eq_ignore_ascii_case(key)),
            _ => None,
        };

        match key_index {
            Some(key_index) => {
                let key = quote_ident(&plan.source[key_index]);
                let first_page = format!(
                    "SELECT {} FROM {}{} ORDER BY {} LIMIT ?",
                    columns,
                    quote_ident(table),
                    where_clause,
                    key
                );
                let next_page = format!(
                    "SELECT {} FROM {} WHERE {}{} > ? ORDER BY {} LIMIT ?",
                    columns,
                    quote_ident(table),
                    condition.map(|c| format!("({}) AND ", c)).unwrap_or_default(),
                    key,
                    key
                );
                let page_size = Value::Int(i64::try_from(batch_size).unwrap_or(i64::MAX));
                let mut last_key: Option<Value> = None;

                loop {
                    deadline.check(&format!("copy of {}", table))?;
                    let rows = match &last_key {
                        None => source.executor().query(&first_page, &[page_size.clone()]).await,
                        Some(last) => {
                            source
                                .executor()
                                .query(&next_page, &[last.clone(), page_size.clone()])
                                .await
                        }
                    }
                    .map_err(|e| MigrateError::execution(&source_name, format!("read {}", table), e))?;
                    if rows.is_empty() {
                        break;
                    }

                    let fetched = rows.len();
                    last_key = rows.last().and_then(|row| row.values.get(key_index)).cloned();
                    writer.write(target, rows, &mut result).await?;
                    if fetched < batch_size || last_key.is_none() {
                        break;
                    }
                }
            }
            None => {
                if primary_key.is_empty() {
                    debug!("{} has no primary key, reading it in one pass", table);
                }
                let order_by = if primary_key.is_empty() {
                    String::new()
                } else {
                    format!(
                        " ORDER BY {}",
                        primary_key
                            .iter()
                            .map(|c| quote_ident(c))
                            .collect::<Vec<_>>()
                            .join(", ")
                    )
                };
                let select = format!(
                    "SELECT {} FROM {}{}{}",
                    columns,
                    quote_ident(table),
                    where_clause,
                    order_by
                );
                deadline.check(&format!("copy of {}", table))?;
                let rows = source
                    .executor()
                    .query(&select, &[])
                    .await
                    .map_err(|e| MigrateError::execution(&source_name, format!("read {}", table), e))?;

                let mut rows = rows.into_iter().peekable();
                while rows.peek().is_some() {
                    deadline.check(&format!("copy of {}", table))?;
                    let chunk: Vec<Row> = rows.by_ref().take(batch_size).collect();
                    writer.write(target, chunk, &mut result).await?;
                }
            }
        }

        result.duration = started.elapsed();
        info!(
            "Copied {}/{} row(s) of {} to {} in {} batch(es)",
            result.rows_copied, total, table, target_name, result.batches
        );
        Ok(result)
    }
}

/// Transforms fetched rows and writes them as one INSERT per call.
struct BatchWriter<'a> {
    target_name: &'a str,
    table: &'a str,
    plan: &'a ColumnPlan,
    mode: InsertMode,
    now: NaiveDateTime,
    total: u64,
    progress: Option<&'a CopyProgressFn>,
}

impl BatchWriter<'_> {
    async fn write(
        &self,
        target: &mut dyn Database,
        rows: Vec<Row>,
        result: &mut TableCopyResult,
    ) -> Result<()> {
        let count = rows.len();
        let mut args = Vec::with_capacity(count * self.plan.target.len());
        for row in rows {
            for (value, transform) in row.values.into_iter().zip(&self.plan.transforms) {
                args.push(match transform {
                    Some(transform) => transform.apply(value, self.now),
                    None => value,
                });
            }
        }

        let sql = insert_sql(self.table, &self.plan.target, self.plan.target.len(), count, self.mode);
        target
            .executor()
            .execute(&sql, &args)
            .await
            .map_err(|e| MigrateError::execution(self.target_name, format!("write {}", self.table), e))?;

        result.batches += 1;
        result.rows_copied += count as u64;
        if let Some(progress) = self.progress {
            progress(&CopyProgress {
                target: self.target_name.to_string(),
                table: self.table.to_string(),
                copied: result.rows_copied,
                total: self.total,
            });
        }
        Ok(())
    }
}

/// Copies between databases handed out by a [`DatabaseManager`].
pub struct CrossDatabaseCopier<'a> {
    manager: &'a DatabaseManager,
    copier: DataCopier,
}

impl<'a> CrossDatabaseCopier<'a> {
    pub fn new(manager: &'a DatabaseManager, copier: DataCopier) -> Self {
        Self { manager, copier }
    }

    pub async fn copy_between(&self, source: &str, target: &str) -> Result<CopyReport> {
        if source == target {
            return Err(MigrateError::validation(format!(
                "source and target are the same database '{}'",
                source
            )));
        }
        let mut source_db = self.manager.database(source).await?;
        let mut target_db = self.manager.database(target).await?;
        self.copier.copy(source_db.as_mut(), target_db.as_mut()).await
    }

    /// Copy to each target in turn. Under `stop` and `rollback` the first
    /// failing target ends the run; under `continue` every target is tried.
    pub async fn copy_to_many(
        &self,
        source: &str,
        targets: &[String],
    ) -> MultiDatabaseReport<CopyReport> {
        let mut report = MultiDatabaseReport::default();
        for target in targets {
            let outcome = self.copy_between(source, target).await;
            let failed = outcome.is_err();
            report.push(target, outcome);
            if failed && self.copier.config().on_error != OnError::Continue {
                warn!("Stopping after failure on {}", target);
                break;
            }
        }
        report
    }
}
