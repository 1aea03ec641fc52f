//! The per-database ledger of applied migrations.

use crate::db::{Row, SqlExecutor, Value, quote_ident};
use crate::error::{MigrateError, Result};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashSet;

/// Validate a configured ledger/lock table name.
/// Allows letters, digits, underscores and dollar signs, not starting with a digit.
pub fn validate_table_name(name: &str) -> Result<()> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        && name.len() <= 64;

    if !valid {
        return Err(MigrateError::validation(format!(
            "invalid table name '{}': must contain only letters, numbers, underscores, and dollar signs, starting with a letter or underscore",
            name
        )));
    }
    Ok(())
}

/// Record representing a migration in the ledger table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerRecord {
    pub version: String,
    pub description: String,
    pub applied_at: Option<NaiveDateTime>,
    pub success: bool,
    pub error_msg: Option<String>,
}

impl LedgerRecord {
    fn from_row(row: &Row) -> Self {
        let text = |column: &str| match row.by_name(column) {
            Some(Value::Null) | None => None,
            Some(Value::Text(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        };
        let applied_at = match row.by_name("applied_at") {
            Some(Value::Timestamp(ts)) => Some(*ts),
            Some(Value::Text(s)) => NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok(),
            _ => None,
        };
        Self {
            version: text("version").unwrap_or_default(),
            description: text("description").unwrap_or_default(),
            applied_at,
            success: row
                .by_name("success")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            error_msg: text("error_msg"),
        }
    }
}

/// Ledger operations for one named table.
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
}

impl Ledger {
    pub fn new(table: &str) -> Result<Self> {
        validate_table_name(table)?;
        Ok(Self {
            table: table.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE {} (
    version VARCHAR(255) NOT NULL PRIMARY KEY,
    description TEXT,
    applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    success BOOLEAN NOT NULL DEFAULT TRUE,
    error_msg TEXT
)",
            quote_ident(&self.table)
        )
    }

    /// Upsert an outcome. A failed row is overwritten by a later success.
    pub async fn record(
        &self,
        exec: &mut dyn SqlExecutor,
        version: &str,
        description: &str,
        success: bool,
        error_msg: Option<String>,
    ) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (version, description, success, error_msg) VALUES (?, ?, ?, ?) \
             ON DUPLICATE KEY UPDATE description = VALUES(description), success = VALUES(success), \
             error_msg = VALUES(error_msg), applied_at = CURRENT_TIMESTAMP",
            quote_ident(&self.table)
        );
        let args = [
            Value::from(version),
            Value::from(description),
            Value::from(success),
            Value::from(error_msg),
        ];
        exec.execute(&sql, &args).await?;
        Ok(())
    }

    pub async fn remove(&self, exec: &mut dyn SqlExecutor, version: &str) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE version = ?", quote_ident(&self.table));
        exec.execute(&sql, &[Value::from(version)]).await?;
        Ok(())
    }

    /// Versions recorded with `success = TRUE`.
    pub async fn applied_versions(&self, exec: &mut dyn SqlExecutor) -> Result<HashSet<String>> {
        let sql = format!(
            "SELECT version FROM {} WHERE success = TRUE",
            quote_ident(&self.table)
        );
        let rows = exec.query(&sql, &[]).await?;
        Ok(rows.iter().filter_map(|row| row.text(0)).collect())
    }

    /// Successful rows, most recently applied first.
    pub async fn applied_for_revert(&self, exec: &mut dyn SqlExecutor) -> Result<Vec<LedgerRecord>> {
        let sql = format!(
            "SELECT version, description, applied_at, success, error_msg FROM {} \
             WHERE success = TRUE ORDER BY applied_at DESC, version DESC",
            quote_ident(&self.table)
        );
        let rows = exec.query(&sql, &[]).await?;
        Ok(rows.iter().map(LedgerRecord::from_row).collect())
    }

    /// Every row, successful or not, ordered by version.
    pub async fn all_records(&self, exec: &mut dyn SqlExecutor) -> Result<Vec<LedgerRecord>> {
        let sql = format!(
            "SELECT version, description, applied_at, success, error_msg FROM {} ORDER BY version",
            quote_ident(&self.table)
        );
        let rows = exec.query(&sql, &[]).await?;
        Ok(rows.iter().map(LedgerRecord::from_row).collect())
    }
}
