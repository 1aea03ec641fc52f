//! Shared batching primitives for the loader and the copier.

use crate::constants::MYSQL_MAX_PLACEHOLDERS;
use crate::db::quote_ident;
use crate::error::{MigrateError, Result};
use std::time::{Duration, Instant};

/// How a batch INSERT treats existing keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    Plain,
    Ignore,
    /// `ON DUPLICATE KEY UPDATE` every column
    Upsert,
}

/// Rows that fit in one `INSERT` of `width` columns without crossing the
/// placeholder limit, capped at `batch_size`. Never less than one.
pub fn rows_per_statement(batch_size: usize, width: usize) -> usize {
    let fit = MYSQL_MAX_PLACEHOLDERS / width.max(1);
    batch_size.min(fit).max(1)
}

/// One multi-row `INSERT` with `rows` groups of `width` placeholders.
/// An empty column list produces a positional insert.
pub fn insert_sql(
    table: &str,
    columns: &[String],
    width: usize,
    rows: usize,
    mode: InsertMode,
) -> String {
    let verb = match mode {
        InsertMode::Ignore => "INSERT IGNORE INTO",
        InsertMode::Plain | InsertMode::Upsert => "INSERT INTO",
    };
    let column_list = if columns.is_empty() {
        String::new()
    } else {
        format!(
            " ({})",
            columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ")
        )
    };
    let group = format!("({})", vec!["?"; width].join(", "));
    let values = std::iter::repeat_n(group, rows)
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!("{} {}{} VALUES {}", verb, quote_ident(table), column_list, values);
    if mode == InsertMode::Upsert && !columns.is_empty() {
        let updates = columns
            .iter()
            .map(|c| {
                let quoted = quote_ident(c);
                format!("{} = VALUES({})", quoted, quoted)
            })
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(" ON DUPLICATE KEY UPDATE ");
        sql.push_str(&updates);
    }
    sql
}

/// Point in time after which no new batch may start.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn after(timeout: Option<Duration>) -> Self {
        Self(timeout.map(|t| Instant::now() + t))
    }

    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Called between batches; an in-flight statement always completes.
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_expired() {
            return Err(MigrateError::Cancelled {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }
}
