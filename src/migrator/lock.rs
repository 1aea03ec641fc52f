//! Cross-process mutual exclusion through a single-row lock table.

use crate::constants::LOCK_ROW_ID;
use crate::db::{SqlExecutor, Value, quote_ident};
use crate::error::{MigrateError, Result};
use crate::migration_tracking::validate_table_name;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct MigrationLock {
    table: String,
    owner: String,
    stale_after: Option<Duration>,
}

/// Identity written to `locked_by`.
pub fn lock_owner_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("dbmt-{}-{}", std::process::id(), &id[..8])
}

impl MigrationLock {
    pub fn new(table: &str, stale_after: Option<Duration>) -> Result<Self> {
        validate_table_name(table)?;
        Ok(Self {
            table: table.to_string(),
            owner: lock_owner_id(),
            stale_after,
        })
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE {} (
    id INT NOT NULL PRIMARY KEY,
    locked BOOLEAN NOT NULL DEFAULT FALSE,
    locked_at TIMESTAMP NULL,
    locked_by VARCHAR(255) NULL
)",
            quote_ident(&self.table)
        )
    }

    /// Insert the lock row when it is missing. Returns whether it was inserted.
    pub async fn seed(&self, exec: &mut dyn SqlExecutor) -> Result<bool> {
        let count = exec
            .query_count(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE id = ?",
                    quote_ident(&self.table)
                ),
                &[Value::Int(LOCK_ROW_ID)],
            )
            .await?;
        if count > 0 {
            return Ok(false);
        }
        exec.execute(
            &format!(
                "INSERT INTO {} (id, locked) VALUES (?, FALSE)",
                quote_ident(&self.table)
            ),
            &[Value::Int(LOCK_ROW_ID)],
        )
        .await?;
        Ok(true)
    }

    /// Take the lock with one conditional update; exactly one contender wins.
    pub async fn acquire(&self, exec: &mut dyn SqlExecutor, database: &str) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET locked = TRUE, locked_at = NOW(), locked_by = ? WHERE id = ? AND locked = FALSE",
            quote_ident(&self.table)
        );
        let affected = exec
            .execute(&sql, &[Value::from(self.owner.as_str()), Value::Int(LOCK_ROW_ID)])
            .await?;
        if affected == 1 {
            debug!("Acquired migration lock on {} as {}", database, self.owner);
            return Ok(());
        }

        let (holder, since) = self.holder(exec).await?;

        if let Some(stale_after) = self.stale_after
            && self.take_over_stale(exec, stale_after).await?
        {
            warn!(
                "Took over stale migration lock on {} held by {} since {}",
                database,
                holder,
                since.as_deref().unwrap_or("unknown")
            );
            return Ok(());
        }

        Err(MigrateError::LockContention {
            database: database.to_string(),
            holder,
            since,
        })
    }

    async fn take_over_stale(&self, exec: &mut dyn SqlExecutor, stale_after: Duration) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET locked = TRUE, locked_at = NOW(), locked_by = ? \
             WHERE id = ? AND locked = TRUE AND locked_at < NOW() - INTERVAL ? SECOND",
            quote_ident(&self.table)
        );
        let seconds = i64::try_from(stale_after.as_secs()).unwrap_or(i64::MAX);
        let affected = exec
            .execute(
                &sql,
                &[
                    Value::from(self.owner.as_str()),
                    Value::Int(LOCK_ROW_ID),
                    Value::Int(seconds),
                ],
            )
            .await?;
        Ok(affected == 1)
    }

    /// Current holder and lock time, as recorded in the lock row.
    pub async fn holder(&self, exec: &mut dyn SqlExecutor) -> Result<(String, Option<String>)> {
        let sql = format!(
            "SELECT locked_by, locked_at FROM {} WHERE id = ?",
            quote_ident(&self.table)
        );
        let row = exec.query_row(&sql, &[Value::Int(LOCK_ROW_ID)]).await?;
        Ok(match row {
            Some(row) => (
                row.text(0).unwrap_or_else(|| "unknown".to_string()),
                row.text(1),
            ),
            None => ("unknown (lock row missing)".to_string(), None),
        })
    }

    /// Release the lock if this owner holds it.
    pub async fn release(&self, exec: &mut dyn SqlExecutor) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET locked = FALSE, locked_at = NULL, locked_by = NULL WHERE id = ? AND locked_by = ?",
            quote_ident(&self.table)
        );
        let affected = exec
            .execute(&sql, &[Value::Int(LOCK_ROW_ID), Value::from(self.owner.as_str())])
            .await?;
        if affected == 0 {
            warn!("Migration lock was not held by {} at release", self.owner);
        }
        Ok(())
    }
}
