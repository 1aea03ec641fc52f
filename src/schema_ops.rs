//! Idempotent schema operations: each helper consults the existence oracle
//! first and only touches the database when the target state is not reached.

use crate::db::{SqlExecutor, quote_ident};
use crate::error::{MigrateError, Result};
use crate::oracle::ExistenceOracle;
use crate::sqlparse::ddl::{ObjectKind, Statement};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OpOutcome {
    Applied,
    Skipped,
}

impl OpOutcome {
    pub fn is_applied(self) -> bool {
        self == OpOutcome::Applied
    }
}

pub struct SchemaOps<'a> {
    exec: &'a mut dyn SqlExecutor,
    oracle: &'a dyn ExistenceOracle,
    database: String,
}

impl<'a> SchemaOps<'a> {
    pub fn new(
        exec: &'a mut dyn SqlExecutor,
        oracle: &'a dyn ExistenceOracle,
        database: impl Into<String>,
    ) -> Self {
        Self {
            exec,
            oracle,
            database: database.into(),
        }
    }

    async fn run(&mut self, object: String, sql: &str) -> Result<OpOutcome> {
        debug!("Executing on {}: {}", self.database, sql);
        self.exec
            .execute(sql, &[])
            .await
            .map_err(|e| MigrateError::execution(&self.database, &object, e))?;
        info!("{} on {}", object, self.database);
        Ok(OpOutcome::Applied)
    }

    fn skip(&self, what: &str) -> Result<OpOutcome> {
        debug!("Skipping {} on {}: already in place", what, self.database);
        Ok(OpOutcome::Skipped)
    }

    /// `definition` is the column list, e.g. `id INT PRIMARY KEY, name TEXT`.
    pub async fn create_table(&mut self, table: &str, definition: &str) -> Result<OpOutcome> {
        if self.oracle.table_exists(self.exec, table).await? {
            return self.skip(&format!("create table {}", table));
        }
        let sql = format!("CREATE TABLE {} ({})", quote_ident(table), definition);
        self.run(format!("create table {}", table), &sql).await
    }

    pub async fn drop_table(&mut self, table: &str) -> Result<OpOutcome> {
        if !self.oracle.table_exists(self.exec, table).await? {
            return self.skip(&format!("drop table {}", table));
        }
        let sql = format!("DROP TABLE {}", quote_ident(table));
        self.run(format!("drop table {}", table), &sql).await
    }

    pub async fn add_column(
        &mut self,
        table: &str,
        column: &str,
        definition: &str,
    ) -> Result<OpOutcome> {
        if self.oracle.column_exists(self.exec, table, column).await? {
            return self.skip(&format!("add column {}.{}", table, column));
        }
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_ident(table),
            quote_ident(column),
            definition
        );
        self.run(format!("add column {}.{}", table, column), &sql)
            .await
    }

    pub async fn drop_column(&mut self, table: &str, column: &str) -> Result<OpOutcome> {
        if !self.oracle.column_exists(self.exec, table, column).await? {
            return self.skip(&format!("drop column {}.{}", table, column));
        }
        let sql = format!(
            "ALTER TABLE {} DROP COLUMN {}",
            quote_ident(table),
            quote_ident(column)
        );
        self.run(format!("drop column {}.{}", table, column), &sql)
            .await
    }

    pub async fn create_index(
        &mut self,
        table: &str,
        index: &str,
        columns: &[&str],
        unique: bool,
    ) -> Result<OpOutcome> {
        if self.oracle.index_exists(self.exec, table, index).await? {
            return self.skip(&format!("create index {}", index));
        }
        let columns = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "CREATE {}INDEX {} ON {} ({})",
            if unique { "UNIQUE " } else { "" },
            quote_ident(index),
            quote_ident(table),
            columns
        );
        self.run(format!("create index {}", index), &sql).await
    }

    pub async fn drop_index(&mut self, table: &str, index: &str) -> Result<OpOutcome> {
        if !self.oracle.index_exists(self.exec, table, index).await? {
            return self.skip(&format!("drop index {}", index));
        }
        let sql = format!("DROP INDEX {} ON {}", quote_ident(index), quote_ident(table));
        self.run(format!("drop index {}", index), &sql).await
    }

    pub async fn create_view(&mut self, view: &str, query: &str) -> Result<OpOutcome> {
        if self.oracle.view_exists(self.exec, view).await? {
            return self.skip(&format!("create view {}", view));
        }
        let sql = format!("CREATE VIEW {} AS {}", quote_ident(view), query);
        self.run(format!("create view {}", view), &sql).await
    }

    pub async fn drop_view(&mut self, view: &str) -> Result<OpOutcome> {
        if !self.oracle.view_exists(self.exec, view).await? {
            return self.skip(&format!("drop view {}", view));
        }
        let sql = format!("DROP VIEW {}", quote_ident(view));
        self.run(format!("drop view {}", view), &sql).await
    }

    /// `definition` is the full `CREATE FUNCTION ...` statement.
    pub async fn create_function(&mut self, function: &str, definition: &str) -> Result<OpOutcome> {
        if self.oracle.function_exists(self.exec, function).await? {
            return self.skip(&format!("create function {}", function));
        }
        self.run(format!("create function {}", function), definition)
            .await
    }

    pub async fn drop_function(&mut self, function: &str) -> Result<OpOutcome> {
        if !self.oracle.function_exists(self.exec, function).await? {
            return self.skip(&format!("drop function {}", function));
        }
        let sql = format!("DROP FUNCTION {}", quote_ident(function));
        self.run(format!("drop function {}", function), &sql).await
    }

    /// Procedures are always recreated so their body tracks the definition.
    pub async fn create_procedure(
        &mut self,
        procedure: &str,
        definition: &str,
    ) -> Result<OpOutcome> {
        if self.oracle.procedure_exists(self.exec, procedure).await? {
            let sql = format!("DROP PROCEDURE {}", quote_ident(procedure));
            self.run(format!("drop procedure {}", procedure), &sql)
                .await?;
        }
        self.run(format!("create procedure {}", procedure), definition)
            .await
    }

    pub async fn create_trigger(&mut self, trigger: &str, definition: &str) -> Result<OpOutcome> {
        if self.oracle.trigger_exists(self.exec, trigger).await? {
            return self.skip(&format!("create trigger {}", trigger));
        }
        self.run(format!("create trigger {}", trigger), definition)
            .await
    }

    /// Execute a parsed statement unless the object it creates already exists.
    /// `OTHER` statements always run.
    pub async fn ensure_statement(&mut self, statement: &Statement) -> Result<OpOutcome> {
        let exists = self
            .oracle
            .object_exists(
                self.exec,
                statement.kind,
                &statement.name,
                statement.table.as_deref(),
            )
            .await?;
        if exists {
            return self.skip(&statement.label());
        }
        if statement.kind == ObjectKind::Other {
            debug!("No existence check for {}", statement.label());
        }
        self.run(statement.label(), &statement.sql).await
    }
}
