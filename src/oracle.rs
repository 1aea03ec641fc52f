//! Existence checks against the server's metadata catalog.
//!
//! Every check is scoped to the current schema (`DATABASE()`) unless the
//! object name is schema-qualified.

use crate::db::{SqlExecutor, Value, placeholders};
use crate::error::{MigrateError, Result};
use crate::sqlparse::ddl::ObjectKind;
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::debug;

#[async_trait]
pub trait ExistenceOracle: Send + Sync {
    async fn table_exists(&self, exec: &mut dyn SqlExecutor, table: &str) -> Result<bool>;

    async fn view_exists(&self, exec: &mut dyn SqlExecutor, view: &str) -> Result<bool>;

    async fn column_exists(
        &self,
        exec: &mut dyn SqlExecutor,
        table: &str,
        column: &str,
    ) -> Result<bool>;

    async fn index_exists(
        &self,
        exec: &mut dyn SqlExecutor,
        table: &str,
        index: &str,
    ) -> Result<bool>;

    async fn function_exists(&self, exec: &mut dyn SqlExecutor, function: &str) -> Result<bool>;

    async fn procedure_exists(&self, exec: &mut dyn SqlExecutor, procedure: &str)
    -> Result<bool>;

    async fn constraint_exists(
        &self,
        exec: &mut dyn SqlExecutor,
        table: &str,
        constraint: &str,
    ) -> Result<bool>;

    async fn trigger_exists(&self, exec: &mut dyn SqlExecutor, trigger: &str) -> Result<bool>;

    async fn database_exists(&self, exec: &mut dyn SqlExecutor, database: &str) -> Result<bool>;

    /// Tables from `tables` that do not exist, in input order. One round trip.
    async fn missing_tables(
        &self,
        exec: &mut dyn SqlExecutor,
        tables: &[String],
    ) -> Result<Vec<String>>;

    /// Column names in ordinal order.
    async fn table_columns(&self, exec: &mut dyn SqlExecutor, table: &str) -> Result<Vec<String>>;

    async fn primary_key_columns(
        &self,
        exec: &mut dyn SqlExecutor,
        table: &str,
    ) -> Result<Vec<String>>;

    /// Whether the object a parsed statement creates is already present.
    async fn object_exists(
        &self,
        exec: &mut dyn SqlExecutor,
        kind: ObjectKind,
        name: &str,
        table: Option<&str>,
    ) -> Result<bool> {
        match kind {
            ObjectKind::Table => self.table_exists(exec, name).await,
            ObjectKind::View => self.view_exists(exec, name).await,
            ObjectKind::Function => self.function_exists(exec, name).await,
            ObjectKind::Procedure => self.procedure_exists(exec, name).await,
            ObjectKind::Trigger => self.trigger_exists(exec, name).await,
            ObjectKind::Index => match table {
                Some(table) => self.index_exists(exec, table, name).await,
                None => Ok(false),
            },
            ObjectKind::Other => Ok(false),
        }
    }
}

/// Split `schema.name` into a schema filter and a local name.
fn split_name(name: &str) -> (Option<String>, String) {
    let clean = |s: &str| s.trim().trim_matches('`').to_string();
    match name.split_once('.') {
        Some((schema, local)) => (Some(clean(schema)), clean(local)),
        None => (None, clean(name)),
    }
}

/// `TABLE_SCHEMA = ?` or `TABLE_SCHEMA = DATABASE()`, plus the argument it needs.
fn schema_filter(column: &str, schema: Option<String>, args: &mut Vec<Value>) -> String {
    match schema {
        Some(schema) => {
            args.push(Value::Text(schema));
            format!("{} = ?", column)
        }
        None => format!("{} = DATABASE()", column),
    }
}

/// Oracle backed by `information_schema`.
#[derive(Debug, Default, Clone, Copy)]
pub struct InformationSchemaOracle;

impl InformationSchemaOracle {
    pub fn new() -> Self {
        Self
    }

    async fn count(
        &self,
        exec: &mut dyn SqlExecutor,
        kind: &'static str,
        name: &str,
        sql: &str,
        args: &[Value],
    ) -> Result<bool> {
        let count = exec
            .query_count(sql, args)
            .await
            .map_err(|source| MigrateError::ExistenceCheck {
                kind,
                name: name.to_string(),
                source,
            })?;
        debug!("{} '{}' exists: {}", kind, name, count > 0);
        Ok(count > 0)
    }

    async fn column_list(
        &self,
        exec: &mut dyn SqlExecutor,
        kind: &'static str,
        table: &str,
        sql: &str,
        args: &[Value],
    ) -> Result<Vec<String>> {
        let rows = exec
            .query(sql, args)
            .await
            .map_err(|source| MigrateError::ExistenceCheck {
                kind,
                name: table.to_string(),
                source,
            })?;
        Ok(rows.iter().filter_map(|row| row.text(0)).collect())
    }

    async fn routine_exists(
        &self,
        exec: &mut dyn SqlExecutor,
        kind: &'static str,
        routine_type: &str,
        name: &str,
    ) -> Result<bool> {
        let (schema, local) = split_name(name);
        let mut args = vec![Value::Text(local), Value::from(routine_type)];
        let scope = schema_filter("ROUTINE_SCHEMA", schema, &mut args);
        let sql = format!(
            "SELECT COUNT(*) FROM information_schema.ROUTINES WHERE ROUTINE_NAME = ? AND ROUTINE_TYPE = ? AND {}",
            scope
        );
        self.count(exec, kind, name, &sql, &args).await
    }
}

#[async_trait]
impl ExistenceOracle for InformationSchemaOracle {
    async fn table_exists(&self, exec: &mut dyn SqlExecutor, table: &str) -> Result<bool> {
        let (schema, local) = split_name(table);
        let mut args = vec![Value::Text(local)];
        let scope = schema_filter("TABLE_SCHEMA", schema, &mut args);
        let sql = format!(
            "SELECT COUNT(*) FROM information_schema.TABLES WHERE TABLE_NAME = ? AND TABLE_TYPE = 'BASE TABLE' AND {}",
            scope
        );
        self.count(exec, "table", table, &sql, &args).await
    }

    async fn view_exists(&self, exec: &mut dyn SqlExecutor, view: &str) -> Result<bool> {
        let (schema, local) = split_name(view);
        let mut args = vec![Value::Text(local)];
        let scope = schema_filter("TABLE_SCHEMA", schema, &mut args);
        let sql = format!(
            "SELECT COUNT(*) FROM information_schema.VIEWS WHERE TABLE_NAME = ? AND {}",
            scope
        );
        self.count(exec, "view", view, &sql, &args).await
    }

    async fn column_exists(
        &self,
        exec: &mut dyn SqlExecutor,
        table: &str,
        column: &str,
    ) -> Result<bool> {
        let (schema, local) = split_name(table);
        let mut args = vec![Value::Text(local), Value::from(column)];
        let scope = schema_filter("TABLE_SCHEMA", schema, &mut args);
        let sql = format!(
            "SELECT COUNT(*) FROM information_schema.COLUMNS WHERE TABLE_NAME = ? AND COLUMN_NAME = ? AND {}",
            scope
        );
        let label = format!("{}.{}", table, column);
        self.count(exec, "column", &label, &sql, &args).await
    }

    async fn index_exists(
        &self,
        exec: &mut dyn SqlExecutor,
        table: &str,
        index: &str,
    ) -> Result<bool> {
        let (schema, local) = split_name(table);
        let mut args = vec![Value::Text(local), Value::from(index)];
        let scope = schema_filter("TABLE_SCHEMA", schema, &mut args);
        let sql = format!(
            "SELECT COUNT(*) FROM information_schema.STATISTICS WHERE TABLE_NAME = ? AND INDEX_NAME = ? AND {}",
            scope
        );
        self.count(exec, "index", index, &sql, &args).await
    }

    async fn function_exists(&self, exec: &mut dyn SqlExecutor, function: &str) -> Result<bool> {
        self.routine_exists(exec, "function", "FUNCTION", function)
            .await
    }

    async fn procedure_exists(
        &self,
        exec: &mut dyn SqlExecutor,
        procedure: &str,
    ) -> Result<bool> {
        self.routine_exists(exec, "procedure", "PROCEDURE", procedure)
            .await
    }

    async fn constraint_exists(
        &self,
        exec: &mut dyn SqlExecutor,
        table: &str,
        constraint: &str,
    ) -> Result<bool> {
        let (schema, local) = split_name(table);
        let mut args = vec![Value::Text(local), Value::from(constraint)];
        let scope = schema_filter("TABLE_SCHEMA", schema, &mut args);
        let sql = format!(
            "SELECT COUNT(*) FROM information_schema.TABLE_CONSTRAINTS WHERE TABLE_NAME = ? AND CONSTRAINT_NAME = ? AND {}",
            scope
        );
        self.count(exec, "constraint", constraint, &sql, &args)
            .await
    }

    async fn trigger_exists(&self, exec: &mut dyn SqlExecutor, trigger: &str) -> Result<bool> {
        let (schema, local) = split_name(trigger);
        let mut args = vec![Value::Text(local)];
        let scope = schema_filter("TRIGGER_SCHEMA", schema, &mut args);
        let sql = format!(
            "SELECT COUNT(*) FROM information_schema.TRIGGERS WHERE TRIGGER_NAME = ? AND {}",
            scope
        );
        self.count(exec, "trigger", trigger, &sql, &args).await
    }

    async fn database_exists(&self, exec: &mut dyn SqlExecutor, database: &str) -> Result<bool> {
        let sql = "SELECT COUNT(*) FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = ?";
        self.count(exec, "database", database, sql, &[Value::from(database)])
            .await
    }

    async fn missing_tables(
        &self,
        exec: &mut dyn SqlExecutor,
        tables: &[String],
    ) -> Result<Vec<String>> {
        if tables.is_empty() {
            return Ok(Vec::new());
        }

        let mut qualified: Vec<&String> = Vec::new();
        let mut local_names: Vec<Value> = Vec::new();
        for table in tables {
            if table.contains('.') {
                qualified.push(table);
            } else {
                local_names.push(Value::Text(split_name(table).1));
            }
        }

        let mut found: HashSet<String> = HashSet::new();
        if !local_names.is_empty() {
            let sql = format!(
                "SELECT TABLE_NAME FROM information_schema.TABLES WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME IN ({})",
                placeholders(local_names.len())
            );
            let rows = exec
                .query(&sql, &local_names)
                .await
                .map_err(|source| MigrateError::ExistenceCheck {
                    kind: "table",
                    name: tables.join(", "),
                    source,
                })?;
            found.extend(
                rows.iter()
                    .filter_map(|row| row.text(0))
                    .map(|name| name.to_lowercase()),
            );
        }

        let mut missing = Vec::new();
        for table in tables {
            let present = if qualified.contains(&table) {
                self.table_exists(exec, table).await?
            } else {
                found.contains(&split_name(table).1.to_lowercase())
            };
            if !present {
                missing.push(table.clone());
            }
        }
        Ok(missing)
    }

    async fn table_columns(&self, exec: &mut dyn SqlExecutor, table: &str) -> Result<Vec<String>> {
        let (schema, local) = split_name(table);
        let mut args = vec![Value::Text(local)];
        let scope = schema_filter("TABLE_SCHEMA", schema, &mut args);
        let sql = format!(
            "SELECT COLUMN_NAME FROM information_schema.COLUMNS WHERE TABLE_NAME = ? AND {} ORDER BY ORDINAL_POSITION",
            scope
        );
        self.column_list(exec, "table columns", table, &sql, &args)
            .await
    }

    async fn primary_key_columns(
        &self,
        exec: &mut dyn SqlExecutor,
        table: &str,
    ) -> Result<Vec<String>> {
        let (schema, local) = split_name(table);
        let mut args = vec![Value::Text(local)];
        let scope = schema_filter("TABLE_SCHEMA", schema, &mut args);
        let sql = format!(
            "SELECT COLUMN_NAME FROM information_schema.KEY_COLUMN_USAGE WHERE TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY' AND {} ORDER BY ORDINAL_POSITION",
            scope
        );
        self.column_list(exec, "primary key", table, &sql, &args)
            .await
    }
}
