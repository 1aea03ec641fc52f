use crate::db::executor::{Database, DbResult, SqlExecutor, Transaction};
use crate::db::value::{Row, Value};
use async_trait::async_trait;
use sqlx::mysql::{MySqlArguments, MySqlPool, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Executor, MySql, Row as _, TypeInfo, ValueRef};
use tracing::debug;

/// Pool-backed connection to one MySQL database.
#[derive(Clone)]
pub struct MySqlDatabase {
    name: String,
    pool: MySqlPool,
}

impl MySqlDatabase {
    pub fn new(name: impl Into<String>, pool: MySqlPool) -> Self {
        Self {
            name: name.into(),
            pool,
        }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

/// An open transaction on a [`MySqlDatabase`].
pub struct MySqlTransaction {
    tx: sqlx::Transaction<'static, MySql>,
}

fn bind_args<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    args: &'q [Value],
) -> Query<'q, MySql, MySqlArguments> {
    for arg in args {
        query = match arg {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Int(i) => query.bind(*i),
            Value::Float(f) => query.bind(*f),
            Value::Text(s) => query.bind(s.as_str()),
            Value::Bytes(b) => query.bind(b.as_slice()),
            Value::Date(d) => query.bind(*d),
            Value::Time(t) => query.bind(*t),
            Value::Timestamp(ts) => query.bind(*ts),
        };
    }
    query
}

/// Decode a MySQL row into engine values, driven by each column's type name.
pub fn decode_row(row: &MySqlRow) -> DbResult<Row> {
    let mut columns = Vec::with_capacity(row.columns().len());
    let mut values = Vec::with_capacity(row.columns().len());

    for (i, column) in row.columns().iter().enumerate() {
        columns.push(column.name().to_string());

        if row.try_get_raw(i)?.is_null() {
            values.push(Value::Null);
            continue;
        }

        let type_name = column.type_info().name().to_uppercase();
        let value = match type_name.as_str() {
            "BOOLEAN" => Value::Bool(row.try_get::<bool, _>(i)?),
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
                Value::Int(row.try_get::<i64, _>(i)?)
            }
            t if t.ends_with("UNSIGNED") => {
                let v = row.try_get::<u64, _>(i)?;
                i64::try_from(v)
                    .map(Value::Int)
                    .unwrap_or_else(|_| Value::Text(v.to_string()))
            }
            "FLOAT" | "DOUBLE" => Value::Float(row.try_get::<f64, _>(i)?),
            "DATE" => Value::Date(row.try_get::<chrono::NaiveDate, _>(i)?),
            "TIME" => Value::Time(row.try_get::<chrono::NaiveTime, _>(i)?),
            "DATETIME" | "TIMESTAMP" => {
                Value::Timestamp(row.try_get::<chrono::NaiveDateTime, _>(i)?)
            }
            "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
            | "GEOMETRY" => Value::Bytes(row.try_get_unchecked::<Vec<u8>, _>(i)?),
            // DECIMAL, JSON, ENUM, SET and the character types all arrive as text
            _ => Value::Text(row.try_get_unchecked::<String, _>(i)?),
        };
        values.push(value);
    }

    Ok(Row::new(columns, values))
}

#[async_trait]
impl SqlExecutor for MySqlDatabase {
    async fn execute(&mut self, sql: &str, args: &[Value]) -> DbResult<u64> {
        debug!("Executing on {}: {}", self.name, sql);
        // Statements without parameters go over the text protocol, which also
        // accepts statements MySQL refuses to prepare (CREATE PROCEDURE, ...).
        let result = if args.is_empty() {
            self.pool.execute(sql).await?
        } else {
            bind_args(sqlx::query(sql), args).execute(&self.pool).await?
        };
        Ok(result.rows_affected())
    }

    async fn query(&mut self, sql: &str, args: &[Value]) -> DbResult<Vec<Row>> {
        let rows = if args.is_empty() {
            self.pool.fetch_all(sql).await?
        } else {
            bind_args(sqlx::query(sql), args)
                .fetch_all(&self.pool)
                .await?
        };
        rows.iter().map(decode_row).collect()
    }
}

#[async_trait]
impl Database for MySqlDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn executor(&mut self) -> &mut dyn SqlExecutor {
        self
    }

    async fn begin(&self) -> DbResult<Box<dyn Transaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(MySqlTransaction { tx }))
    }

    fn clone_handle(&self) -> Box<dyn Database> {
        Box::new(self.clone())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SqlExecutor for MySqlTransaction {
    async fn execute(&mut self, sql: &str, args: &[Value]) -> DbResult<u64> {
        debug!("Executing in transaction: {}", sql);
        let result = if args.is_empty() {
            (&mut *self.tx).execute(sql).await?
        } else {
            bind_args(sqlx::query(sql), args)
                .execute(&mut *self.tx)
                .await?
        };
        Ok(result.rows_affected())
    }

    async fn query(&mut self, sql: &str, args: &[Value]) -> DbResult<Vec<Row>> {
        let rows = if args.is_empty() {
            (&mut *self.tx).fetch_all(sql).await?
        } else {
            bind_args(sqlx::query(sql), args)
                .fetch_all(&mut *self.tx)
                .await?
        };
        rows.iter().map(decode_row).collect()
    }
}

#[async_trait]
impl Transaction for MySqlTransaction {
    fn executor(&mut self) -> &mut dyn SqlExecutor {
        self
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        self.tx.commit().await
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        self.tx.rollback().await
    }
}
