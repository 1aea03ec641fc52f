use crate::db::value::{Row, Value};
use async_trait::async_trait;

/// Result of a single database round trip.
pub type DbResult<T> = std::result::Result<T, sqlx::Error>;

/// Read/write capability shared by direct connections and open transactions,
/// so the same migration body runs unchanged inside or outside a transaction.
#[async_trait]
pub trait SqlExecutor: Send {
    /// Run a statement and return the number of affected rows.
    async fn execute(&mut self, sql: &str, args: &[Value]) -> DbResult<u64>;

    async fn query(&mut self, sql: &str, args: &[Value]) -> DbResult<Vec<Row>>;

    async fn query_row(&mut self, sql: &str, args: &[Value]) -> DbResult<Option<Row>> {
        Ok(self.query(sql, args).await?.into_iter().next())
    }

    /// Convenience for `SELECT COUNT(*) ...` style queries.
    async fn query_count(&mut self, sql: &str, args: &[Value]) -> DbResult<i64> {
        let row = self.query_row(sql, args).await?;
        Ok(row
            .and_then(|r| r.get(0).and_then(Value::as_i64))
            .unwrap_or(0))
    }
}

/// An open transaction. Consumed by `commit`/`rollback`, so it can never be
/// reused afterwards.
#[async_trait]
pub trait Transaction: SqlExecutor {
    fn executor(&mut self) -> &mut dyn SqlExecutor;

    async fn commit(self: Box<Self>) -> DbResult<()>;

    async fn rollback(self: Box<Self>) -> DbResult<()>;
}

/// A handle to one logical database.
#[async_trait]
pub trait Database: SqlExecutor + Sync {
    /// Logical database name, used for error attribution.
    fn name(&self) -> &str;

    fn executor(&mut self) -> &mut dyn SqlExecutor;

    async fn begin(&self) -> DbResult<Box<dyn Transaction>>;

    /// Cheap clone sharing the same underlying pool.
    fn clone_handle(&self) -> Box<dyn Database>;

    async fn close(&self);
}
