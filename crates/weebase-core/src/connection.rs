//! Connection trait and transaction handling

use crate::{Dialect, QueryResult, Result, StatementResult, Value};
use async_trait::async_trait;

/// A live database handle
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "sqlite", "postgres", "mysql")
    fn driver_name(&self) -> &str;

    /// Dialect used to build SQL for this connection
    fn dialect(&self) -> Dialect {
        Dialect::normalize(self.driver_name())
    }

    /// Execute a statement that modifies data (INSERT/UPDATE/DELETE/DDL)
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Execute a query that returns rows (SELECT)
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Run a query and keep at most `max_rows` rows, flagging the result as
    /// truncated when more were produced.
    ///
    /// Drivers that can stop reading early should override this.
    async fn query_capped(
        &self,
        sql: &str,
        params: &[Value],
        max_rows: usize,
    ) -> Result<QueryResult> {
        Ok(self.query(sql, params).await?.cap_rows(max_rows))
    }

    /// Verify the handle is usable
    async fn ping(&self) -> Result<()> {
        self.query("SELECT 1", &[]).await.map(|_| ())
    }

    /// Begin a transaction
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>>;

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;
}

/// A database transaction
///
/// Dropping a transaction that was neither committed nor rolled back must
/// roll it back.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;

    /// Execute a query within the transaction
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Run a query within the transaction and keep at most `max_rows` rows.
    ///
    /// Drivers that can stop reading early should override this.
    async fn query_capped(
        &self,
        sql: &str,
        params: &[Value],
        max_rows: usize,
    ) -> Result<QueryResult> {
        Ok(self.query(sql, params).await?.cap_rows(max_rows))
    }

    /// Execute a statement within the transaction
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;
}
