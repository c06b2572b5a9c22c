//! SQL console service

use weebase_core::executor::{SqlOutcome, execute_sql, explain};
use weebase_core::{Connection, QueryResult, SafetyPolicy};

use crate::error::ServiceResult;

/// Runs free-form SQL with a row cap on everything that returns rows
#[derive(Debug, Clone)]
pub struct SqlService {
    max_rows: usize,
}

impl SqlService {
    pub fn new(max_rows: usize) -> Self {
        Self { max_rows }
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Execute a console batch. Read-only mode refuses anything that writes
    /// and safe mode refuses DROP, ALTER and TRUNCATE.
    pub async fn execute_sql(
        &self,
        conn: &dyn Connection,
        sql: &str,
        transactional: bool,
        policy: &SafetyPolicy,
    ) -> ServiceResult<SqlOutcome> {
        Ok(execute_sql(conn, sql, transactional, policy, self.max_rows).await?)
    }

    /// Execution plan rows for a single statement
    pub async fn explain_sql(
        &self,
        conn: &dyn Connection,
        sql: &str,
    ) -> ServiceResult<QueryResult> {
        Ok(explain(conn, sql, self.max_rows).await?)
    }
}

impl Default for SqlService {
    fn default() -> Self {
        Self::new(weebase_settings::DEFAULT_MAX_RESULT_ROWS)
    }
}
