//! Common test utilities and mocks

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use weebase_core::{
    ColumnMeta, Connection, QueryResult, Result, Row, StatementResult, Transaction, Value,
    WeebaseError,
};
use weebase_driver_sqlite::SqliteConnection;

/// Mock connection that records every statement it receives.
///
/// Queries containing a registered pattern answer with the matching result;
/// everything else gets an empty result. Statements run inside a transaction
/// are recorded in the same log.
pub struct MockConnection {
    pub driver: String,
    pub should_fail: bool,
    pub query_responses: Vec<(String, QueryResult)>,
    pub affected_rows: u64,
    /// Log of all SQL statements, in the order they arrived
    pub log: Arc<parking_lot::Mutex<Vec<String>>>,
}

impl MockConnection {
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            should_fail: false,
            query_responses: vec![],
            affected_rows: 1,
            log: Arc::new(parking_lot::Mutex::new(Vec::new())),
        }
    }

    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Register a response for queries containing the given SQL pattern.
    pub fn with_query_response(
        mut self,
        sql_contains: impl Into<String>,
        result: QueryResult,
    ) -> Self {
        self.query_responses.push((sql_contains.into(), result));
        self
    }

    pub fn calls(&self) -> usize {
        self.log.lock().len()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn record(&self, sql: &str) -> Result<()> {
        self.log.lock().push(sql.to_string());
        if self.should_fail {
            return Err(WeebaseError::execution("mock", "statement failed"));
        }
        Ok(())
    }

    fn respond(&self, sql: &str) -> QueryResult {
        self.query_responses
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_else(QueryResult::empty)
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn driver_name(&self) -> &str {
        &self.driver
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<StatementResult> {
        self.record(sql)?;
        Ok(StatementResult {
            affected_rows: self.affected_rows,
        })
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
        self.record(sql)?;
        Ok(self.respond(sql))
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        self.record("BEGIN")?;
        Ok(Box::new(MockTransaction {
            log: self.log.clone(),
            responses: self.query_responses.clone(),
            affected_rows: self.affected_rows,
        }))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }
}

pub struct MockTransaction {
    log: Arc<parking_lot::Mutex<Vec<String>>>,
    responses: Vec<(String, QueryResult)>,
    affected_rows: u64,
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.log.lock().push("COMMIT".to_string());
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.log.lock().push("ROLLBACK".to_string());
        Ok(())
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
        self.log.lock().push(sql.to_string());
        Ok(self
            .responses
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_else(QueryResult::empty))
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<StatementResult> {
        self.log.lock().push(sql.to_string());
        Ok(StatementResult {
            affected_rows: self.affected_rows,
        })
    }
}

/// Build a query result from column names and row values
pub fn mock_query_result(columns: Vec<&str>, rows: Vec<Vec<Value>>) -> QueryResult {
    let names: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
    let mut result = QueryResult::empty();
    result.columns = names
        .iter()
        .enumerate()
        .map(|(i, name)| ColumnMeta::result_column(name.clone(), "TEXT", i))
        .collect();
    result.rows = rows.into_iter().map(|values| Row::new(names.clone(), values)).collect();
    result.total_rows = Some(result.rows.len() as u64);
    result
}

pub fn count_result(count: i64) -> QueryResult {
    mock_query_result(vec!["count"], vec![vec![Value::Int64(count)]])
}

/// In-memory SQLite database with a seeded `users` table
pub async fn seeded_sqlite() -> Arc<dyn Connection> {
    let conn = SqliteConnection::open(":memory:").expect("Failed to open in-memory database");
    conn.execute(
        "CREATE TABLE users (
             id INTEGER PRIMARY KEY,
             name TEXT NOT NULL,
             team TEXT DEFAULT 'core'
         );
         CREATE VIEW core_users AS SELECT id, name FROM users WHERE team = 'core';
         INSERT INTO users (id, name, team) VALUES
             (1, 'alice', 'core'),
             (2, 'bob', 'ops'),
             (3, 'carol', 'ops');",
        &[],
    )
    .await
    .expect("Failed to seed database");
    Arc::new(conn)
}

pub async fn user_names(conn: &dyn Connection) -> Vec<String> {
    conn.query("SELECT name FROM users ORDER BY id", &[])
        .await
        .expect("Failed to read users")
        .rows
        .iter()
        .filter_map(|row| row.get(0).and_then(Value::as_str).map(str::to_string))
        .collect()
}
