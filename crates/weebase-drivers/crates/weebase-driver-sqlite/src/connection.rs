//! SQLite connection implementation

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection as RusqliteConnection, OpenFlags, params_from_iter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use weebase_core::{
    ColumnMeta, Connection, QueryResult, Result, Row, StatementResult, Transaction, Value,
    WeebaseError,
};

/// SQLite connection wrapper
pub struct SqliteConnection {
    conn: Arc<Mutex<RusqliteConnection>>,
    closed: AtomicBool,
}

impl SqliteConnection {
    /// Open a SQLite database
    pub fn open(path: &str) -> Result<Self> {
        tracing::info!(path = %path, "opening SQLite database");
        let expanded_path = Self::expand_path(path)?;

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = if expanded_path == ":memory:" {
            RusqliteConnection::open_in_memory().map_err(|e| {
                WeebaseError::Connection(format!("Failed to open in-memory database: {}", e))
            })?
        } else {
            if !expanded_path.starts_with("file:") {
                let file_path = std::path::Path::new(&expanded_path);
                if let Some(parent) = file_path.parent()
                    && !parent.exists()
                {
                    return Err(WeebaseError::Connection(format!(
                        "Parent directory does not exist: {}",
                        parent.display()
                    )));
                }
            }

            RusqliteConnection::open_with_flags(&expanded_path, flags).map_err(|e| {
                WeebaseError::Connection(format!(
                    "Failed to open SQLite database at '{}': {}",
                    expanded_path, e
                ))
            })?
        };

        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| {
                WeebaseError::Connection(format!("Failed to enable foreign keys: {}", e))
            })?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| WeebaseError::Connection(format!("Failed to set journal mode: {}", e)))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| {
                WeebaseError::Connection(format!("Failed to set synchronous mode: {}", e))
            })?;

        tracing::info!(path = %expanded_path, "SQLite database connection established");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            closed: AtomicBool::new(false),
        })
    }

    /// Expand `~/` to the home directory and make relative paths absolute
    fn expand_path(path: &str) -> Result<String> {
        let path = path.trim();
        if path.is_empty() || path == ":memory:" {
            return Ok(":memory:".to_string());
        }
        if path.starts_with("file:") {
            return Ok(path.to_string());
        }

        let expanded = if let Some(rest) = path.strip_prefix("~/") {
            let home = dirs::home_dir().ok_or_else(|| {
                WeebaseError::Configuration("Unable to determine HOME directory".into())
            })?;
            home.join(rest)
        } else if path.starts_with('~') {
            return Err(WeebaseError::Configuration(
                "User-specific home directories (~user) are not supported".into(),
            ));
        } else {
            std::path::PathBuf::from(path)
        };

        let absolute = if expanded.is_relative() {
            std::env::current_dir()?.join(expanded)
        } else {
            expanded
        };
        Ok(absolute.to_string_lossy().to_string())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WeebaseError::Connection("connection is closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    fn driver_name(&self) -> &str {
        "sqlite"
    }

    #[tracing::instrument(
        skip(self, sql, params),
        fields(sql_preview = %sql.chars().take(100).collect::<String>())
    )]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.ensure_open()?;
        let conn = self.conn.lock();
        run_execute(&conn, sql, params)
    }

    #[tracing::instrument(
        skip(self, sql, params),
        fields(sql_preview = %sql.chars().take(100).collect::<String>())
    )]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.ensure_open()?;
        let conn = self.conn.lock();
        run_query(&conn, sql, params, None)
    }

    #[tracing::instrument(
        skip(self, sql, params),
        fields(sql_preview = %sql.chars().take(100).collect::<String>())
    )]
    async fn query_capped(
        &self,
        sql: &str,
        params: &[Value],
        max_rows: usize,
    ) -> Result<QueryResult> {
        self.ensure_open()?;
        let conn = self.conn.lock();
        run_query(&conn, sql, params, Some(max_rows))
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        self.ensure_open()?;
        tracing::debug!("beginning SQLite transaction");
        {
            let conn = self.conn.lock();
            // DEFERRED takes the write lock on the first write
            conn.execute_batch("BEGIN DEFERRED")
                .map_err(|e| WeebaseError::execution("begin transaction", e))?;
        }
        Ok(Box::new(SqliteTransaction {
            conn: Arc::clone(&self.conn),
            committed: false,
            rolled_back: false,
        }))
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::info!("closing SQLite connection");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// SQLite transaction sharing the connection's lock
pub struct SqliteTransaction {
    conn: Arc<Mutex<RusqliteConnection>>,
    committed: bool,
    rolled_back: bool,
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if !self.committed && !self.rolled_back {
            tracing::warn!(
                "SQLite transaction dropped without commit or rollback, issuing automatic rollback"
            );
            let conn = self.conn.lock();
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                tracing::error!(error = %e, "automatic rollback on drop failed");
            }
        }
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        if self.rolled_back {
            return Err(WeebaseError::execution("commit", "transaction already rolled back"));
        }
        if self.committed {
            return Err(WeebaseError::execution("commit", "transaction already committed"));
        }

        let conn = self.conn.lock();
        conn.execute_batch("COMMIT")
            .map_err(|e| WeebaseError::execution("commit transaction", e))?;
        drop(conn);

        self.committed = true;
        tracing::debug!("SQLite transaction committed");
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        if self.committed {
            return Err(WeebaseError::execution("rollback", "transaction already committed"));
        }
        if self.rolled_back {
            return Ok(());
        }

        let conn = self.conn.lock();
        conn.execute_batch("ROLLBACK")
            .map_err(|e| WeebaseError::execution("rollback transaction", e))?;
        drop(conn);

        self.rolled_back = true;
        tracing::debug!("SQLite transaction rolled back");
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        tracing::debug!(
            sql_preview = %sql.chars().take(100).collect::<String>(),
            "executing query in SQLite transaction"
        );
        let conn = self.conn.lock();
        run_query(&conn, sql, params, None)
    }

    async fn query_capped(
        &self,
        sql: &str,
        params: &[Value],
        max_rows: usize,
    ) -> Result<QueryResult> {
        tracing::debug!(
            sql_preview = %sql.chars().take(100).collect::<String>(),
            max_rows,
            "executing capped query in SQLite transaction"
        );
        let conn = self.conn.lock();
        run_query(&conn, sql, params, Some(max_rows))
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        tracing::debug!(
            sql_preview = %sql.chars().take(100).collect::<String>(),
            "executing statement in SQLite transaction"
        );
        let conn = self.conn.lock();
        run_execute(&conn, sql, params)
    }
}

/// Run a statement. Parameterless text may hold several statements and runs
/// as a batch, reporting the changes of the last one.
fn run_execute(conn: &RusqliteConnection, sql: &str, params: &[Value]) -> Result<StatementResult> {
    let affected_rows = if params.is_empty() {
        conn.execute_batch(sql)
            .map_err(|e| WeebaseError::execution("execute statement", e))?;
        conn.changes()
    } else {
        let rusqlite_params = values_to_rusqlite(params);
        conn.execute(sql, params_from_iter(rusqlite_params.iter()))
            .map_err(|e| WeebaseError::execution("execute statement", e))? as u64
    };

    tracing::debug!(affected_rows, "statement executed");
    Ok(StatementResult { affected_rows })
}

/// Run a query, reading at most `max_rows` rows when a cap is given
fn run_query(
    conn: &RusqliteConnection,
    sql: &str,
    params: &[Value],
    max_rows: Option<usize>,
) -> Result<QueryResult> {
    let start_time = std::time::Instant::now();
    let rusqlite_params = values_to_rusqlite(params);

    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| WeebaseError::execution("prepare query", e))?;

    let mut column_names: Vec<String> = Vec::with_capacity(stmt.column_count());
    let mut columns: Vec<ColumnMeta> = Vec::with_capacity(stmt.column_count());
    for (idx, col) in stmt.columns().iter().enumerate() {
        let name = col.name().to_string();
        // declared type from CREATE TABLE, absent for expressions
        let data_type = col.decl_type().unwrap_or("DYNAMIC").to_string();
        column_names.push(name.clone());
        columns.push(ColumnMeta::result_column(name, data_type, idx));
    }

    let mut rows = Vec::new();
    let mut truncated = false;
    let mut query_rows = stmt
        .query(params_from_iter(rusqlite_params.iter()))
        .map_err(|e| WeebaseError::execution("execute query", e))?;

    while let Some(row) = query_rows
        .next()
        .map_err(|e| WeebaseError::execution("fetch row", e))?
    {
        if max_rows.is_some_and(|max| rows.len() >= max) {
            truncated = true;
            break;
        }
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(rusqlite_to_value(row, i)?);
        }
        rows.push(Row::new(column_names.clone(), values));
    }

    let execution_time_ms = start_time.elapsed().as_millis() as u64;
    tracing::debug!(
        row_count = rows.len(),
        truncated,
        execution_time_ms,
        "query executed successfully"
    );
    Ok(QueryResult {
        id: uuid::Uuid::new_v4(),
        columns,
        total_rows: (!truncated).then_some(rows.len() as u64),
        rows,
        truncated,
        affected_rows: 0,
        execution_time_ms,
    })
}

fn values_to_rusqlite(values: &[Value]) -> Vec<rusqlite::types::Value> {
    values.iter().map(value_to_rusqlite).collect()
}

fn value_to_rusqlite(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(i64::from(*b)),
        Value::Int8(i) => Sql::Integer(*i as i64),
        Value::Int16(i) => Sql::Integer(*i as i64),
        Value::Int32(i) => Sql::Integer(*i as i64),
        Value::Int64(i) => Sql::Integer(*i),
        Value::Float32(f) => Sql::Real(*f as f64),
        Value::Float64(f) => Sql::Real(*f),
        Value::Decimal(d) => Sql::Text(d.clone()),
        Value::String(s) => Sql::Text(s.clone()),
        Value::Bytes(b) => Sql::Blob(b.clone()),
        Value::Date(d) => Sql::Text(d.to_string()),
        Value::Time(t) => Sql::Text(t.to_string()),
        Value::DateTime(dt) => Sql::Text(dt.to_string()),
        Value::DateTimeUtc(dt) => Sql::Text(dt.to_rfc3339()),
        Value::Json(j) => Sql::Text(j.to_string()),
        Value::Uuid(u) => Sql::Text(u.to_string()),
    }
}

fn rusqlite_to_value(row: &rusqlite::Row, idx: usize) -> Result<Value> {
    use rusqlite::types::ValueRef;

    let value_ref = row
        .get_ref(idx)
        .map_err(|e| WeebaseError::execution("read column", e))?;

    Ok(match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).to_string()),
        // text stored in untyped columns can arrive as a blob
        ValueRef::Blob(b) => match std::str::from_utf8(b) {
            Ok(s) => Value::String(s.to_string()),
            Err(_) => Value::Bytes(b.to_vec()),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn users() -> SqliteConnection {
        let conn = SqliteConnection::open(":memory:").unwrap();
        conn.execute(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL);
             INSERT INTO users (name, score) VALUES ('ann', 1.5), ('bob', NULL), ('cy', 3.0);",
            &[],
        )
        .await
        .unwrap();
        conn
    }

    #[tokio::test]
    async fn test_query_with_params_and_decl_types() {
        let conn = users().await;
        let result = conn
            .query("SELECT id, name FROM users WHERE name = ?", &[Value::from("bob")])
            .await
            .unwrap();

        assert_eq!(result.row_count(), 1);
        assert_eq!(result.columns[0].data_type, "INTEGER");
        assert_eq!(result.rows[0].get_by_name("id"), Some(&Value::Int64(2)));
    }

    #[tokio::test]
    async fn test_query_capped_stops_early() {
        let conn = users().await;
        let result = conn.query_capped("SELECT * FROM users", &[], 2).await.unwrap();
        assert_eq!(result.row_count(), 2);
        assert!(result.truncated);
        assert_eq!(result.total_rows, None);

        let all = conn.query_capped("SELECT * FROM users", &[], 3).await.unwrap();
        assert!(!all.truncated);
    }

    #[tokio::test]
    async fn test_transaction_query_capped_stops_early() {
        let conn = users().await;
        let tx = conn.begin_transaction().await.unwrap();
        let result = tx.query_capped("SELECT * FROM users", &[], 1).await.unwrap();
        assert_eq!(result.row_count(), 1);
        assert!(result.truncated);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_execute_reports_affected_rows() {
        let conn = users().await;
        let result = conn
            .execute("UPDATE users SET score = ? WHERE score IS NOT NULL", &[Value::Float64(0.0)])
            .await
            .unwrap();
        assert_eq!(result.affected_rows, 2);

        let batch = conn.execute("DELETE FROM users WHERE id = 1", &[]).await.unwrap();
        assert_eq!(batch.affected_rows, 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let conn = users().await;
        let tx = conn.begin_transaction().await.unwrap();
        tx.execute("DELETE FROM users", &[]).await.unwrap();
        tx.rollback().await.unwrap();

        let count = conn.query("SELECT COUNT(*) FROM users", &[]).await.unwrap();
        assert_eq!(count.scalar(), Some(&Value::Int64(3)));
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let conn = users().await;
        {
            let tx = conn.begin_transaction().await.unwrap();
            tx.execute("DELETE FROM users", &[]).await.unwrap();
        }
        let count = conn.query("SELECT COUNT(*) FROM users", &[]).await.unwrap();
        assert_eq!(count.scalar(), Some(&Value::Int64(3)));
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_work() {
        let conn = users().await;
        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert!(conn.is_closed());
        assert!(matches!(
            conn.query("SELECT 1", &[]).await,
            Err(WeebaseError::Connection(_))
        ));
    }

    #[test]
    fn test_open_rejects_missing_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("app.db");
        assert!(SqliteConnection::open(path.to_str().unwrap()).is_err());
    }
}
