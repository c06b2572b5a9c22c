//! MySQL connection implementation

use async_trait::async_trait;
use futures::TryStreamExt;
use mysql_async::{
    Column, Conn, Params, Pool, QueryResult as MySqlQueryResult, Row as MySqlRow,
    consts::ColumnType, prelude::*,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use weebase_core::{
    ColumnMeta, Connection, QueryResult, Result, Row, StatementResult, Transaction, Value,
    WeebaseError,
};

use crate::dsn::mysql_opts;

fn format_mysql_error(error: &mysql_async::Error) -> String {
    let mysql_async::Error::Server(server) = error else {
        return error.to_string();
    };

    match server.code {
        1062 => format!("duplicate value violates unique constraint: {}", server.message),
        1451 | 1452 => format!("foreign key violation: {}", server.message),
        1048 | 1364 => format!("null value violates not-null constraint: {}", server.message),
        1292 => format!("invalid datetime format: {}", server.message),
        code => format!("{} (code: {})", server.message, code),
    }
}

fn execution_error(operation: &str, error: &mysql_async::Error) -> WeebaseError {
    WeebaseError::execution(operation, format_mysql_error(error))
}

/// MySQL connection backed by a single-connection pool
pub struct MySqlConnection {
    pool: Pool,
    closed: AtomicBool,
}

impl MySqlConnection {
    /// Connect with a `mysql://` URL or a `user:pass@tcp(host:port)/db` string
    pub async fn connect(dsn: &str) -> Result<Self> {
        let opts = mysql_opts(dsn)?;
        tracing::info!(
            host = %opts.ip_or_hostname(),
            port = opts.tcp_port(),
            database = ?opts.db_name(),
            "connecting to MySQL database"
        );

        let pool = Pool::new(opts);
        // acquire and release once to surface bad credentials now
        let conn = pool
            .get_conn()
            .await
            .map_err(|e| WeebaseError::Connection(format!("Failed to connect to MySQL: {}", e)))?;
        drop(conn);

        tracing::info!("MySQL connection established");
        Ok(Self {
            pool,
            closed: AtomicBool::new(false),
        })
    }

    async fn get_conn(&self) -> Result<Conn> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WeebaseError::Connection("connection is closed".into()));
        }
        self.pool
            .get_conn()
            .await
            .map_err(|e| WeebaseError::Connection(format!("Failed to get MySQL connection: {}", e)))
    }
}

#[async_trait]
impl Connection for MySqlConnection {
    fn driver_name(&self) -> &str {
        "mysql"
    }

    #[tracing::instrument(
        skip(self, sql, params),
        fields(sql_preview = %sql.chars().take(100).collect::<String>())
    )]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let mut conn = self.get_conn().await?;
        run_execute(&mut conn, sql, params).await
    }

    #[tracing::instrument(
        skip(self, sql, params),
        fields(sql_preview = %sql.chars().take(100).collect::<String>())
    )]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let mut conn = self.get_conn().await?;
        run_query(&mut conn, sql, params, None).await
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
        let mut conn = self.get_conn().await?;
        run_query(&mut conn, sql, params, Some(max_rows)).await
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        tracing::debug!("beginning MySQL transaction");

        // the transaction keeps the pooled connection until it ends
        let mut conn = self.get_conn().await?;
        conn.query_drop("START TRANSACTION")
            .await
            .map_err(|e| execution_error("begin transaction", &e))?;

        Ok(Box::new(MySqlTransaction {
            conn: Arc::new(tokio::sync::Mutex::new(Some(conn))),
            committed: false,
            rolled_back: false,
        }))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::info!("closing MySQL connection pool");
        self.pool
            .clone()
            .disconnect()
            .await
            .map_err(|e| {
                WeebaseError::Connection(format!("Failed to close MySQL connection: {}", e))
            })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// MySQL transaction holding a dedicated connection from the pool
pub struct MySqlTransaction {
    conn: Arc<tokio::sync::Mutex<Option<Conn>>>,
    committed: bool,
    rolled_back: bool,
}

impl MySqlTransaction {
    /// Send COMMIT or ROLLBACK and hand the connection back to the pool
    async fn finish(&self, statement: &str, operation: &str) -> Result<()> {
        let mut guard = self.conn.lock().await;
        if let Some(mut conn) = guard.take() {
            conn.query_drop(statement)
                .await
                .map_err(|e| execution_error(operation, &e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transaction for MySqlTransaction {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        if self.rolled_back {
            return Err(WeebaseError::execution("commit", "transaction already rolled back"));
        }
        if self.committed {
            return Err(WeebaseError::execution("commit", "transaction already committed"));
        }

        self.finish("COMMIT", "commit transaction").await?;
        self.committed = true;
        tracing::debug!("MySQL transaction committed");
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        if self.committed {
            return Err(WeebaseError::execution("rollback", "transaction already committed"));
        }
        if self.rolled_back {
            return Ok(());
        }

        self.finish("ROLLBACK", "rollback transaction").await?;
        self.rolled_back = true;
        tracing::debug!("MySQL transaction rolled back");
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        tracing::debug!(
            sql_preview = %sql.chars().take(100).collect::<String>(),
            "executing query in MySQL transaction"
        );
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(|| connection_gone("query"))?;
        run_query(conn, sql, params, None).await
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
            "executing capped query in MySQL transaction"
        );
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(|| connection_gone("query"))?;
        run_query(conn, sql, params, Some(max_rows)).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        tracing::debug!(
            sql_preview = %sql.chars().take(100).collect::<String>(),
            "executing statement in MySQL transaction"
        );
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(|| connection_gone("execute"))?;
        run_execute(conn, sql, params).await
    }
}

fn connection_gone(operation: &str) -> WeebaseError {
    WeebaseError::execution(operation, "transaction connection no longer available")
}

impl Drop for MySqlTransaction {
    fn drop(&mut self) {
        if self.committed || self.rolled_back {
            return;
        }
        tracing::warn!(
            "MySQL transaction dropped without commit or rollback, issuing automatic rollback"
        );

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::error!("no runtime available for automatic rollback");
            return;
        };
        let conn = Arc::clone(&self.conn);
        handle.spawn(async move {
            let mut guard = conn.lock().await;
            if let Some(mut conn) = guard.take()
                && let Err(e) = conn.query_drop("ROLLBACK").await
            {
                tracing::error!(error = %e, "automatic rollback on drop failed");
            }
        });
    }
}

/// Run a statement. Parameterless text uses the text protocol so client-side
/// statements such as `USE` and multi-statement batches work.
async fn run_execute(conn: &mut Conn, sql: &str, params: &[Value]) -> Result<StatementResult> {
    if params.is_empty() {
        conn.query_drop(sql)
            .await
            .map_err(|e| execution_error("execute statement", &e))?;
    } else {
        conn.exec_drop(sql, to_mysql_params(params))
            .await
            .map_err(|e| execution_error("execute statement", &e))?;
    }

    let affected_rows = conn.affected_rows();
    tracing::debug!(affected_rows, "statement executed");
    Ok(StatementResult { affected_rows })
}

/// Read the first result set row by row, keeping at most `max_rows` rows
/// when a cap is given. Rows past the cap and any further result sets are
/// discarded without being buffered.
async fn read_rows<'a, 't: 'a, P>(
    mut result: MySqlQueryResult<'a, 't, P>,
    max_rows: Option<usize>,
) -> Result<(Option<Arc<[Column]>>, Vec<MySqlRow>, bool)>
where
    P: Protocol + Unpin,
{
    let columns = result.columns();
    let mut rows = Vec::new();
    let mut truncated = false;

    if let Some(mut stream) = result
        .stream::<MySqlRow>()
        .await
        .map_err(|e| execution_error("fetch rows", &e))?
    {
        while let Some(row) = stream
            .try_next()
            .await
            .map_err(|e| execution_error("fetch row", &e))?
        {
            if max_rows.is_some_and(|max| rows.len() >= max) {
                truncated = true;
                break;
            }
            rows.push(row);
        }
    }

    result
        .drop_result()
        .await
        .map_err(|e| execution_error("discard rows", &e))?;
    Ok((columns, rows, truncated))
}

async fn run_query(
    conn: &mut Conn,
    sql: &str,
    params: &[Value],
    max_rows: Option<usize>,
) -> Result<QueryResult> {
    let start_time = std::time::Instant::now();

    let (columns, mysql_rows, truncated) = if params.is_empty() {
        let result = conn
            .query_iter(sql)
            .await
            .map_err(|e| execution_error("execute query", &e))?;
        read_rows(result, max_rows).await?
    } else {
        let result = conn
            .exec_iter(sql, to_mysql_params(params))
            .await
            .map_err(|e| execution_error("execute query", &e))?;
        read_rows(result, max_rows).await?
    };

    let columns: &[Column] = columns.as_deref().unwrap_or_default();
    let column_names: Vec<String> = columns.iter().map(|c| c.name_str().to_string()).collect();
    let column_types: Vec<ColumnType> = columns.iter().map(Column::column_type).collect();
    let metas = column_names
        .iter()
        .zip(&column_types)
        .enumerate()
        .map(|(idx, (name, col_type))| {
            ColumnMeta::result_column(name.clone(), column_type_name(*col_type), idx)
        })
        .collect::<Vec<_>>();

    let rows: Vec<Row> = mysql_rows
        .into_iter()
        .map(|mysql_row| {
            let values = column_types
                .iter()
                .enumerate()
                .map(|(idx, col_type)| {
                    let raw = mysql_row
                        .get::<mysql_async::Value, _>(idx)
                        .unwrap_or(mysql_async::Value::NULL);
                    mysql_value_to_value(raw, *col_type)
                })
                .collect();
            Row::new(column_names.clone(), values)
        })
        .collect();

    let execution_time_ms = start_time.elapsed().as_millis() as u64;
    tracing::debug!(
        row_count = rows.len(),
        truncated,
        execution_time_ms,
        "query executed successfully"
    );

    Ok(QueryResult {
        id: uuid::Uuid::new_v4(),
        columns: metas,
        total_rows: (!truncated).then_some(rows.len() as u64),
        rows,
        truncated,
        affected_rows: 0,
        execution_time_ms,
    })
}

fn to_mysql_params(params: &[Value]) -> Params {
    Params::Positional(params.iter().map(value_to_mysql).collect())
}

fn value_to_mysql(value: &Value) -> mysql_async::Value {
    use chrono::{Datelike, Timelike};
    use mysql_async::Value as My;

    fn date_time(date: chrono::NaiveDate, time: chrono::NaiveTime) -> My {
        My::Date(
            date.year() as u16,
            date.month() as u8,
            date.day() as u8,
            time.hour() as u8,
            time.minute() as u8,
            time.second() as u8,
            time.nanosecond() / 1_000,
        )
    }

    match value {
        Value::Null => My::NULL,
        Value::Bool(v) => My::Int(i64::from(*v)),
        Value::Int8(v) => My::Int(*v as i64),
        Value::Int16(v) => My::Int(*v as i64),
        Value::Int32(v) => My::Int(*v as i64),
        Value::Int64(v) => My::Int(*v),
        Value::Float32(v) => My::Float(*v),
        Value::Float64(v) => My::Double(*v),
        Value::Decimal(v) | Value::String(v) => My::Bytes(v.as_bytes().to_vec()),
        Value::Bytes(v) => My::Bytes(v.clone()),
        Value::Uuid(v) => My::Bytes(v.to_string().into_bytes()),
        Value::Json(v) => My::Bytes(v.to_string().into_bytes()),
        Value::Date(d) => date_time(*d, chrono::NaiveTime::default()),
        Value::Time(t) => My::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1_000,
        ),
        Value::DateTime(dt) => date_time(dt.date(), dt.time()),
        Value::DateTimeUtc(dt) => {
            let naive = dt.naive_utc();
            date_time(naive.date(), naive.time())
        }
    }
}

/// Convert a MySQL value using the column type to interpret text-protocol
/// byte strings
fn mysql_value_to_value(val: mysql_async::Value, col_type: ColumnType) -> Value {
    match val {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => match col_type {
                ColumnType::MYSQL_TYPE_TINY
                | ColumnType::MYSQL_TYPE_SHORT
                | ColumnType::MYSQL_TYPE_LONG
                | ColumnType::MYSQL_TYPE_LONGLONG
                | ColumnType::MYSQL_TYPE_INT24
                | ColumnType::MYSQL_TYPE_YEAR => {
                    s.parse::<i64>().map(Value::Int64).unwrap_or(Value::String(s))
                }
                ColumnType::MYSQL_TYPE_FLOAT => {
                    s.parse::<f32>().map(Value::Float32).unwrap_or(Value::String(s))
                }
                ColumnType::MYSQL_TYPE_DOUBLE => {
                    s.parse::<f64>().map(Value::Float64).unwrap_or(Value::String(s))
                }
                ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
                    Value::Decimal(s)
                }
                ColumnType::MYSQL_TYPE_JSON => serde_json::from_str(&s)
                    .map(Value::Json)
                    .unwrap_or(Value::String(s)),
                ColumnType::MYSQL_TYPE_DATE => chrono::NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                    .map(Value::Date)
                    .unwrap_or(Value::String(s)),
                ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_TIMESTAMP => {
                    chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%.f")
                        .map(Value::DateTime)
                        .unwrap_or(Value::String(s))
                }
                _ => Value::String(s),
            },
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        mysql_async::Value::Int(i) => Value::Int64(i),
        mysql_async::Value::UInt(u) => match i64::try_from(u) {
            Ok(i) => Value::Int64(i),
            Err(_) => Value::Decimal(u.to_string()),
        },
        mysql_async::Value::Float(f) => Value::Float32(f),
        mysql_async::Value::Double(d) => Value::Float64(d),
        mysql_async::Value::Date(year, month, day, hour, min, sec, micro) => {
            let date = chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32);
            match (date, col_type) {
                (Some(date), ColumnType::MYSQL_TYPE_DATE) => Value::Date(date),
                (Some(date), _) => date
                    .and_hms_micro_opt(hour as u32, min as u32, sec as u32, micro)
                    .map(Value::DateTime)
                    .unwrap_or(Value::Null),
                // zero dates such as 0000-00-00 have no calendar equivalent
                (None, _) => Value::String(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    year, month, day, hour, min, sec
                )),
            }
        }
        mysql_async::Value::Time(negative, days, hours, mins, secs, micros) => {
            let total_hours = days * 24 + hours as u32;
            let sign = if negative { "-" } else { "" };
            let (mins, secs) = (mins as u32, secs as u32);
            match chrono::NaiveTime::from_hms_micro_opt(total_hours, mins, secs, micros) {
                Some(time) if !negative => Value::Time(time),
                _ => Value::String(format!(
                    "{}{:02}:{:02}:{:02}.{:06}",
                    sign, total_hours, mins, secs, micros
                )),
            }
        }
    }
}

fn column_type_name(col_type: ColumnType) -> &'static str {
    match col_type {
        ColumnType::MYSQL_TYPE_TINY => "TINYINT",
        ColumnType::MYSQL_TYPE_SHORT => "SMALLINT",
        ColumnType::MYSQL_TYPE_INT24 => "MEDIUMINT",
        ColumnType::MYSQL_TYPE_LONG => "INT",
        ColumnType::MYSQL_TYPE_LONGLONG => "BIGINT",
        ColumnType::MYSQL_TYPE_FLOAT => "FLOAT",
        ColumnType::MYSQL_TYPE_DOUBLE => "DOUBLE",
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => "DECIMAL",
        ColumnType::MYSQL_TYPE_YEAR => "YEAR",
        ColumnType::MYSQL_TYPE_DATE => "DATE",
        ColumnType::MYSQL_TYPE_TIME => "TIME",
        ColumnType::MYSQL_TYPE_DATETIME => "DATETIME",
        ColumnType::MYSQL_TYPE_TIMESTAMP => "TIMESTAMP",
        ColumnType::MYSQL_TYPE_BIT => "BIT",
        ColumnType::MYSQL_TYPE_JSON => "JSON",
        ColumnType::MYSQL_TYPE_ENUM => "ENUM",
        ColumnType::MYSQL_TYPE_SET => "SET",
        ColumnType::MYSQL_TYPE_VARCHAR | ColumnType::MYSQL_TYPE_VAR_STRING => "VARCHAR",
        ColumnType::MYSQL_TYPE_STRING => "CHAR",
        ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB
        | ColumnType::MYSQL_TYPE_BLOB => "BLOB",
        ColumnType::MYSQL_TYPE_GEOMETRY => "GEOMETRY",
        ColumnType::MYSQL_TYPE_NULL => "NULL",
        _ => "UNKNOWN",
    }
}
