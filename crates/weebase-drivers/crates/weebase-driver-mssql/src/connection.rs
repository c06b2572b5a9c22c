//! MS SQL Server connection implementation using tiberius

use async_trait::async_trait;
use futures::TryStreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tiberius::{Client, ColumnData, FromSql, QueryStream, ToSql};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use weebase_core::{
    ColumnMeta, Connection, Dialect, QueryResult, Result, Row, StatementResult, Transaction,
    Value, WeebaseError, statement_keywords,
};

use crate::dsn::mssql_config;

type MssqlClient = Client<Compat<TcpStream>>;

/// Client slot shared by a connection and its transactions. Closing the
/// connection empties it.
pub(crate) type SharedClient = Arc<Mutex<Option<MssqlClient>>>;

fn live_client(slot: &mut Option<MssqlClient>) -> Result<&mut MssqlClient> {
    slot.as_mut()
        .ok_or_else(|| WeebaseError::Connection("connection is closed".into()))
}

/// Take the client out of the slot and end its session with the server
pub(crate) async fn release_client(slot: &SharedClient) -> Result<()> {
    let client = slot.lock().await.take();
    if let Some(client) = client {
        client.close().await.map_err(|e| {
            WeebaseError::Connection(format!(
                "Failed to close SQL Server connection: {}",
                format_mssql_error(&e)
            ))
        })?;
    }
    Ok(())
}

/// Statements whose effect must outlive the call. Parameterized execution
/// runs inside `sp_executesql`, which reverts `SET` options and rejects an
/// unbalanced `BEGIN TRAN`, so these go out as plain batches.
const SESSION_KEYWORDS: &[&str] = &["set", "use", "begin", "commit", "rollback"];

pub(crate) fn is_session_statement(sql: &str) -> bool {
    statement_keywords(&Dialect::SqlServer, sql)
        .first()
        .is_some_and(|keyword| SESSION_KEYWORDS.contains(&keyword.as_str()))
}

pub(crate) fn format_mssql_error(error: &tiberius::error::Error) -> String {
    let tiberius::error::Error::Server(token) = error else {
        return error.to_string();
    };

    match token.code() {
        2627 | 2601 => format!("duplicate value violates unique constraint: {}", token.message()),
        547 => format!("constraint violation: {}", token.message()),
        515 => format!("null value violates not-null constraint: {}", token.message()),
        241 => format!("invalid datetime format: {}", token.message()),
        code => format!("{} (code: {})", token.message(), code),
    }
}

fn execution_error(operation: &str, error: &tiberius::error::Error) -> WeebaseError {
    WeebaseError::execution(operation, format_mssql_error(error))
}

/// MS SQL Server connection using tiberius
pub struct MssqlConnection {
    client: SharedClient,
    closed: AtomicBool,
}

impl MssqlConnection {
    /// Connect with a `sqlserver://` URL or an ADO.NET connection string
    #[tracing::instrument(skip(dsn))]
    pub async fn connect(dsn: &str) -> Result<Self> {
        let config = mssql_config(dsn)?;
        tracing::debug!(addr = %config.get_addr(), "connecting to MS SQL Server");

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| WeebaseError::Connection(format!("Failed to reach SQL Server: {}", e)))?;
        tcp.set_nodelay(true)?;

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| {
                WeebaseError::Connection(format!(
                    "Failed to connect to SQL Server: {}",
                    format_mssql_error(&e)
                ))
            })?;

        tracing::debug!("successfully connected to MS SQL Server");
        Ok(Self {
            client: Arc::new(Mutex::new(Some(client))),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WeebaseError::Connection("connection is closed".into()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for MssqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlConnection")
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

#[async_trait]
impl Connection for MssqlConnection {
    fn driver_name(&self) -> &str {
        "sqlserver"
    }

    #[tracing::instrument(
        skip(self, sql, params),
        fields(sql_preview = %sql.chars().take(100).collect::<String>())
    )]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.ensure_open()?;
        let mut slot = self.client.lock().await;
        run_execute(live_client(&mut slot)?, sql, params).await
    }

    #[tracing::instrument(
        skip(self, sql, params),
        fields(sql_preview = %sql.chars().take(100).collect::<String>())
    )]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.ensure_open()?;
        let mut slot = self.client.lock().await;
        run_query(live_client(&mut slot)?, sql, params, None).await
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
        let mut slot = self.client.lock().await;
        run_query(live_client(&mut slot)?, sql, params, Some(max_rows)).await
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        self.ensure_open()?;
        tracing::debug!("beginning SQL Server transaction");

        let mut slot = self.client.lock().await;
        run_batch(live_client(&mut slot)?, "BEGIN TRANSACTION", "begin transaction").await?;
        drop(slot);

        Ok(Box::new(MssqlTransaction::new(Arc::clone(&self.client))))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // waits for any statement still holding the client
        release_client(&self.client).await?;
        tracing::debug!("MS SQL Server connection closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// SQL Server transaction sharing the connection's client
pub struct MssqlTransaction {
    client: SharedClient,
    committed: bool,
    rolled_back: bool,
}

impl MssqlTransaction {
    pub(crate) fn new(client: SharedClient) -> Self {
        Self {
            client,
            committed: false,
            rolled_back: false,
        }
    }
}

const ROLLBACK_SQL: &str = "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION";

impl Drop for MssqlTransaction {
    fn drop(&mut self) {
        if self.committed || self.rolled_back {
            return;
        }
        tracing::warn!(
            "SQL Server transaction dropped without commit or rollback, issuing automatic rollback"
        );

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::error!("no runtime available for automatic rollback");
            return;
        };
        let client = Arc::clone(&self.client);
        handle.spawn(async move {
            let mut slot = client.lock().await;
            // a closed connection already ended the transaction server-side
            let Some(client) = slot.as_mut() else {
                return;
            };
            if let Err(e) = run_batch(client, ROLLBACK_SQL, "rollback transaction").await {
                tracing::error!(error = %e, "automatic rollback on drop failed");
            }
        });
    }
}

#[async_trait]
impl Transaction for MssqlTransaction {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        if self.rolled_back {
            return Err(WeebaseError::execution("commit", "transaction already rolled back"));
        }
        if self.committed {
            return Err(WeebaseError::execution("commit", "transaction already committed"));
        }

        let mut slot = self.client.lock().await;
        run_batch(live_client(&mut slot)?, "COMMIT TRANSACTION", "commit transaction").await?;
        drop(slot);

        self.committed = true;
        tracing::debug!("SQL Server transaction committed");
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        if self.committed {
            return Err(WeebaseError::execution("rollback", "transaction already committed"));
        }
        if self.rolled_back {
            return Ok(());
        }

        let mut slot = self.client.lock().await;
        run_batch(live_client(&mut slot)?, ROLLBACK_SQL, "rollback transaction").await?;
        drop(slot);

        self.rolled_back = true;
        tracing::debug!("SQL Server transaction rolled back");
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        tracing::debug!(
            sql_preview = %sql.chars().take(100).collect::<String>(),
            "executing query in SQL Server transaction"
        );
        let mut slot = self.client.lock().await;
        run_query(live_client(&mut slot)?, sql, params, None).await
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
            "executing capped query in SQL Server transaction"
        );
        let mut slot = self.client.lock().await;
        run_query(live_client(&mut slot)?, sql, params, Some(max_rows)).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        tracing::debug!(
            sql_preview = %sql.chars().take(100).collect::<String>(),
            "executing statement in SQL Server transaction"
        );
        let mut slot = self.client.lock().await;
        run_execute(live_client(&mut slot)?, sql, params).await
    }
}

/// Send text as a plain batch and drain every result
async fn run_batch(client: &mut MssqlClient, sql: &str, operation: &str) -> Result<()> {
    client
        .simple_query(sql)
        .await
        .map_err(|e| execution_error(operation, &e))?
        .into_results()
        .await
        .map_err(|e| execution_error(operation, &e))?;
    Ok(())
}

async fn run_execute(
    client: &mut MssqlClient,
    sql: &str,
    params: &[Value],
) -> Result<StatementResult> {
    if params.is_empty() && is_session_statement(sql) {
        run_batch(client, sql, "execute statement").await?;
        tracing::debug!("session statement executed");
        return Ok(StatementResult { affected_rows: 0 });
    }

    let tiberius_params = values_to_tiberius_params(params);
    let param_refs: Vec<&dyn ToSql> = tiberius_params.iter().map(|p| p as &dyn ToSql).collect();
    let result = client
        .execute(sql, &param_refs[..])
        .await
        .map_err(|e| execution_error("execute statement", &e))?;

    let affected_rows = result.rows_affected().iter().sum::<u64>();
    tracing::debug!(affected_rows, "statement executed");
    Ok(StatementResult { affected_rows })
}

/// Run a query and read the first result set. Parameterless text goes out as
/// a plain batch so it sees session options such as `SHOWPLAN_XML`.
async fn run_query(
    client: &mut MssqlClient,
    sql: &str,
    params: &[Value],
    max_rows: Option<usize>,
) -> Result<QueryResult> {
    let start = std::time::Instant::now();

    let tiberius_params = values_to_tiberius_params(params);
    let param_refs: Vec<&dyn ToSql> = tiberius_params.iter().map(|p| p as &dyn ToSql).collect();
    let mut stream: QueryStream<'_> = if params.is_empty() {
        client.simple_query(sql).await
    } else {
        client.query(sql, &param_refs[..]).await
    }
    .map_err(|e| execution_error("execute query", &e))?;

    let columns: Vec<ColumnMeta> = stream
        .columns()
        .await
        .map_err(|e| execution_error("read columns", &e))?
        .map(|cols| {
            cols.iter()
                .enumerate()
                .map(|(idx, col)| {
                    ColumnMeta::result_column(col.name(), format!("{:?}", col.column_type()), idx)
                })
                .collect()
        })
        .unwrap_or_default();
    let column_names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();

    let mut rows = Vec::new();
    let mut truncated = false;
    let mut row_stream = stream.into_row_stream();
    while let Some(tib_row) = row_stream
        .try_next()
        .await
        .map_err(|e| execution_error("fetch row", &e))?
    {
        if tib_row.result_index() > 0 {
            break;
        }
        if max_rows.is_some_and(|max| rows.len() >= max) {
            truncated = true;
            break;
        }
        let values = tib_row.into_iter().map(column_data_to_value).collect();
        rows.push(Row::new(column_names.clone(), values));
    }

    let execution_time_ms = start.elapsed().as_millis() as u64;
    tracing::debug!(
        row_count = rows.len(),
        truncated,
        duration_ms = execution_time_ms,
        "query completed"
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

fn decode_with<'a, T, F>(data: &'a ColumnData<'static>, wrap: F) -> Value
where
    T: FromSql<'a>,
    F: FnOnce(T) -> Value,
{
    match T::from_sql(data) {
        Ok(Some(value)) => wrap(value),
        Ok(None) => Value::Null,
        Err(e) => {
            tracing::debug!(error = %e, "failed to decode SQL Server value");
            Value::Null
        }
    }
}

/// Convert tiberius ColumnData to a Value
pub(crate) fn column_data_to_value(col_data: ColumnData<'static>) -> Value {
    match col_data {
        ColumnData::Bit(v) => v.map_or(Value::Null, Value::Bool),
        ColumnData::U8(v) => v.map_or(Value::Null, |v| Value::Int16(v as i16)),
        ColumnData::I16(v) => v.map_or(Value::Null, Value::Int16),
        ColumnData::I32(v) => v.map_or(Value::Null, Value::Int32),
        ColumnData::I64(v) => v.map_or(Value::Null, Value::Int64),
        ColumnData::F32(v) => v.map_or(Value::Null, Value::Float32),
        ColumnData::F64(v) => v.map_or(Value::Null, Value::Float64),
        ColumnData::String(v) => v.map_or(Value::Null, |s| Value::String(s.into_owned())),
        ColumnData::Guid(v) => v.map_or(Value::Null, Value::Uuid),
        ColumnData::Binary(v) => v.map_or(Value::Null, |b| Value::Bytes(b.into_owned())),
        ColumnData::Numeric(v) => v.map_or(Value::Null, |n| Value::Decimal(n.to_string())),
        ColumnData::Xml(v) => {
            v.map_or(Value::Null, |x| Value::String(x.into_owned().into_string()))
        }
        ref data @ (ColumnData::DateTime(_)
        | ColumnData::SmallDateTime(_)
        | ColumnData::DateTime2(_)) => {
            decode_with(data, Value::DateTime)
        }
        ref data @ ColumnData::DateTimeOffset(_) => decode_with(data, Value::DateTimeUtc),
        ref data @ ColumnData::Date(_) => decode_with(data, Value::Date),
        ref data @ ColumnData::Time(_) => decode_with(data, Value::Time),
    }
}

/// Owned parameter value handed to tiberius
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TiberiusParam {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
    DateTime(chrono::NaiveDateTime),
    DateTimeUtc(chrono::DateTime<chrono::Utc>),
}

impl ToSql for TiberiusParam {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            TiberiusParam::Null => ColumnData::String(None),
            TiberiusParam::Bool(v) => ColumnData::Bit(Some(*v)),
            TiberiusParam::I16(v) => ColumnData::I16(Some(*v)),
            TiberiusParam::I32(v) => ColumnData::I32(Some(*v)),
            TiberiusParam::I64(v) => ColumnData::I64(Some(*v)),
            TiberiusParam::F32(v) => ColumnData::F32(Some(*v)),
            TiberiusParam::F64(v) => ColumnData::F64(Some(*v)),
            TiberiusParam::String(v) => ColumnData::String(Some(v.as_str().into())),
            TiberiusParam::Bytes(v) => ColumnData::Binary(Some(v.as_slice().into())),
            TiberiusParam::Uuid(v) => ColumnData::Guid(Some(*v)),
            TiberiusParam::Date(v) => v.to_sql(),
            TiberiusParam::Time(v) => v.to_sql(),
            TiberiusParam::DateTime(v) => v.to_sql(),
            TiberiusParam::DateTimeUtc(v) => v.to_sql(),
        }
    }
}

pub(crate) fn values_to_tiberius_params(values: &[Value]) -> Vec<TiberiusParam> {
    values
        .iter()
        .map(|v| match v {
            Value::Null => TiberiusParam::Null,
            Value::Bool(b) => TiberiusParam::Bool(*b),
            Value::Int8(i) => TiberiusParam::I16(*i as i16),
            Value::Int16(i) => TiberiusParam::I16(*i),
            Value::Int32(i) => TiberiusParam::I32(*i),
            Value::Int64(i) => TiberiusParam::I64(*i),
            Value::Float32(f) => TiberiusParam::F32(*f),
            Value::Float64(f) => TiberiusParam::F64(*f),
            // the server converts numeric text to the column's precision
            Value::Decimal(d) => TiberiusParam::String(d.clone()),
            Value::String(s) => TiberiusParam::String(s.clone()),
            Value::Bytes(b) => TiberiusParam::Bytes(b.clone()),
            Value::Uuid(u) => TiberiusParam::Uuid(*u),
            Value::Date(d) => TiberiusParam::Date(*d),
            Value::Time(t) => TiberiusParam::Time(*t),
            Value::DateTime(dt) => TiberiusParam::DateTime(*dt),
            Value::DateTimeUtc(dt) => TiberiusParam::DateTimeUtc(*dt),
            Value::Json(j) => TiberiusParam::String(j.to_string()),
        })
        .collect()
}
