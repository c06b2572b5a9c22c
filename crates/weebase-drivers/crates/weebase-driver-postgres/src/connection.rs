//! PostgreSQL connection implementation

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use futures::TryStreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_postgres::{
    Client, Config, NoTls, Row as PgRow, SimpleQueryMessage, Statement,
    types::{FromSql, ToSql, Type},
};
use weebase_core::{
    ColumnMeta, Connection, QueryResult, Result, Row, StatementResult, Transaction, Value,
    WeebaseError,
};

fn format_postgres_error(error: &tokio_postgres::Error) -> String {
    let Some(db_error) = error.as_db_error() else {
        return error.to_string();
    };

    let code = db_error.code();
    let mut message = db_error.message().to_string();

    if let Some(detail) = db_error.detail()
        && !detail.trim().is_empty()
    {
        message.push_str(&format!(" (detail: {})", detail));
    }
    if let Some(hint) = db_error.hint()
        && !hint.trim().is_empty()
    {
        message.push_str(&format!(" (hint: {})", hint));
    }
    if let Some(column) = db_error.column()
        && !column.trim().is_empty()
    {
        message.push_str(&format!(" (column: {})", column));
    }

    match code.code() {
        "23505" => format!("duplicate value violates unique constraint: {}", message),
        "23503" => format!("foreign key violation: {}", message),
        "23502" => format!("null value violates not-null constraint: {}", message),
        "22007" => format!("invalid datetime format: {}", message),
        "22P02" => format!("invalid input syntax: {}", message),
        other => format!("{} (code: {})", message, other),
    }
}

fn execution_error(operation: &str, error: &tokio_postgres::Error) -> WeebaseError {
    WeebaseError::execution(operation, format_postgres_error(error))
}

/// PostgreSQL connection wrapper
pub struct PostgresConnection {
    client: Arc<Mutex<Client>>,
    connection_task: JoinHandle<()>,
    closed: AtomicBool,
}

impl PostgresConnection {
    /// Connect using a libpq-style key/value string or a `postgres://` URL
    pub async fn connect(dsn: &str) -> Result<Self> {
        let config = parse_dsn(dsn)?;
        tracing::info!(
            hosts = ?config.get_hosts(),
            database = config.get_dbname().unwrap_or_default(),
            "connecting to PostgreSQL"
        );

        let (client, connection) = config.connect(NoTls).await.map_err(|e| {
            WeebaseError::Connection(format!(
                "Failed to connect to PostgreSQL: {}",
                format_postgres_error(&e)
            ))
        })?;

        let connection_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "PostgreSQL connection error");
            }
        });

        tracing::info!("PostgreSQL connection established");
        Ok(Self {
            client: Arc::new(Mutex::new(client)),
            connection_task,
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

impl Drop for PostgresConnection {
    fn drop(&mut self) {
        self.connection_task.abort();
    }
}

/// Parse a connection string into a `tokio-postgres` config
pub(crate) fn parse_dsn(dsn: &str) -> Result<Config> {
    dsn.trim()
        .parse::<Config>()
        .map_err(|e| {
            WeebaseError::Configuration(format!("invalid PostgreSQL connection string: {}", e))
        })
}

#[async_trait]
impl Connection for PostgresConnection {
    fn driver_name(&self) -> &str {
        "postgres"
    }

    #[tracing::instrument(
        skip(self, sql, params),
        fields(sql_preview = %sql.chars().take(100).collect::<String>())
    )]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.ensure_open()?;
        let client = self.client.lock().await;
        run_execute(&client, sql, params).await
    }

    #[tracing::instrument(
        skip(self, sql, params),
        fields(sql_preview = %sql.chars().take(100).collect::<String>())
    )]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.ensure_open()?;
        let client = self.client.lock().await;
        run_query(&client, sql, params, None).await
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
        let client = self.client.lock().await;
        run_query(&client, sql, params, Some(max_rows)).await
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        self.ensure_open()?;
        tracing::debug!("beginning PostgreSQL transaction");

        let client = self.client.lock().await;
        client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| execution_error("begin transaction", &e))?;
        drop(client);

        Ok(Box::new(PostgresTransaction {
            client: Arc::clone(&self.client),
            committed: false,
            rolled_back: false,
        }))
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::info!("closing PostgreSQL connection");
            self.connection_task.abort();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.connection_task.is_finished()
    }
}

/// PostgreSQL transaction wrapper
///
/// Statements inside the transaction share the connection's client lock, so
/// they run in order with anything else issued on the same connection.
pub struct PostgresTransaction {
    client: Arc<Mutex<Client>>,
    committed: bool,
    rolled_back: bool,
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if self.committed || self.rolled_back {
            return;
        }
        tracing::warn!(
            "PostgreSQL transaction dropped without commit or rollback, issuing automatic rollback"
        );

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::error!("no runtime available for automatic rollback");
            return;
        };
        let client = Arc::clone(&self.client);
        handle.spawn(async move {
            let client = client.lock().await;
            if let Err(e) = client.batch_execute("ROLLBACK").await {
                tracing::error!(error = %e, "automatic rollback on drop failed");
            }
        });
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        if self.rolled_back {
            return Err(WeebaseError::execution("commit", "transaction already rolled back"));
        }
        if self.committed {
            return Err(WeebaseError::execution("commit", "transaction already committed"));
        }

        let client = self.client.lock().await;
        client
            .batch_execute("COMMIT")
            .await
            .map_err(|e| execution_error("commit transaction", &e))?;
        drop(client);

        self.committed = true;
        tracing::debug!("PostgreSQL transaction committed");
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        if self.committed {
            return Err(WeebaseError::execution("rollback", "transaction already committed"));
        }
        if self.rolled_back {
            return Ok(());
        }

        let client = self.client.lock().await;
        client
            .batch_execute("ROLLBACK")
            .await
            .map_err(|e| execution_error("rollback transaction", &e))?;
        drop(client);

        self.rolled_back = true;
        tracing::debug!("PostgreSQL transaction rolled back");
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        tracing::debug!(
            sql_preview = %sql.chars().take(100).collect::<String>(),
            "executing query in PostgreSQL transaction"
        );
        let client = self.client.lock().await;
        run_query(&client, sql, params, None).await
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
            "executing capped query in PostgreSQL transaction"
        );
        let client = self.client.lock().await;
        run_query(&client, sql, params, Some(max_rows)).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        tracing::debug!(
            sql_preview = %sql.chars().take(100).collect::<String>(),
            "executing statement in PostgreSQL transaction"
        );
        let client = self.client.lock().await;
        run_execute(&client, sql, params).await
    }
}

/// Bind each value against the parameter type the server inferred
fn bind_params(statement: &Statement, params: &[Value]) -> Vec<PgValue> {
    let param_types = statement.params();
    params
        .iter()
        .enumerate()
        .map(|(i, value)| match param_types.get(i) {
            Some(target_type) => PgValue::from_value_for_type(value, target_type),
            None => PgValue::from_value(value),
        })
        .collect()
}

/// Run a statement. Parameterless text goes through the simple query
/// protocol so a batch of several statements is accepted; the count of the
/// last statement is reported.
async fn run_execute(client: &Client, sql: &str, params: &[Value]) -> Result<StatementResult> {
    let affected_rows = if params.is_empty() {
        let messages = client
            .simple_query(sql)
            .await
            .map_err(|e| execution_error("execute statement", &e))?;
        messages
            .iter()
            .filter_map(|message| match message {
                SimpleQueryMessage::CommandComplete(count) => Some(*count),
                _ => None,
            })
            .last()
            .unwrap_or(0)
    } else {
        let statement = client
            .prepare(sql)
            .await
            .map_err(|e| execution_error("prepare statement", &e))?;
        let pg_params = bind_params(&statement, params);
        let param_refs: Vec<&(dyn ToSql + Sync)> =
            pg_params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        client
            .execute(&statement, &param_refs)
            .await
            .map_err(|e| execution_error("execute statement", &e))?
    };

    tracing::debug!(affected_rows, "statement executed");
    Ok(StatementResult { affected_rows })
}

/// Run a query, reading at most `max_rows` rows from the stream when a cap
/// is given
async fn run_query(
    client: &Client,
    sql: &str,
    params: &[Value],
    max_rows: Option<usize>,
) -> Result<QueryResult> {
    let start_time = std::time::Instant::now();

    let statement = client
        .prepare(sql)
        .await
        .map_err(|e| execution_error("prepare query", &e))?;
    let pg_params = bind_params(&statement, params);

    // Column metadata comes from the statement so empty results keep it
    let mut column_names = Vec::with_capacity(statement.columns().len());
    let mut columns = Vec::with_capacity(statement.columns().len());
    for (idx, col) in statement.columns().iter().enumerate() {
        let name = col.name().to_string();
        column_names.push(name.clone());
        columns.push(ColumnMeta::result_column(name, col.type_().name(), idx));
    }

    let stream = client
        .query_raw(&statement, pg_params.iter().map(|p| p as &(dyn ToSql + Sync)))
        .await
        .map_err(|e| execution_error("execute query", &e))?;
    futures::pin_mut!(stream);

    let mut rows = Vec::new();
    let mut truncated = false;
    while let Some(pg_row) = stream
        .try_next()
        .await
        .map_err(|e| execution_error("fetch row", &e))?
    {
        if max_rows.is_some_and(|max| rows.len() >= max) {
            truncated = true;
            break;
        }
        let values = (0..columns.len())
            .map(|idx| postgres_to_value(&pg_row, idx))
            .collect();
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

/// Parameter value in the wire shape of its target column
#[derive(Debug, Clone, PartialEq)]
enum PgValue {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Numeric(String),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    Json(serde_json::Value),
    DateTimeUtc(chrono::DateTime<chrono::Utc>),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
    DateTime(chrono::NaiveDateTime),
}

impl PgValue {
    fn from_value_for_type(value: &Value, target_type: &Type) -> Self {
        match value {
            Value::Null => PgValue::Null,
            Value::Bool(v) => PgValue::Bool(*v),

            Value::Int8(v) => Self::coerce_int(*v as i64, target_type),
            Value::Int16(v) => Self::coerce_int(*v as i64, target_type),
            Value::Int32(v) => Self::coerce_int(*v as i64, target_type),
            Value::Int64(v) => Self::coerce_int(*v, target_type),

            Value::Float32(v) => Self::coerce_float(*v as f64, target_type),
            Value::Float64(v) => Self::coerce_float(*v, target_type),

            Value::Decimal(v) | Value::String(v) => Self::coerce_string(v, target_type),
            Value::Bytes(v) => PgValue::Bytes(v.clone()),
            Value::Uuid(v) => PgValue::Uuid(*v),
            Value::Json(v) => PgValue::Json(v.clone()),
            Value::DateTimeUtc(v) => PgValue::DateTimeUtc(*v),
            Value::Date(v) => PgValue::Date(*v),
            Value::Time(v) => PgValue::Time(*v),
            Value::DateTime(v) => PgValue::DateTime(*v),
        }
    }

    /// Pick the integer width of the target column so the right number of
    /// bytes is written
    fn coerce_int(value: i64, target_type: &Type) -> Self {
        match *target_type {
            Type::INT2 => i16::try_from(value).map_or(PgValue::Int64(value), PgValue::Int16),
            Type::INT4 => i32::try_from(value).map_or(PgValue::Int64(value), PgValue::Int32),
            Type::FLOAT4 => PgValue::Float32(value as f32),
            Type::FLOAT8 => PgValue::Float64(value as f64),
            Type::NUMERIC => PgValue::Numeric(value.to_string()),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
                PgValue::String(value.to_string())
            }
            _ => PgValue::Int64(value),
        }
    }

    fn coerce_float(value: f64, target_type: &Type) -> Self {
        match *target_type {
            Type::FLOAT4 => PgValue::Float32(value as f32),
            Type::NUMERIC if value.is_finite() => PgValue::Numeric(value.to_string()),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
                PgValue::String(value.to_string())
            }
            _ => PgValue::Float64(value),
        }
    }

    /// Parse text into the target type when the statement names one.
    /// Text that does not parse is sent as-is and left for the server to
    /// reject.
    fn coerce_string(value: &str, target_type: &Type) -> Self {
        let text = || PgValue::String(value.to_string());
        let trimmed = value.trim();

        match *target_type {
            Type::BOOL => match trimmed.to_ascii_lowercase().as_str() {
                "t" | "true" | "1" | "yes" | "on" => PgValue::Bool(true),
                "f" | "false" | "0" | "no" | "off" => PgValue::Bool(false),
                _ => text(),
            },
            Type::INT2 => trimmed.parse().map(PgValue::Int16).unwrap_or_else(|_| text()),
            Type::INT4 => trimmed.parse().map(PgValue::Int32).unwrap_or_else(|_| text()),
            Type::INT8 => trimmed.parse().map(PgValue::Int64).unwrap_or_else(|_| text()),
            Type::FLOAT4 => trimmed.parse().map(PgValue::Float32).unwrap_or_else(|_| text()),
            Type::FLOAT8 => trimmed.parse().map(PgValue::Float64).unwrap_or_else(|_| text()),
            Type::NUMERIC if encode_numeric(trimmed).is_some() => {
                PgValue::Numeric(trimmed.to_string())
            }
            Type::UUID => uuid::Uuid::parse_str(trimmed)
                .map(PgValue::Uuid)
                .unwrap_or_else(|_| text()),
            Type::JSON | Type::JSONB => serde_json::from_str::<serde_json::Value>(value)
                .map(PgValue::Json)
                .unwrap_or_else(|_| text()),
            Type::DATE => chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .map(PgValue::Date)
                .unwrap_or_else(|_| text()),
            Type::TIME => chrono::NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
                .or_else(|_| chrono::NaiveTime::parse_from_str(trimmed, "%H:%M:%S%.f"))
                .map(PgValue::Time)
                .unwrap_or_else(|_| text()),
            Type::TIMESTAMP => parse_naive_timestamp(trimmed)
                .map(PgValue::DateTime)
                .unwrap_or_else(text),
            Type::TIMESTAMPTZ => chrono::DateTime::parse_from_rfc3339(trimmed)
                .ok()
                .map(|timestamp| timestamp.with_timezone(&chrono::Utc))
                .or_else(|| parse_naive_timestamp(trimmed).map(|timestamp| timestamp.and_utc()))
                .map(PgValue::DateTimeUtc)
                .unwrap_or_else(text),
            _ => text(),
        }
    }

    /// Used when the statement reports fewer parameters than were supplied
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => PgValue::Null,
            Value::Bool(v) => PgValue::Bool(*v),
            Value::Int8(v) => PgValue::Int16(*v as i16),
            Value::Int16(v) => PgValue::Int16(*v),
            Value::Int32(v) => PgValue::Int32(*v),
            Value::Int64(v) => PgValue::Int64(*v),
            Value::Float32(v) => PgValue::Float32(*v),
            Value::Float64(v) => PgValue::Float64(*v),
            Value::Decimal(v) => PgValue::Numeric(v.clone()),
            Value::String(v) => PgValue::String(v.clone()),
            Value::Bytes(v) => PgValue::Bytes(v.clone()),
            Value::Uuid(v) => PgValue::Uuid(*v),
            Value::Json(v) => PgValue::Json(v.clone()),
            Value::DateTimeUtc(v) => PgValue::DateTimeUtc(*v),
            Value::Date(v) => PgValue::Date(*v),
            Value::Time(v) => PgValue::Time(*v),
            Value::DateTime(v) => PgValue::DateTime(*v),
        }
    }
}

fn parse_naive_timestamp(value: &str) -> Option<chrono::NaiveDateTime> {
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| chrono::NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

impl ToSql for PgValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<postgres_types::IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            PgValue::Null => Ok(postgres_types::IsNull::Yes),
            PgValue::Bool(v) => v.to_sql(ty, out),
            PgValue::Int16(v) => v.to_sql(ty, out),
            PgValue::Int32(v) => v.to_sql(ty, out),
            PgValue::Int64(v) => v.to_sql(ty, out),
            PgValue::Float32(v) => v.to_sql(ty, out),
            PgValue::Float64(v) => v.to_sql(ty, out),
            PgValue::Numeric(v) => {
                let encoded = encode_numeric(v).ok_or("invalid NUMERIC literal")?;
                out.put_slice(&encoded);
                Ok(postgres_types::IsNull::No)
            }
            PgValue::String(v) => v.to_sql(ty, out),
            PgValue::Bytes(v) => v.to_sql(ty, out),
            PgValue::Uuid(v) => v.to_sql(ty, out),
            PgValue::Json(v) => v.to_sql(ty, out),
            PgValue::DateTimeUtc(v) => v.to_sql(ty, out),
            PgValue::Date(v) => v.to_sql(ty, out),
            PgValue::Time(v) => v.to_sql(ty, out),
            PgValue::DateTime(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    postgres_types::to_sql_checked!();
}

const NUMERIC_POSITIVE: u16 = 0x0000;
const NUMERIC_NEGATIVE: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;

/// Encode a plain decimal literal (`-12.340`) in the binary NUMERIC format:
/// base-10000 digit groups with a weight, sign and display scale header
fn encode_numeric(literal: &str) -> Option<Vec<u8>> {
    let (negative, unsigned) = match literal.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, literal.strip_prefix('+').unwrap_or(literal)),
    };
    let (integer, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    if integer.is_empty() && fraction.is_empty() {
        return None;
    }
    if !integer.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let dscale = i16::try_from(fraction.len()).ok()?;

    // Align both halves on 4-digit group boundaries around the decimal point
    let integer_pad = (4 - integer.len() % 4) % 4;
    let fraction_pad = (4 - fraction.len() % 4) % 4;
    let aligned: String = "0".repeat(integer_pad)
        + integer
        + fraction
        + &"0".repeat(fraction_pad);
    let mut groups: Vec<u16> = aligned
        .as_bytes()
        .chunks(4)
        .map(|chunk| chunk.iter().fold(0u16, |acc, b| acc * 10 + u16::from(b - b'0')))
        .collect();
    let mut weight = ((integer.len() + integer_pad) / 4) as i32 - 1;

    let leading_zeros = groups.iter().take_while(|g| **g == 0).count();
    groups.drain(..leading_zeros);
    weight -= leading_zeros as i32;
    while groups.last() == Some(&0) {
        groups.pop();
    }

    let (weight, sign) = if groups.is_empty() {
        (0, NUMERIC_POSITIVE)
    } else if negative {
        (weight, NUMERIC_NEGATIVE)
    } else {
        (weight, NUMERIC_POSITIVE)
    };

    let mut out = Vec::with_capacity(8 + groups.len() * 2);
    out.extend_from_slice(&i16::try_from(groups.len()).ok()?.to_be_bytes());
    out.extend_from_slice(&i16::try_from(weight).ok()?.to_be_bytes());
    out.extend_from_slice(&sign.to_be_bytes());
    out.extend_from_slice(&dscale.to_be_bytes());
    for group in groups {
        out.extend_from_slice(&group.to_be_bytes());
    }
    Some(out)
}

/// NUMERIC decoded to its exact decimal text
#[derive(Debug)]
struct PgNumericString(String);

/// Raw UTF-8 payload of a type without a dedicated mapping, such as an enum
#[derive(Debug)]
struct PgFallbackString(String);

impl PgNumericString {
    fn parse(raw: &[u8]) -> std::result::Result<String, Box<dyn std::error::Error + Sync + Send>> {
        if raw.len() < 8 {
            return Err("invalid NUMERIC payload: too short".into());
        }

        let ndigits = i16::from_be_bytes([raw[0], raw[1]]).max(0) as usize;
        let weight = i16::from_be_bytes([raw[2], raw[3]]);
        let sign = u16::from_be_bytes([raw[4], raw[5]]);
        let dscale = i16::from_be_bytes([raw[6], raw[7]]).max(0) as usize;

        if raw.len() < 8 + ndigits * 2 {
            return Err("invalid NUMERIC payload: truncated digits".into());
        }
        if sign == NUMERIC_NAN {
            return Ok("NaN".to_string());
        }

        let mut digits = Vec::with_capacity(ndigits);
        for index in 0..ndigits {
            let offset = 8 + index * 2;
            let group = u16::from_be_bytes([raw[offset], raw[offset + 1]]);
            if group > 9999 {
                return Err("invalid NUMERIC payload: group out of range".into());
            }
            digits.push(group);
        }

        if digits.is_empty() {
            return Ok("0".to_string());
        }

        let integer_group_count = if weight >= 0 { weight as usize + 1 } else { 0 };

        let mut integer_text = String::new();
        if integer_group_count == 0 {
            integer_text.push('0');
        } else {
            for group_index in 0..integer_group_count {
                let group = digits.get(group_index).copied().unwrap_or(0);
                if group_index == 0 {
                    integer_text.push_str(&group.to_string());
                } else {
                    integer_text.push_str(&format!("{group:04}"));
                }
            }
        }

        let mut fraction_text = String::new();
        if dscale > 0 {
            // groups between the decimal point and the first stored digit
            let leading_zero_groups = if weight < 0 { (-(weight as i32) - 1) as usize } else { 0 };
            for _ in 0..leading_zero_groups {
                fraction_text.push_str("0000");
            }
            let start = integer_group_count.min(digits.len());
            for group in digits.iter().skip(start) {
                fraction_text.push_str(&format!("{group:04}"));
            }

            if fraction_text.len() < dscale {
                fraction_text.push_str(&"0".repeat(dscale - fraction_text.len()));
            } else {
                fraction_text.truncate(dscale);
            }

            while fraction_text.ends_with('0') {
                fraction_text.pop();
            }
        }

        let mut output = String::new();
        if sign == NUMERIC_NEGATIVE && (integer_text != "0" || !fraction_text.is_empty()) {
            output.push('-');
        }
        output.push_str(&integer_text);
        if !fraction_text.is_empty() {
            output.push('.');
            output.push_str(&fraction_text);
        }

        Ok(output)
    }
}

impl<'a> FromSql<'a> for PgNumericString {
    fn from_sql(
        _: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(Self(Self::parse(raw)?))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

impl<'a> FromSql<'a> for PgFallbackString {
    fn from_sql(
        _: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(Self(String::from_utf8(raw.to_vec())?))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

fn get_or_null<'a, T, F>(row: &'a PgRow, idx: usize, wrap: F) -> Value
where
    T: FromSql<'a>,
    F: FnOnce(T) -> Value,
{
    match row.try_get::<_, Option<T>>(idx) {
        Ok(Some(value)) => wrap(value),
        Ok(None) => Value::Null,
        Err(e) => {
            tracing::debug!(column = idx, error = %e, "failed to decode PostgreSQL value");
            Value::Null
        }
    }
}

fn json_array<T: Into<serde_json::Value>>(items: Vec<T>) -> Value {
    Value::Json(serde_json::Value::Array(items.into_iter().map(Into::into).collect()))
}

/// Convert a PostgreSQL column to a Value by its type name
fn postgres_to_value(row: &PgRow, idx: usize) -> Value {
    let type_name = row.columns()[idx].type_().name();

    match type_name {
        "bool" => get_or_null(row, idx, Value::Bool),
        "int2" => get_or_null(row, idx, Value::Int16),
        "int4" => get_or_null(row, idx, Value::Int32),
        "int8" => get_or_null(row, idx, Value::Int64),
        "oid" => get_or_null(row, idx, |v: u32| Value::Int64(v as i64)),
        "float4" => get_or_null(row, idx, Value::Float32),
        "float8" => get_or_null(row, idx, Value::Float64),
        "numeric" => get_or_null(row, idx, |v: PgNumericString| Value::Decimal(v.0)),
        "text" | "varchar" | "bpchar" | "name" => get_or_null(row, idx, Value::String),
        "char" => get_or_null(row, idx, |v: i8| Value::String(((v as u8) as char).to_string())),
        "bytea" => get_or_null(row, idx, Value::Bytes),
        "uuid" => get_or_null(row, idx, Value::Uuid),
        "json" | "jsonb" => get_or_null(row, idx, Value::Json),
        "date" => get_or_null(row, idx, Value::Date),
        "time" => get_or_null(row, idx, Value::Time),
        "timestamp" => get_or_null(row, idx, Value::DateTime),
        "timestamptz" => get_or_null(row, idx, Value::DateTimeUtc),
        // array type names carry a leading underscore
        "_text" | "_varchar" | "_bpchar" | "_name" => get_or_null(row, idx, json_array::<String>),
        "_int2" => get_or_null(row, idx, json_array::<i16>),
        "_int4" => get_or_null(row, idx, json_array::<i32>),
        "_int8" => get_or_null(row, idx, json_array::<i64>),
        "_bool" => get_or_null(row, idx, json_array::<bool>),
        _ => get_or_null(row, idx, |v: PgFallbackString| Value::String(v.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_payload(weight: i16, sign: u16, dscale: i16, groups: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&(groups.len() as i16).to_be_bytes());
        raw.extend_from_slice(&weight.to_be_bytes());
        raw.extend_from_slice(&sign.to_be_bytes());
        raw.extend_from_slice(&dscale.to_be_bytes());
        for group in groups {
            raw.extend_from_slice(&group.to_be_bytes());
        }
        raw
    }

    #[test]
    fn test_numeric_decoding() {
        // 12345.678
        let raw = numeric_payload(1, NUMERIC_POSITIVE, 3, &[1, 2345, 6780]);
        assert_eq!(PgNumericString::parse(&raw).unwrap(), "12345.678");

        // -0.5 keeps its sign
        let raw = numeric_payload(-1, NUMERIC_NEGATIVE, 1, &[5000]);
        assert_eq!(PgNumericString::parse(&raw).unwrap(), "-0.5");

        // 0.00012
        let raw = numeric_payload(-1, NUMERIC_POSITIVE, 5, &[1, 2000]);
        assert_eq!(PgNumericString::parse(&raw).unwrap(), "0.00012");

        // 0.000000012, two zero groups before the first stored digit
        let raw = numeric_payload(-3, NUMERIC_POSITIVE, 9, &[1200]);
        assert_eq!(PgNumericString::parse(&raw).unwrap(), "0.000000012");

        let raw = numeric_payload(0, NUMERIC_NAN, 0, &[]);
        assert_eq!(PgNumericString::parse(&raw).unwrap(), "NaN");

        assert!(PgNumericString::parse(&[0, 1]).is_err());
    }

    #[test]
    fn test_numeric_encoding_matches_wire_layout() {
        assert_eq!(
            encode_numeric("-12345.678").unwrap(),
            numeric_payload(1, NUMERIC_NEGATIVE, 3, &[1, 2345, 6780])
        );
        assert_eq!(encode_numeric("0.00").unwrap(), numeric_payload(0, NUMERIC_POSITIVE, 2, &[]));
        assert_eq!(
            encode_numeric("0.00012").unwrap(),
            numeric_payload(-1, NUMERIC_POSITIVE, 5, &[1, 2000])
        );
        assert_eq!(
            encode_numeric(".000000012").unwrap(),
            numeric_payload(-3, NUMERIC_POSITIVE, 9, &[1200])
        );
        assert!(encode_numeric("1e5").is_none());
        assert!(encode_numeric("").is_none());
    }

    #[test]
    fn test_int_coercion_follows_column_width() {
        assert_eq!(PgValue::coerce_int(7, &Type::INT4), PgValue::Int32(7));
        assert_eq!(PgValue::coerce_int(7, &Type::INT2), PgValue::Int16(7));
        assert_eq!(PgValue::coerce_int(70_000, &Type::INT2), PgValue::Int64(70_000));
        assert_eq!(PgValue::coerce_int(7, &Type::NUMERIC), PgValue::Numeric("7".into()));
        assert_eq!(PgValue::coerce_int(7, &Type::TEXT), PgValue::String("7".into()));
    }

    #[test]
    fn test_string_coercion_parses_typed_columns() {
        assert_eq!(PgValue::coerce_string("42", &Type::INT8), PgValue::Int64(42));
        assert_eq!(PgValue::coerce_string("true", &Type::BOOL), PgValue::Bool(true));
        assert_eq!(
            PgValue::coerce_string("2024-03-01", &Type::DATE),
            PgValue::Date(chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
        );
        assert_eq!(
            PgValue::coerce_string("2024-03-01 10:30:00", &Type::TIMESTAMPTZ),
            PgValue::DateTimeUtc(
                chrono::NaiveDate::from_ymd_opt(2024, 3, 1)
                    .unwrap()
                    .and_hms_opt(10, 30, 0)
                    .unwrap()
                    .and_utc()
            )
        );
        assert_eq!(
            PgValue::coerce_string("{\"a\":1}", &Type::JSONB),
            PgValue::Json(serde_json::json!({"a": 1}))
        );
        assert_eq!(PgValue::coerce_string("1.50", &Type::NUMERIC), PgValue::Numeric("1.50".into()));
        // unparseable text is left for the server to reject
        assert_eq!(PgValue::coerce_string("abc", &Type::INT4), PgValue::String("abc".into()));
    }

    #[test]
    fn test_parse_dsn_accepts_key_value_and_url() {
        let config = parse_dsn(
            "host=localhost user=app password=secret dbname=shop port=5433 sslmode=disable",
        )
        .unwrap();
        assert_eq!(config.get_user(), Some("app"));
        assert_eq!(config.get_dbname(), Some("shop"));
        assert_eq!(config.get_ports(), &[5433]);

        let config = parse_dsn("postgres://app@db.internal/shop").unwrap();
        assert_eq!(config.get_dbname(), Some("shop"));

        let err = parse_dsn("port=notaport").unwrap_err();
        assert!(matches!(err, WeebaseError::Configuration(_)));
    }
}
