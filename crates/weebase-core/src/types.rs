//! Core types for Weebase

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A database value that can represent any SQL type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,
    /// Boolean
    Bool(bool),
    /// 8-bit signed integer
    Int8(i8),
    /// 16-bit signed integer
    Int16(i16),
    /// 32-bit signed integer
    Int32(i32),
    /// 64-bit signed integer
    Int64(i64),
    /// 32-bit floating point
    Float32(f32),
    /// 64-bit floating point
    Float64(f64),
    /// Decimal/Numeric (stored as string for precision)
    Decimal(String),
    /// UTF-8 string
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// UUID
    Uuid(Uuid),
    /// Date (year, month, day)
    Date(NaiveDate),
    /// Time (hour, minute, second, nanosecond)
    Time(NaiveTime),
    /// DateTime without timezone
    DateTime(NaiveDateTime),
    /// DateTime with timezone (UTC)
    DateTimeUtc(DateTime<Utc>),
    /// JSON value
    Json(serde_json::Value),
}

impl Value {
    /// Check if the value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int8(v) => Some(*v as i64),
            Value::Int16(v) => Some(*v as i64),
            Value::Int32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            Value::Decimal(s) | Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    /// Try to get as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int8(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Decimal(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::Uuid(v) => write!(f, "{}", v),
            Value::Date(v) => write!(f, "{}", v),
            Value::Time(v) => write!(f, "{}", v),
            Value::DateTime(v) => write!(f, "{}", v),
            Value::DateTimeUtc(v) => write!(f, "{}", v),
            Value::Json(v) => write!(f, "{}", v),
        }
    }
}

/// A row from a query result
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Column values
    pub values: Vec<Value>,
    columns: Vec<String>,
}

impl Row {
    /// Create a new row
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    /// Get a value by column index
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get column names
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Convert to a HashMap keyed by column name
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.columns
            .iter()
            .zip(self.values.iter())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Column metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ColumnMeta {
    /// Column name
    #[serde(default)]
    pub name: String,
    /// Data type (database-specific string)
    #[serde(default)]
    pub data_type: String,
    /// Whether the column can be NULL
    #[serde(default)]
    pub nullable: bool,
    /// Column ordinal position (0-based)
    #[serde(default)]
    pub ordinal: usize,
    /// Default value expression
    #[serde(default)]
    pub default_value: Option<String>,
}

impl ColumnMeta {
    /// Metadata for a result-set column where only name and type are known
    pub fn result_column(
        name: impl Into<String>,
        data_type: impl Into<String>,
        ordinal: usize,
    ) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            ordinal,
            default_value: None,
        }
    }
}

/// Query result
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Unique query ID
    pub id: Uuid,
    /// Column metadata
    pub columns: Vec<ColumnMeta>,
    /// Result rows
    pub rows: Vec<Row>,
    /// Total row count (if known)
    pub total_rows: Option<u64>,
    /// Whether rows were dropped because the result exceeded a row cap
    pub truncated: bool,
    /// Rows affected (for DML statements)
    pub affected_rows: u64,
    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

impl QueryResult {
    /// Create a new empty query result
    pub fn empty() -> Self {
        Self {
            id: Uuid::new_v4(),
            columns: Vec::new(),
            rows: Vec::new(),
            total_rows: None,
            truncated: false,
            affected_rows: 0,
            execution_time_ms: 0,
        }
    }

    /// Check if the result has rows
    pub fn has_rows(&self) -> bool {
        !self.rows.is_empty()
    }

    /// Get the number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Column names in result order
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// First value of the first row, as used by scalar queries like `COUNT(*)`
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.get(0))
    }

    /// Drop rows beyond `max_rows`, marking the result as truncated
    pub fn cap_rows(mut self, max_rows: usize) -> Self {
        if self.rows.len() > max_rows {
            self.rows.truncate(max_rows);
            self.truncated = true;
        }
        self
    }
}

/// Result of a statement that does not produce rows
#[derive(Debug, Clone)]
pub struct StatementResult {
    /// Rows affected, if the driver reports it
    pub affected_rows: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with_rows(count: i64) -> QueryResult {
        let mut result = QueryResult::empty();
        result.columns = vec![ColumnMeta::result_column("n", "INTEGER", 0)];
        result.rows = (0..count)
            .map(|n| Row::new(vec!["n".into()], vec![Value::Int64(n)]))
            .collect();
        result
    }

    #[test]
    fn test_cap_rows_marks_truncation() {
        let capped = result_with_rows(5).cap_rows(3);
        assert_eq!(capped.row_count(), 3);
        assert!(capped.truncated);

        let untouched = result_with_rows(3).cap_rows(3);
        assert_eq!(untouched.row_count(), 3);
        assert!(!untouched.truncated);
    }

    #[test]
    fn test_scalar_reads_first_cell() {
        let result = result_with_rows(2);
        assert_eq!(result.scalar(), Some(&Value::Int64(0)));
        assert_eq!(QueryResult::empty().scalar(), None);
    }

    #[test]
    fn test_as_i64_parses_numeric_strings() {
        assert_eq!(Value::String(" 42 ".into()).as_i64(), Some(42));
        assert_eq!(Value::Decimal("7".into()).as_i64(), Some(7));
        assert_eq!(Value::Bool(true).as_i64(), None);
    }

    #[test]
    fn test_row_lookup_by_name() {
        let row = Row::new(
            vec!["id".into(), "name".into()],
            vec![Value::Int64(1), Value::from("Alice")],
        );
        assert_eq!(row.get_by_name("name"), Some(&Value::from("Alice")));
        assert_eq!(row.get_by_name("missing"), None);
        assert_eq!(row.to_map().len(), 2);
    }
}
