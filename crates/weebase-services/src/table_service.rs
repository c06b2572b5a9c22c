//! Table browsing service
//!
//! Read paths run outside any write transaction and never go through the
//! safety executor.

use serde::Serialize;
use weebase_core::statement::{TableRef, build_browse, build_row_count, build_view_row};
use weebase_core::{Connection, QueryResult, Row, Value, WeebaseError};

use crate::error::ServiceResult;

/// Largest page `table_data` serves
pub const MAX_PER_PAGE: usize = 100;
/// Page size used when the caller asks for none
pub const DEFAULT_PER_PAGE: usize = 10;

/// One page of rows plus the table's total row count
#[derive(Debug, Clone, Serialize)]
pub struct TablePage {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub total: u64,
    pub page: usize,
    pub per_page: usize,
}

/// Service for reading table rows
#[derive(Debug, Clone)]
pub struct TableService {
    default_limit: usize,
}

impl TableService {
    /// Create a new table service
    ///
    /// # Arguments
    ///
    /// * `default_limit` - Rows returned by `browse_rows` when no limit is given
    pub fn new(default_limit: usize) -> Self {
        Self { default_limit }
    }

    /// Rows of a table, `limit` rows starting at `offset`.
    ///
    /// SQL Server ignores the offset and always returns the first rows.
    #[tracing::instrument(skip(self, conn), fields(driver = conn.driver_name()))]
    pub async fn browse_rows(
        &self,
        conn: &dyn Connection,
        schema: Option<&str>,
        table: &str,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> ServiceResult<QueryResult> {
        let limit = limit.unwrap_or(self.default_limit);
        let table = TableRef::new(schema, table);
        let statement = build_browse(&conn.dialect(), &table, limit, offset.unwrap_or(0))?;

        let result = conn
            .query_capped(&statement.sql, &statement.params, limit)
            .await
            .map_err(|e| WeebaseError::execution("browse rows", e))?;
        tracing::debug!(rows = result.row_count(), "rows browsed");
        Ok(result)
    }

    /// The row whose `key_column` equals `key_value`, if any
    #[tracing::instrument(skip(self, conn, key_value), fields(driver = conn.driver_name()))]
    pub async fn view_row(
        &self,
        conn: &dyn Connection,
        schema: Option<&str>,
        table: &str,
        key_column: &str,
        key_value: &Value,
    ) -> ServiceResult<Option<Row>> {
        let table = TableRef::new(schema, table);
        let statement = build_view_row(&conn.dialect(), &table, key_column, key_value)?;
        let result = conn
            .query_capped(&statement.sql, &statement.params, 1)
            .await
            .map_err(|e| WeebaseError::execution("view row", e))?;
        Ok(result.rows.into_iter().next())
    }

    /// Numbered page of a table with its total row count. `page` starts at 1;
    /// out-of-range page sizes fall back to the defaults.
    #[tracing::instrument(skip(self, conn), fields(driver = conn.driver_name()))]
    pub async fn table_data(
        &self,
        conn: &dyn Connection,
        table: &str,
        page: usize,
        per_page: usize,
    ) -> ServiceResult<TablePage> {
        let page = page.max(1);
        let per_page = match per_page {
            0 => DEFAULT_PER_PAGE,
            n => n.min(MAX_PER_PAGE),
        };
        // the offset has to fit a signed 64-bit OFFSET on every server
        let offset = (page - 1)
            .checked_mul(per_page)
            .filter(|offset| i64::try_from(*offset).is_ok())
            .ok_or_else(|| WeebaseError::Validation(format!("page {} is out of range", page)))?;
        let dialect = conn.dialect();
        let table = TableRef::new(None, table);

        let count = build_row_count(&dialect, &table)?;
        let total = conn
            .query(&count.sql, &count.params)
            .await
            .map_err(|e| WeebaseError::execution("count rows", e))?
            .scalar()
            .and_then(Value::as_i64)
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or(0);

        let statement = build_browse(&dialect, &table, per_page, offset)?;
        let result = conn
            .query(&statement.sql, &statement.params)
            .await
            .map_err(|e| WeebaseError::execution("read rows", e))?;

        Ok(TablePage {
            columns: result.column_names(),
            rows: result.rows.into_iter().map(|row| row.values).collect(),
            total,
            page,
            per_page,
        })
    }
}

impl Default for TableService {
    fn default() -> Self {
        Self::new(weebase_core::statement::DEFAULT_TABLE_LIMIT)
    }
}
