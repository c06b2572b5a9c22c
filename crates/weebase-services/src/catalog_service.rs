//! Schema browsing service
//!
//! Lists databases, schemas and tables, and reads column metadata and view
//! definitions. Every query is built by `weebase_core::statement` for the
//! connection's dialect.

use weebase_core::statement::{
    CatalogQuery, TableListRequest, TableRef, build_list_databases, build_list_schemas,
    build_list_tables, build_table_info, build_view_definition,
};
use weebase_core::{ColumnMeta, Connection, QueryResult, Value, WeebaseError};

use crate::error::ServiceResult;

/// Service for catalog introspection
#[derive(Debug, Clone, Default)]
pub struct CatalogService;

impl CatalogService {
    pub fn new() -> Self {
        Self
    }

    #[tracing::instrument(skip(self, conn), fields(driver = conn.driver_name()))]
    pub async fn list_databases(&self, conn: &dyn Connection) -> ServiceResult<Vec<String>> {
        let query = build_list_databases(&conn.dialect())?;
        run_catalog(conn, query, "list databases").await
    }

    #[tracing::instrument(skip(self, conn), fields(driver = conn.driver_name()))]
    pub async fn list_schemas(&self, conn: &dyn Connection) -> ServiceResult<Vec<String>> {
        let query = build_list_schemas(&conn.dialect())?;
        run_catalog(conn, query, "list schemas").await
    }

    #[tracing::instrument(skip(self, conn), fields(driver = conn.driver_name()))]
    pub async fn list_tables(
        &self,
        conn: &dyn Connection,
        request: &TableListRequest,
    ) -> ServiceResult<Vec<String>> {
        let statement = build_list_tables(&conn.dialect(), request)?;
        let result = conn
            .query(&statement.sql, &statement.params)
            .await
            .map_err(|e| WeebaseError::execution("list tables", e))?;
        Ok(first_column(&result))
    }

    /// Column metadata in ordinal order
    #[tracing::instrument(skip(self, conn), fields(driver = conn.driver_name()))]
    pub async fn table_info(
        &self,
        conn: &dyn Connection,
        schema: Option<&str>,
        table: &str,
    ) -> ServiceResult<Vec<ColumnMeta>> {
        let statement = build_table_info(&conn.dialect(), &TableRef::new(schema, table))?;
        let result = conn
            .query(&statement.sql, &statement.params)
            .await
            .map_err(|e| WeebaseError::execution("table info", e))?;

        let columns: Vec<ColumnMeta> = result
            .rows
            .iter()
            .enumerate()
            .map(|(ordinal, row)| ColumnMeta {
                name: text(row.get(0)).unwrap_or_default(),
                data_type: text(row.get(1)).unwrap_or_default(),
                nullable: text(row.get(2)).is_some_and(|n| n.eq_ignore_ascii_case("yes")),
                ordinal,
                default_value: text(row.get(3)),
            })
            .collect();

        if columns.is_empty() {
            return Err(WeebaseError::NotFound(format!(
                "table {} has no columns or does not exist",
                table
            ))
            .into());
        }
        tracing::debug!(count = columns.len(), "columns retrieved");
        Ok(columns)
    }

    /// The SQL text of a view, `None` when the view has no stored definition
    #[tracing::instrument(skip(self, conn), fields(driver = conn.driver_name()))]
    pub async fn view_definition(
        &self,
        conn: &dyn Connection,
        schema: Option<&str>,
        view: &str,
    ) -> ServiceResult<Option<String>> {
        let query = build_view_definition(&conn.dialect(), &TableRef::new(schema, view))?;

        let mut last_error = None;
        for attempt in &query.attempts {
            match conn.query(&attempt.sql, &attempt.params).await {
                Ok(result) => {
                    last_error = None;
                    let definition = result
                        .rows
                        .first()
                        .and_then(|row| text(row.get(query.column)))
                        .filter(|d| !d.trim().is_empty());
                    if definition.is_some() {
                        return Ok(definition);
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "view definition attempt failed");
                    last_error = Some(e);
                }
            }
        }

        // an error only counts when the final attempt failed too
        match last_error {
            Some(e) => Err(WeebaseError::execution("view definition", e).into()),
            None => Ok(None),
        }
    }
}

async fn run_catalog(
    conn: &dyn Connection,
    query: CatalogQuery,
    operation: &str,
) -> ServiceResult<Vec<String>> {
    match query {
        CatalogQuery::Fixed(names) => Ok(names),
        CatalogQuery::Query(statement) => {
            let result = conn
                .query(&statement.sql, &statement.params)
                .await
                .map_err(|e| WeebaseError::execution(operation, e))?;
            Ok(first_column(&result))
        }
    }
}

fn first_column(result: &QueryResult) -> Vec<String> {
    result.rows.iter().filter_map(|row| text(row.get(0))).collect()
}

/// Render a catalog cell as text. Some drivers return names as bytes.
fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
        other => Some(other.to_string()),
    }
}
