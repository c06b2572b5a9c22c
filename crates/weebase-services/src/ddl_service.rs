//! Table creation service

use weebase_core::statement::{ColumnSpec, TableRef, build_create_table};
use weebase_core::{Connection, SafetyPolicy, WeebaseError};

use crate::error::ServiceResult;

/// Service for `CREATE TABLE`. Altering and dropping tables is not offered.
#[derive(Debug, Clone, Default)]
pub struct DdlService;

impl DdlService {
    pub fn new() -> Self {
        Self
    }

    /// Create a table and return the SQL that was executed
    #[tracing::instrument(skip(self, conn, columns, policy), fields(driver = conn.driver_name()))]
    pub async fn create_table(
        &self,
        conn: &dyn Connection,
        schema: Option<&str>,
        table: &str,
        columns: &[ColumnSpec],
        policy: &SafetyPolicy,
    ) -> ServiceResult<String> {
        if policy.read_only_mode {
            return Err(WeebaseError::SafetyViolation(
                "create table is not allowed in read-only mode".into(),
            )
            .into());
        }

        let sql = build_create_table(&conn.dialect(), &TableRef::new(schema, table), columns)?;
        conn.execute(&sql, &[])
            .await
            .map_err(|e| WeebaseError::execution("create table", e))?;

        tracing::info!(table = %table, "table created");
        Ok(sql)
    }
}
