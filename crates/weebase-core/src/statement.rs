//! SQL statement builders
//!
//! Every builder validates identifiers before composing SQL text and never
//! interpolates values: those travel alongside the text as positional
//! parameters in the dialect's native placeholder style.

mod catalog;
mod ddl;
mod dml;
mod dsn;
mod explain;
mod select;

pub use catalog::*;
pub use ddl::*;
pub use dml::*;
pub use dsn::*;
pub use explain::*;
pub use select::*;

use crate::{Dialect, Result, Value, quote_identifier, validate_identifier};

/// SQL text plus the values bound to its placeholders
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl SqlStatement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// A statement without parameters
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }
}

/// A table addressed by an optional schema and a name
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableRef {
    pub schema: Option<String>,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: Option<&str>, table: &str) -> Self {
        Self {
            schema: schema
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            table: table.trim().to_string(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(schema) = &self.schema {
            validate_identifier("schema", schema)?;
        }
        validate_identifier("table", &self.table)
    }

    /// Validated and quoted `schema.table` (or just `table`)
    pub fn quoted(&self, dialect: &Dialect) -> Result<String> {
        self.validate()?;
        Ok(match &self.schema {
            Some(schema) => format!(
                "{}.{}",
                quote_identifier(dialect, schema),
                quote_identifier(dialect, &self.table)
            ),
            None => quote_identifier(dialect, &self.table),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_ref_trims_blank_schema() {
        let table = TableRef::new(Some("  "), " users ");
        assert_eq!(table.schema, None);
        assert_eq!(table.table, "users");
    }

    #[test]
    fn test_table_ref_quotes_schema_and_table_separately() {
        let table = TableRef::new(Some("dbo"), "users");
        assert_eq!(table.quoted(&Dialect::SqlServer).unwrap(), "[dbo].[users]");
        assert_eq!(table.quoted(&Dialect::MySql).unwrap(), "`dbo`.`users`");
    }

    #[test]
    fn test_table_ref_rejects_dotted_table() {
        // qualification goes through `schema`, never through the table name
        let table = TableRef::new(None, "public.users");
        assert!(table.quoted(&Dialect::Postgres).is_err());
    }
}
