//! Row browsing statements

use super::{SqlStatement, TableRef};
use crate::{Dialect, Result, Value, WeebaseError, quote_identifier, validate_identifier};

/// Largest page a browse statement will request
pub const MAX_BROWSE_LIMIT: usize = 1000;

fn validate_limit(limit: usize) -> Result<()> {
    if limit == 0 || limit > MAX_BROWSE_LIMIT {
        return Err(WeebaseError::Validation(format!(
            "limit must be between 1 and {}",
            MAX_BROWSE_LIMIT
        )));
    }
    Ok(())
}

/// Build a paginated `SELECT *`.
///
/// SQL Server renders `TOP (n)` and ignores `offset`.
pub fn build_browse(
    dialect: &Dialect,
    table: &TableRef,
    limit: usize,
    offset: usize,
) -> Result<SqlStatement> {
    dialect.ensure_supported()?;
    let target = table.quoted(dialect)?;
    validate_limit(limit)?;

    let sql = match dialect {
        Dialect::SqlServer => {
            if offset > 0 {
                tracing::debug!(offset, "sqlserver browse ignores offset");
            }
            format!("SELECT TOP ({}) * FROM {}", limit, target)
        }
        _ => format!("SELECT * FROM {} LIMIT {} OFFSET {}", target, limit, offset),
    };
    Ok(SqlStatement::raw(sql))
}

/// Build a lookup of the first row whose `key_column` equals `key_value`
pub fn build_view_row(
    dialect: &Dialect,
    table: &TableRef,
    key_column: &str,
    key_value: &Value,
) -> Result<SqlStatement> {
    dialect.ensure_supported()?;
    let target = table.quoted(dialect)?;
    validate_identifier("key column", key_column)?;
    if key_value.is_null() {
        return Err(WeebaseError::Validation("key value is required".into()));
    }

    let predicate = format!(
        "{} = {}",
        quote_identifier(dialect, key_column),
        dialect.placeholder(1)
    );
    let sql = match dialect {
        Dialect::SqlServer => format!("SELECT TOP (1) * FROM {} WHERE {}", target, predicate),
        _ => format!("SELECT * FROM {} WHERE {} LIMIT 1", target, predicate),
    };
    Ok(SqlStatement::new(sql, vec![key_value.clone()]))
}

/// Build `SELECT COUNT(*) FROM t`
pub fn build_row_count(dialect: &Dialect, table: &TableRef) -> Result<SqlStatement> {
    dialect.ensure_supported()?;
    Ok(SqlStatement::raw(format!("SELECT COUNT(*) FROM {}", table.quoted(dialect)?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browse_postgres_limit_offset() {
        let table = TableRef::new(Some("public"), "users");
        let stmt = build_browse(&Dialect::Postgres, &table, 10, 20).unwrap();
        assert_eq!(stmt.sql, r#"SELECT * FROM "public"."users" LIMIT 10 OFFSET 20"#);
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_browse_sqlserver_uses_top_without_offset() {
        let table = TableRef::new(None, "users");
        let stmt = build_browse(&Dialect::SqlServer, &table, 10, 20).unwrap();
        assert_eq!(stmt.sql, "SELECT TOP (10) * FROM [users]");
        assert!(!stmt.sql.contains("OFFSET"));
    }

    #[test]
    fn test_browse_rejects_out_of_range_limit() {
        let table = TableRef::new(None, "users");
        assert!(build_browse(&Dialect::Sqlite, &table, 0, 0).is_err());
        assert!(build_browse(&Dialect::Sqlite, &table, MAX_BROWSE_LIMIT + 1, 0).is_err());
    }

    #[test]
    fn test_browse_unknown_dialect() {
        let table = TableRef::new(None, "t");
        let err = build_browse(&Dialect::normalize("db2"), &table, 10, 0).unwrap_err();
        assert!(matches!(err, WeebaseError::Configuration(_)));
    }

    #[test]
    fn test_view_row() {
        let key = Value::Int64(3);
        let table = TableRef::new(None, "users");
        assert_eq!(
            build_view_row(&Dialect::MySql, &table, "id", &key).unwrap().sql,
            "SELECT * FROM `users` WHERE `id` = ? LIMIT 1"
        );
        assert_eq!(
            build_view_row(&Dialect::SqlServer, &table, "id", &key).unwrap().sql,
            "SELECT TOP (1) * FROM [users] WHERE [id] = @P1"
        );
    }
}
