//! Schema introspection queries
//!
//! Every query yields the catalog names in its first column, except table
//! info which returns `(name, data_type, is_nullable, column_default)` with
//! `is_nullable` spelled `YES` or `NO` in every dialect.

use super::{SqlStatement, TableRef};
use crate::dialect::Placeholders;
use crate::{Dialect, Result, Value, WeebaseError, quote_identifier, validate_identifier};

/// Default page size for table listings
pub const DEFAULT_TABLE_LIMIT: usize = 50;
/// Largest page size for table listings
pub const MAX_TABLE_LIMIT: usize = 500;

/// Either a fixed answer that needs no round trip or a query to run
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogQuery {
    Fixed(Vec<String>),
    Query(SqlStatement),
}

/// Statements tried in order until one yields a non-empty value in `column`
#[derive(Debug, Clone, PartialEq)]
pub struct DefinitionQuery {
    pub attempts: Vec<SqlStatement>,
    pub column: usize,
}

/// Filters for listing tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableListRequest {
    pub schema: Option<String>,
    /// Case-insensitive substring match on the table name
    pub search: Option<String>,
    pub include_views: bool,
    pub limit: usize,
    pub offset: usize,
}

impl Default for TableListRequest {
    fn default() -> Self {
        Self {
            schema: None,
            search: None,
            include_views: false,
            limit: DEFAULT_TABLE_LIMIT,
            offset: 0,
        }
    }
}

fn schema_or<'a>(schema: &'a Option<String>, default: &'a str) -> Result<&'a str> {
    match schema.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(schema) => {
            validate_identifier("schema", schema)?;
            Ok(schema)
        }
        None => Ok(default),
    }
}

fn unsupported(dialect: &Dialect) -> WeebaseError {
    WeebaseError::Configuration(format!("unsupported driver: {}", dialect))
}

/// Databases visible on the server
pub fn build_list_databases(dialect: &Dialect) -> Result<CatalogQuery> {
    Ok(match dialect {
        Dialect::MySql => CatalogQuery::Query(SqlStatement::raw("SHOW DATABASES")),
        Dialect::Postgres => CatalogQuery::Query(SqlStatement::raw(
            "SELECT datname::text FROM pg_database WHERE datistemplate = false ORDER BY datname",
        )),
        Dialect::Sqlite => CatalogQuery::Fixed(vec!["main".to_string()]),
        Dialect::SqlServer => CatalogQuery::Query(SqlStatement::raw(
            "SELECT name FROM sys.databases \
             WHERE name NOT IN ('master', 'tempdb', 'model', 'msdb') ORDER BY name",
        )),
        Dialect::Other(_) => return Err(unsupported(dialect)),
    })
}

/// User schemas. MySQL has no schemas apart from databases, and SQLite has
/// none at all.
pub fn build_list_schemas(dialect: &Dialect) -> Result<CatalogQuery> {
    Ok(match dialect {
        Dialect::MySql => CatalogQuery::Query(SqlStatement::raw("SHOW DATABASES")),
        Dialect::Postgres => CatalogQuery::Query(SqlStatement::raw(
            "SELECT schema_name::text FROM information_schema.schemata \
             WHERE schema_name NOT IN ('pg_catalog', 'information_schema', 'pg_toast') \
             ORDER BY schema_name",
        )),
        Dialect::Sqlite => CatalogQuery::Fixed(Vec::new()),
        Dialect::SqlServer => CatalogQuery::Query(SqlStatement::raw(
            "SELECT name FROM sys.schemas \
             WHERE name NOT IN ('sys', 'INFORMATION_SCHEMA', 'guest', 'db_owner', \
             'db_accessadmin', 'db_securityadmin', 'db_ddladmin', 'db_backupoperator', \
             'db_datareader', 'db_datawriter', 'db_denydatareader', 'db_denydatawriter') \
             ORDER BY name",
        )),
        Dialect::Other(_) => return Err(unsupported(dialect)),
    })
}

/// Tables (and optionally views) in a schema, filtered and paginated
pub fn build_list_tables(dialect: &Dialect, request: &TableListRequest) -> Result<SqlStatement> {
    if request.limit == 0 || request.limit > MAX_TABLE_LIMIT {
        return Err(WeebaseError::Validation(format!(
            "limit must be between 1 and {}",
            MAX_TABLE_LIMIT
        )));
    }
    let search = request
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Value::String(format!("%{}%", s)));

    let mut placeholders = Placeholders::new(dialect);
    let mut params = Vec::new();
    let sql = match dialect {
        Dialect::Postgres | Dialect::MySql => {
            let schema = match dialect {
                Dialect::Postgres => schema_or(&request.schema, "public")?,
                _ => schema_or(&request.schema, "")?,
            };
            if schema.is_empty() {
                return Err(WeebaseError::Validation("schema is required".into()));
            }
            let name = if dialect == &Dialect::Postgres {
                "table_name::text"
            } else {
                "table_name"
            };
            let mut sql = format!(
                "SELECT {} AS name FROM information_schema.tables WHERE table_schema = {}",
                name,
                placeholders.next()
            );
            params.push(Value::from(schema));
            if !request.include_views {
                sql.push_str(" AND table_type = 'BASE TABLE'");
            }
            if let Some(pattern) = search {
                let op = if dialect == &Dialect::Postgres { "ILIKE" } else { "LIKE" };
                sql.push_str(&format!(" AND table_name {} {}", op, placeholders.next()));
                params.push(pattern);
            }
            sql.push_str(&format!(
                " ORDER BY name LIMIT {} OFFSET {}",
                request.limit, request.offset
            ));
            sql
        }
        Dialect::Sqlite => {
            let master = match schema_or(&request.schema, "")? {
                "" => "sqlite_master".to_string(),
                schema => format!("{}.sqlite_master", quote_identifier(dialect, schema)),
            };
            let kinds = if request.include_views {
                "type IN ('table', 'view')"
            } else {
                "type = 'table'"
            };
            let mut sql = format!(
                "SELECT name FROM {} WHERE {} AND name NOT LIKE 'sqlite_%'",
                master, kinds
            );
            if let Some(pattern) = search {
                sql.push_str(&format!(" AND name LIKE {}", placeholders.next()));
                params.push(pattern);
            }
            sql.push_str(&format!(
                " ORDER BY name LIMIT {} OFFSET {}",
                request.limit, request.offset
            ));
            sql
        }
        Dialect::SqlServer => {
            let schema = schema_or(&request.schema, "dbo")?;
            let kinds = if request.include_views { "'U', 'V'" } else { "'U'" };
            let mut sql = format!(
                "SELECT o.name AS name FROM sys.objects o \
                 JOIN sys.schemas s ON o.schema_id = s.schema_id \
                 WHERE s.name = {} AND o.type IN ({})",
                placeholders.next(),
                kinds
            );
            params.push(Value::from(schema));
            if let Some(pattern) = search {
                sql.push_str(&format!(" AND o.name LIKE {}", placeholders.next()));
                params.push(pattern);
            }
            sql.push_str(&format!(
                " ORDER BY o.name OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
                request.offset, request.limit
            ));
            sql
        }
        Dialect::Other(_) => return Err(unsupported(dialect)),
    };
    Ok(SqlStatement::new(sql, params))
}

/// Column metadata for a table, in ordinal order
pub fn build_table_info(dialect: &Dialect, table: &TableRef) -> Result<SqlStatement> {
    table.validate()?;
    let name = Value::from(table.table.as_str());

    Ok(match dialect {
        Dialect::Postgres => SqlStatement::new(
            "SELECT column_name::text, data_type::text, is_nullable::text, column_default::text \
             FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 \
             ORDER BY ordinal_position",
            vec![Value::from(schema_or(&table.schema, "public")?), name],
        ),
        Dialect::MySql => {
            let mut sql = String::from(
                "SELECT column_name, column_type, is_nullable, column_default \
                 FROM information_schema.columns WHERE ",
            );
            let mut params = Vec::new();
            match &table.schema {
                Some(schema) => {
                    sql.push_str("table_schema = ?");
                    params.push(Value::from(schema.as_str()));
                }
                None => sql.push_str("table_schema = DATABASE()"),
            }
            sql.push_str(" AND table_name = ? ORDER BY ordinal_position");
            params.push(name);
            SqlStatement::new(sql, params)
        }
        Dialect::Sqlite => {
            let (source, params) = match &table.schema {
                Some(schema) => (
                    "pragma_table_info(?, ?)",
                    vec![name, Value::from(schema.as_str())],
                ),
                None => ("pragma_table_info(?)", vec![name]),
            };
            SqlStatement::new(
                format!(
                    "SELECT name, type, CASE WHEN \"notnull\" = 1 THEN 'NO' ELSE 'YES' END, \
                     dflt_value FROM {} ORDER BY cid",
                    source
                ),
                params,
            )
        }
        Dialect::SqlServer => SqlStatement::new(
            "SELECT c.name, t.name, CASE WHEN c.is_nullable = 1 THEN 'YES' ELSE 'NO' END, \
             OBJECT_DEFINITION(c.default_object_id) \
             FROM sys.columns c \
             JOIN sys.types t ON c.user_type_id = t.user_type_id \
             JOIN sys.tables tb ON c.object_id = tb.object_id \
             JOIN sys.schemas s ON tb.schema_id = s.schema_id \
             WHERE s.name = @P1 AND tb.name = @P2 \
             ORDER BY c.column_id",
            vec![Value::from(schema_or(&table.schema, "dbo")?), name],
        ),
        Dialect::Other(_) => return Err(unsupported(dialect)),
    })
}

/// The SQL text of a view
pub fn build_view_definition(dialect: &Dialect, view: &TableRef) -> Result<DefinitionQuery> {
    if let Some(schema) = &view.schema {
        validate_identifier("schema", schema)?;
    }
    validate_identifier("view", &view.table)?;
    let name = Value::from(view.table.as_str());

    Ok(match dialect {
        Dialect::Postgres => {
            let schema = Value::from(schema_or(&view.schema, "public")?);
            DefinitionQuery {
                attempts: vec![
                    SqlStatement::new(
                        "SELECT pg_get_viewdef(\
                         to_regclass(format('%I.%I', $1::text, $2::text)), true)",
                        vec![schema.clone(), name.clone()],
                    ),
                    SqlStatement::new(
                        "SELECT view_definition::text FROM information_schema.views \
                         WHERE table_schema = $1 AND table_name = $2",
                        vec![schema, name],
                    ),
                ],
                column: 0,
            }
        }
        Dialect::MySql => {
            let target = match &view.schema {
                Some(_) => view.quoted(dialect)?,
                None => quote_identifier(dialect, &view.table),
            };
            DefinitionQuery {
                attempts: vec![SqlStatement::raw(format!("SHOW CREATE VIEW {}", target))],
                column: 1,
            }
        }
        Dialect::Sqlite => {
            let master = match &view.schema {
                Some(schema) => format!("{}.sqlite_master", quote_identifier(dialect, schema)),
                None => "sqlite_master".to_string(),
            };
            DefinitionQuery {
                attempts: vec![SqlStatement::new(
                    format!("SELECT sql FROM {} WHERE type = 'view' AND name = ?", master),
                    vec![name],
                )],
                column: 0,
            }
        }
        Dialect::SqlServer => DefinitionQuery {
            attempts: vec![SqlStatement::new(
                "SELECT m.definition FROM sys.views v \
                 JOIN sys.schemas s ON v.schema_id = s.schema_id \
                 JOIN sys.sql_modules m ON v.object_id = m.object_id \
                 WHERE s.name = @P1 AND v.name = @P2",
                vec![Value::from(schema_or(&view.schema, "dbo")?), name],
            )],
            column: 0,
        },
        Dialect::Other(_) => return Err(unsupported(dialect)),
    })
}
