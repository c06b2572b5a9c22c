//! CREATE TABLE statements
//!
//! Only table creation is supported. ALTER and DROP are refused by
//! [`build_alter_table`] and [`build_drop_table`].

use serde::{Deserialize, Serialize};

use super::TableRef;
use crate::{Dialect, Result, WeebaseError, quote_identifier, validate_identifier};

/// One column of a CREATE TABLE request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnSpec {
    pub name: String,
    /// SQL type as typed by the user, e.g. `varchar` or `numeric(10,2)`
    pub base_type: String,
    /// Appended as `type(length)` unless `base_type` already has parentheses
    pub length: Option<String>,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, base_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_type: base_type.into(),
            nullable: true,
            ..Default::default()
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn length(mut self, length: impl Into<String>) -> Self {
        self.length = Some(length.into());
        self
    }
}

fn is_valid_type_name(s: &str) -> bool {
    s.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '(' | ')' | ','))
}

fn is_valid_length(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, ',' | ' '))
}

/// Type text with the optional length applied
fn column_type(column: &ColumnSpec) -> Result<String> {
    let base = column.base_type.trim();
    if base.is_empty() {
        return Err(WeebaseError::Validation(format!(
            "type is required for column {}",
            column.name.trim()
        )));
    }
    if !is_valid_type_name(base) {
        return Err(WeebaseError::Validation(format!("invalid type: {:?}", base)));
    }

    match column.length.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
        Some(length) if !base.contains('(') => {
            if !is_valid_length(length) {
                return Err(WeebaseError::Validation(format!("invalid length: {:?}", length)));
            }
            Ok(format!("{}({})", base, length))
        }
        _ => Ok(base.to_string()),
    }
}

/// Build a column definition. Returns the definition and, when the column
/// takes part in a table-level primary key, its quoted name.
fn column_definition(
    dialect: &Dialect,
    column: &ColumnSpec,
    sole_primary_key: bool,
) -> Result<(String, Option<String>)> {
    let name = column.name.trim();
    validate_identifier("column", name)?;
    let quoted = quote_identifier(dialect, name);
    let mut ty = column_type(column)?;
    let pk = column.primary_key.then(|| quoted.clone());

    let def = match dialect {
        Dialect::Postgres => {
            if column.auto_increment {
                ty = if ty.to_ascii_lowercase().contains("big") {
                    "bigserial".into()
                } else {
                    "serial".into()
                };
            }
            let mut def = format!("{} {}", quoted, ty);
            // serial columns are implicitly NOT NULL
            if !column.nullable && !column.auto_increment {
                def.push_str(" NOT NULL");
            }
            def
        }
        Dialect::MySql => {
            let mut def = format!("{} {}", quoted, ty);
            if !column.nullable {
                def.push_str(" NOT NULL");
            }
            if column.auto_increment {
                def.push_str(" AUTO_INCREMENT");
            }
            def
        }
        Dialect::Sqlite => {
            if column.auto_increment {
                if !sole_primary_key {
                    return Err(WeebaseError::Validation(format!(
                        "auto increment on {} requires it to be the only primary key column",
                        name
                    )));
                }
                return Ok((format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quoted), None));
            }
            let mut def = format!("{} {}", quoted, ty);
            if sole_primary_key {
                def.push_str(" PRIMARY KEY");
                return Ok((def, None));
            }
            if !column.nullable {
                def.push_str(" NOT NULL");
            }
            def
        }
        Dialect::SqlServer => {
            let mut def = format!("{} {}", quoted, ty);
            if column.auto_increment {
                def.push_str(" IDENTITY(1,1)");
            }
            if !column.nullable {
                def.push_str(" NOT NULL");
            }
            def
        }
        Dialect::Other(name) => {
            return Err(WeebaseError::Configuration(format!(
                "unsupported driver: {}",
                name
            )));
        }
    };
    Ok((def, pk))
}

/// Build a `CREATE TABLE` statement. Columns with a blank name are skipped.
pub fn build_create_table(
    dialect: &Dialect,
    table: &TableRef,
    columns: &[ColumnSpec],
) -> Result<String> {
    dialect.ensure_supported()?;
    let target = table.quoted(dialect)?;

    let columns: Vec<&ColumnSpec> = columns.iter().filter(|c| !c.name.trim().is_empty()).collect();
    if columns.is_empty() {
        return Err(WeebaseError::Validation("at least one column required".into()));
    }

    let pk_count = columns.iter().filter(|c| c.primary_key).count();
    let mut defs = Vec::with_capacity(columns.len() + 1);
    let mut pks = Vec::new();
    for column in columns {
        let sole_pk = column.primary_key && pk_count == 1;
        let (def, pk) = column_definition(dialect, column, sole_pk)?;
        defs.push(def);
        pks.extend(pk);
    }

    // a single sqlite key is declared inline with its column
    let table_level_pk = !pks.is_empty() && !(dialect == &Dialect::Sqlite && pk_count == 1);
    if table_level_pk {
        defs.push(format!("PRIMARY KEY ({})", pks.join(", ")));
    }

    Ok(format!("CREATE TABLE {} (\n  {}\n)", target, defs.join(",\n  ")))
}

/// ALTER TABLE is not offered
pub fn build_alter_table(_dialect: &Dialect, table: &TableRef) -> Result<String> {
    Err(WeebaseError::NotSupported(format!(
        "ALTER TABLE {} is not supported",
        table.table
    )))
}

/// DROP TABLE is not offered
pub fn build_drop_table(_dialect: &Dialect, table: &TableRef) -> Result<String> {
    Err(WeebaseError::NotSupported(format!(
        "DROP TABLE {} is not supported",
        table.table
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn users() -> TableRef {
        TableRef::new(None, "users")
    }

    #[test]
    fn test_postgres_serial_has_no_trailing_primary_key() {
        let sql = build_create_table(
            &Dialect::Postgres,
            &users(),
            &[
                ColumnSpec::new("id", "integer").not_null().auto_increment(),
                ColumnSpec::new("name", "text").not_null(),
            ],
        )
        .unwrap();

        assert_eq!(
            sql,
            indoc! {r#"
                CREATE TABLE "users" (
                  "id" serial,
                  "name" text NOT NULL
                )"#}
        );
        assert!(!sql.contains("PRIMARY KEY"));
    }

    #[test]
    fn test_postgres_bigserial_and_primary_key() {
        let sql = build_create_table(
            &Dialect::Postgres,
            &TableRef::new(Some("app"), "events"),
            &[
                ColumnSpec::new("id", "bigint").auto_increment().primary_key(),
                ColumnSpec::new("title", "varchar").length("120"),
            ],
        )
        .unwrap();

        assert_eq!(
            sql,
            indoc! {r#"
                CREATE TABLE "app"."events" (
                  "id" bigserial,
                  "title" varchar(120),
                  PRIMARY KEY ("id")
                )"#}
        );
    }

    #[test]
    fn test_mysql_auto_increment() {
        let sql = build_create_table(
            &Dialect::MySql,
            &users(),
            &[ColumnSpec::new("id", "int").not_null().auto_increment().primary_key()],
        )
        .unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE `users` (\n  `id` int NOT NULL AUTO_INCREMENT,\n  PRIMARY KEY (`id`)\n)"
        );
    }

    #[test]
    fn test_sqlserver_identity() {
        let sql = build_create_table(
            &Dialect::SqlServer,
            &TableRef::new(Some("dbo"), "users"),
            &[
                ColumnSpec::new("id", "int").not_null().auto_increment().primary_key(),
                ColumnSpec::new("name", "nvarchar(100)").length("50"),
            ],
        )
        .unwrap();
        assert_eq!(
            sql,
            indoc! {"
                CREATE TABLE [dbo].[users] (
                  [id] int IDENTITY(1,1) NOT NULL,
                  [name] nvarchar(100),
                  PRIMARY KEY ([id])
                )"}
        );
    }

    #[test]
    fn test_sqlite_autoincrement_on_sole_key() {
        let sql = build_create_table(
            &Dialect::Sqlite,
            &users(),
            &[
                ColumnSpec::new("id", "int").auto_increment().primary_key(),
                ColumnSpec::new("email", "text").not_null(),
            ],
        )
        .unwrap();
        assert_eq!(
            sql,
            indoc! {r#"
                CREATE TABLE "users" (
                  "id" INTEGER PRIMARY KEY AUTOINCREMENT,
                  "email" text NOT NULL
                )"#}
        );
    }

    #[test]
    fn test_sqlite_composite_key_is_table_level() {
        let sql = build_create_table(
            &Dialect::Sqlite,
            &TableRef::new(None, "memberships"),
            &[
                ColumnSpec::new("user_id", "integer").primary_key(),
                ColumnSpec::new("group_id", "integer").primary_key(),
            ],
        )
        .unwrap();
        assert!(sql.ends_with("PRIMARY KEY (\"user_id\", \"group_id\")\n)"));
        assert_eq!(sql.matches("PRIMARY KEY").count(), 1);
    }

    #[test]
    fn test_sqlite_autoincrement_requires_sole_key() {
        let err = build_create_table(
            &Dialect::Sqlite,
            &users(),
            &[ColumnSpec::new("id", "integer").auto_increment()],
        )
        .unwrap_err();
        assert!(matches!(err, WeebaseError::Validation(_)));
    }

    #[test]
    fn test_blank_columns_are_skipped() {
        let blank = [ColumnSpec::new("  ", "text")];
        let err = build_create_table(&Dialect::Postgres, &users(), &blank).unwrap_err();
        assert_eq!(err.to_string(), "Validation error: at least one column required");
    }

    #[test]
    fn test_rejects_injection_in_names_and_types() {
        for columns in [
            vec![ColumnSpec::new("id; DROP TABLE x", "int")],
            vec![ColumnSpec::new("id", "int; DROP TABLE x")],
            vec![ColumnSpec::new("id", "varchar").length("10); --")],
        ] {
            let err = build_create_table(&Dialect::Postgres, &users(), &columns).unwrap_err();
            assert!(matches!(err, WeebaseError::Validation(_)), "{columns:?}");
        }
    }

    #[test]
    fn test_alter_and_drop_are_refused() {
        assert!(matches!(
            build_alter_table(&Dialect::Postgres, &users()),
            Err(WeebaseError::NotSupported(_))
        ));
        assert!(matches!(
            build_drop_table(&Dialect::Sqlite, &users()),
            Err(WeebaseError::NotSupported(_))
        ));
    }
}
