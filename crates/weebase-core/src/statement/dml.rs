//! Row mutation statements
//!
//! UPDATE and DELETE always target rows by a single key column. The matching
//! `SELECT COUNT(*)` uses the identical predicate so the executor can verify
//! that exactly one row is affected before committing.

use super::{SqlStatement, TableRef};
use crate::dialect::Placeholders;
use crate::{Dialect, Result, Value, WeebaseError, quote_identifier, validate_identifier};

/// Insert one row
#[derive(Debug, Clone, PartialEq)]
pub struct InsertRequest {
    pub table: TableRef,
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

/// Update the row whose `key_column` equals `key_value`
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    pub table: TableRef,
    pub key_column: String,
    pub key_value: Value,
    pub set_columns: Vec<String>,
    pub set_values: Vec<Value>,
}

/// Delete the row whose `key_column` equals `key_value`
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRequest {
    pub table: TableRef,
    pub key_column: String,
    pub key_value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Insert => "insert",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        }
    }

    /// Operation name used in error messages, e.g. "delete row"
    pub fn operation(&self) -> String {
        format!("{} row", self.as_str())
    }
}

/// A single-row mutation
#[derive(Debug, Clone, PartialEq)]
pub enum MutationRequest {
    Insert(InsertRequest),
    Update(UpdateRequest),
    Delete(DeleteRequest),
}

impl MutationRequest {
    pub fn kind(&self) -> MutationKind {
        match self {
            MutationRequest::Insert(_) => MutationKind::Insert,
            MutationRequest::Update(_) => MutationKind::Update,
            MutationRequest::Delete(_) => MutationKind::Delete,
        }
    }

    pub fn table(&self) -> &TableRef {
        match self {
            MutationRequest::Insert(r) => &r.table,
            MutationRequest::Update(r) => &r.table,
            MutationRequest::Delete(r) => &r.table,
        }
    }

    /// Validate the request and build the statements the executor runs
    pub fn plan(&self, dialect: &Dialect) -> Result<MutationPlan> {
        match self {
            MutationRequest::Insert(r) => Ok(MutationPlan {
                count: None,
                mutation: build_insert(dialect, r)?,
            }),
            MutationRequest::Update(r) => Ok(MutationPlan {
                mutation: build_update(dialect, r)?,
                count: Some(build_count(dialect, &r.table, &r.key_column, &r.key_value)?),
            }),
            MutationRequest::Delete(r) => Ok(MutationPlan {
                mutation: build_delete(dialect, r)?,
                count: Some(build_count(dialect, &r.table, &r.key_column, &r.key_value)?),
            }),
        }
    }
}

impl From<InsertRequest> for MutationRequest {
    fn from(value: InsertRequest) -> Self {
        MutationRequest::Insert(value)
    }
}

impl From<UpdateRequest> for MutationRequest {
    fn from(value: UpdateRequest) -> Self {
        MutationRequest::Update(value)
    }
}

impl From<DeleteRequest> for MutationRequest {
    fn from(value: DeleteRequest) -> Self {
        MutationRequest::Delete(value)
    }
}

/// Statements for one mutation. `count` is present for keyed mutations and
/// must return exactly 1 before `mutation` may run.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationPlan {
    pub count: Option<SqlStatement>,
    pub mutation: SqlStatement,
}

fn validate_columns(columns: &[String], values: &[Value], what: &str) -> Result<()> {
    if columns.is_empty() {
        return Err(WeebaseError::Validation(format!("at least one {} column is required", what)));
    }
    if columns.len() != values.len() {
        return Err(WeebaseError::Validation(format!(
            "number of {} columns ({}) must equal number of values ({})",
            what,
            columns.len(),
            values.len()
        )));
    }
    for column in columns {
        validate_identifier("column", column)?;
    }
    Ok(())
}

fn validate_key(key_column: &str, key_value: &Value) -> Result<()> {
    validate_identifier("key column", key_column)?;
    if key_value.is_null() {
        return Err(WeebaseError::Validation("key value is required".into()));
    }
    Ok(())
}

/// Build `INSERT INTO t (cols) VALUES (placeholders)`
pub fn build_insert(dialect: &Dialect, request: &InsertRequest) -> Result<SqlStatement> {
    dialect.ensure_supported()?;
    let target = request.table.quoted(dialect)?;
    validate_columns(&request.columns, &request.values, "insert")?;

    let mut placeholders = Placeholders::new(dialect);
    let columns: Vec<String> = request
        .columns
        .iter()
        .map(|c| quote_identifier(dialect, c))
        .collect();
    let marks: Vec<String> = request.columns.iter().map(|_| placeholders.next()).collect();

    Ok(SqlStatement::new(
        format!("INSERT INTO {} ({}) VALUES ({})", target, columns.join(", "), marks.join(", ")),
        request.values.clone(),
    ))
}

/// Build `UPDATE t SET c = ?, ... WHERE key = ?`
pub fn build_update(dialect: &Dialect, request: &UpdateRequest) -> Result<SqlStatement> {
    dialect.ensure_supported()?;
    let target = request.table.quoted(dialect)?;
    validate_key(&request.key_column, &request.key_value)?;
    validate_columns(&request.set_columns, &request.set_values, "set")?;

    let mut placeholders = Placeholders::new(dialect);
    let assignments: Vec<String> = request
        .set_columns
        .iter()
        .map(|c| format!("{} = {}", quote_identifier(dialect, c), placeholders.next()))
        .collect();
    let predicate = format!(
        "{} = {}",
        quote_identifier(dialect, &request.key_column),
        placeholders.next()
    );

    let mut params = request.set_values.clone();
    params.push(request.key_value.clone());
    Ok(SqlStatement::new(
        format!("UPDATE {} SET {} WHERE {}", target, assignments.join(", "), predicate),
        params,
    ))
}

/// Build a DELETE of one keyed row, with a single-row hint where the dialect
/// has one
pub fn build_delete(dialect: &Dialect, request: &DeleteRequest) -> Result<SqlStatement> {
    dialect.ensure_supported()?;
    let target = request.table.quoted(dialect)?;
    validate_key(&request.key_column, &request.key_value)?;

    let predicate = format!(
        "{} = {}",
        quote_identifier(dialect, &request.key_column),
        dialect.placeholder(1)
    );
    let sql = match dialect {
        Dialect::MySql => format!("DELETE FROM {} WHERE {} LIMIT 1", target, predicate),
        Dialect::SqlServer => format!("DELETE TOP (1) FROM {} WHERE {}", target, predicate),
        _ => format!("DELETE FROM {} WHERE {}", target, predicate),
    };
    Ok(SqlStatement::new(sql, vec![request.key_value.clone()]))
}

/// Build `SELECT COUNT(*) FROM t WHERE key = ?`
pub fn build_count(
    dialect: &Dialect,
    table: &TableRef,
    key_column: &str,
    key_value: &Value,
) -> Result<SqlStatement> {
    dialect.ensure_supported()?;
    let target = table.quoted(dialect)?;
    validate_key(key_column, key_value)?;

    Ok(SqlStatement::new(
        format!(
            "SELECT COUNT(*) FROM {} WHERE {} = {}",
            target,
            quote_identifier(dialect, key_column),
            dialect.placeholder(1)
        ),
        vec![key_value.clone()],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn update(dialect_table: TableRef) -> UpdateRequest {
        UpdateRequest {
            table: dialect_table,
            key_column: "id".into(),
            key_value: Value::from("7"),
            set_columns: vec!["name".into(), "email".into()],
            set_values: vec![Value::from("Ann"), Value::from("ann@example.com")],
        }
    }

    #[test]
    fn test_insert_uses_native_placeholders() {
        let request = InsertRequest {
            table: TableRef::new(Some("public"), "users"),
            columns: vec!["name".into(), "email".into()],
            values: vec![Value::from("Ann"), Value::Null],
        };

        let pg = build_insert(&Dialect::Postgres, &request).unwrap();
        assert_eq!(pg.sql, r#"INSERT INTO "public"."users" ("name", "email") VALUES ($1, $2)"#);
        assert_eq!(pg.params, request.values);

        let mssql = build_insert(&Dialect::SqlServer, &request).unwrap();
        assert_eq!(mssql.sql, "INSERT INTO [public].[users] ([name], [email]) VALUES (@P1, @P2)");

        let mysql = build_insert(&Dialect::MySql, &request).unwrap();
        assert_eq!(mysql.sql, "INSERT INTO `public`.`users` (`name`, `email`) VALUES (?, ?)");
    }

    #[test]
    fn test_update_binds_key_last() {
        let stmt = build_update(&Dialect::Postgres, &update(TableRef::new(None, "users"))).unwrap();
        assert_eq!(stmt.sql, r#"UPDATE "users" SET "name" = $1, "email" = $2 WHERE "id" = $3"#);
        assert_eq!(stmt.params.last(), Some(&Value::from("7")));
        assert_eq!(stmt.params.len(), 3);
    }

    #[test]
    fn test_delete_single_row_hints() {
        let request = DeleteRequest {
            table: TableRef::new(None, "users"),
            key_column: "id".into(),
            key_value: Value::Int64(1),
        };
        assert_eq!(
            build_delete(&Dialect::MySql, &request).unwrap().sql,
            "DELETE FROM `users` WHERE `id` = ? LIMIT 1"
        );
        assert_eq!(
            build_delete(&Dialect::SqlServer, &request).unwrap().sql,
            "DELETE TOP (1) FROM [users] WHERE [id] = @P1"
        );
        assert_eq!(
            build_delete(&Dialect::Sqlite, &request).unwrap().sql,
            r#"DELETE FROM "users" WHERE "id" = ?"#
        );
    }

    #[test]
    fn test_plan_pairs_count_with_same_predicate() {
        let request = MutationRequest::from(update(TableRef::new(None, "users")));
        let plan = request.plan(&Dialect::Sqlite).unwrap();
        let count = plan.count.unwrap();
        assert_eq!(count.sql, r#"SELECT COUNT(*) FROM "users" WHERE "id" = ?"#);
        assert_eq!(count.params, vec![Value::from("7")]);
        assert!(plan.mutation.sql.ends_with(r#"WHERE "id" = ?"#));
    }

    #[test]
    fn test_insert_plan_has_no_count() {
        let request = MutationRequest::Insert(InsertRequest {
            table: TableRef::new(None, "t"),
            columns: vec!["a".into()],
            values: vec![Value::Int64(1)],
        });
        assert!(request.plan(&Dialect::MySql).unwrap().count.is_none());
    }

    #[test]
    fn test_mismatched_arrays_are_rejected() {
        let mut request = update(TableRef::new(None, "users"));
        request.set_values.pop();
        let err = build_update(&Dialect::Postgres, &request).unwrap_err();
        assert!(matches!(err, WeebaseError::Validation(_)));
    }

    #[test]
    fn test_invalid_identifiers_produce_no_sql() {
        let mut request = update(TableRef::new(None, "users"));
        request.set_columns[1] = "email = 'x' --".into();
        assert!(matches!(
            MutationRequest::Update(request).plan(&Dialect::Postgres),
            Err(WeebaseError::Validation(_))
        ));

        let delete = DeleteRequest {
            table: TableRef::new(Some("bad schema"), "users"),
            key_column: "id".into(),
            key_value: Value::Int64(1),
        };
        assert!(build_delete(&Dialect::Postgres, &delete).is_err());
    }

    #[test]
    fn test_null_key_is_rejected() {
        let request = DeleteRequest {
            table: TableRef::new(None, "users"),
            key_column: "id".into(),
            key_value: Value::Null,
        };
        assert!(matches!(
            build_delete(&Dialect::Sqlite, &request),
            Err(WeebaseError::Validation(_))
        ));
    }
}
