//! EXPLAIN statements

use crate::{Dialect, Result, WeebaseError};

/// An EXPLAIN request split into the statements a driver runs in order.
///
/// Most dialects only need `query`. SQL Server switches `SHOWPLAN_XML` on in
/// the prelude and off again in the epilogue, and each must be its own batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplainStatement {
    pub prelude: Vec<String>,
    pub query: String,
    pub epilogue: Vec<String>,
}

impl ExplainStatement {
    /// The whole request as one script
    pub fn to_sql(&self) -> String {
        if self.prelude.is_empty() && self.epilogue.is_empty() {
            return self.query.clone();
        }
        self.prelude
            .iter()
            .chain(std::iter::once(&self.query))
            .chain(self.epilogue.iter())
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Wrap `sql` in the dialect's EXPLAIN form
pub fn build_explain(dialect: &Dialect, sql: &str) -> Result<ExplainStatement> {
    let sql = sql.trim().trim_end_matches(';').trim_end();
    if sql.is_empty() {
        return Err(WeebaseError::Validation("sql is required".into()));
    }

    let simple = |prefix: &str| ExplainStatement {
        prelude: Vec::new(),
        query: format!("{}{}", prefix, sql),
        epilogue: Vec::new(),
    };

    Ok(match dialect {
        Dialect::Postgres => simple("EXPLAIN (FORMAT JSON) "),
        Dialect::MySql => simple("EXPLAIN FORMAT=JSON "),
        Dialect::Sqlite => simple("EXPLAIN QUERY PLAN "),
        Dialect::SqlServer => ExplainStatement {
            prelude: vec!["SET SHOWPLAN_XML ON;".into()],
            query: sql.to_string(),
            epilogue: vec!["SET SHOWPLAN_XML OFF;".into()],
        },
        Dialect::Other(_) => simple("EXPLAIN "),
    })
}
