//! Safety-gated statement execution
//!
//! Row mutations follow one path:
//!
//! ```text
//! policy check -> plan -> BEGIN -> COUNT(*) == 1 -> mutation -> COMMIT
//!                                  otherwise ROLLBACK + SafetyViolation
//! ```
//!
//! Nothing touches the connection until the policy check and statement
//! planning have both passed.

use crate::safety::{SafetyPolicy, StatementKind};
use crate::statement::{MutationKind, MutationRequest, SqlStatement, build_explain};
use crate::{Connection, QueryResult, Result, Transaction, WeebaseError, statement_keywords};

/// What a committed mutation did
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    pub kind: MutationKind,
    pub affected_rows: u64,
    /// The mutation statement that was committed
    pub sql: String,
}

/// Result of a console batch
#[derive(Debug, Clone)]
pub enum SqlOutcome {
    Rows(QueryResult),
    /// Affected row count, -1 when the driver cannot report it
    Affected(i64),
}

/// Run a single-row mutation under `policy`
#[tracing::instrument(
    skip(conn, request, policy),
    fields(kind = request.kind().as_str(), table = %request.table().table)
)]
pub async fn execute_mutation(
    conn: &dyn Connection,
    request: &MutationRequest,
    policy: &SafetyPolicy,
    confirmed: bool,
) -> Result<MutationOutcome> {
    let kind = request.kind();
    policy.check_mutation(kind, confirmed)?;
    let plan = request.plan(&conn.dialect())?;
    let operation = kind.operation();

    let tx = conn
        .begin_transaction()
        .await
        .map_err(|e| WeebaseError::execution("begin transaction", e))?;

    if let Some(count) = &plan.count {
        let matched = match count_matches(tx.as_ref(), count).await {
            Ok(matched) => matched,
            Err(e) => {
                rollback_quietly(tx).await;
                return Err(WeebaseError::execution(format!("{} safety check", operation), e));
            }
        };
        if matched != 1 {
            tracing::warn!(matched, "refusing mutation, match count is not exactly one");
            rollback_quietly(tx).await;
            return Err(WeebaseError::SafetyViolation(format!(
                "refusing to {}: match count ({}) != 1",
                operation, matched
            )));
        }
    }

    let result = match tx.execute(&plan.mutation.sql, &plan.mutation.params).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "mutation failed, rolling back");
            rollback_quietly(tx).await;
            return Err(WeebaseError::execution(operation, e));
        }
    };

    tx.commit()
        .await
        .map_err(|e| WeebaseError::execution(format!("{} commit", operation), e))?;

    tracing::info!(affected_rows = result.affected_rows, "mutation committed");
    Ok(MutationOutcome {
        kind,
        affected_rows: result.affected_rows,
        sql: plan.mutation.sql,
    })
}

async fn count_matches(tx: &dyn Transaction, count: &SqlStatement) -> Result<i64> {
    let result = tx.query(&count.sql, &count.params).await?;
    result
        .scalar()
        .and_then(|v| v.as_i64())
        .ok_or_else(|| WeebaseError::execution("count rows", "COUNT(*) returned no integer"))
}

async fn rollback_quietly(tx: Box<dyn Transaction>) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(error = %e, "rollback failed");
    }
}

/// Run a free-form batch from the SQL console.
///
/// Query-like batches return at most `max_rows` rows. Other batches return
/// the affected count. With `transactional` the batch runs inside a
/// transaction that is rolled back on failure.
#[tracing::instrument(
    skip(conn, sql, policy),
    fields(sql_preview = %sql.chars().take(100).collect::<String>())
)]
pub async fn execute_sql(
    conn: &dyn Connection,
    sql: &str,
    transactional: bool,
    policy: &SafetyPolicy,
    max_rows: usize,
) -> Result<SqlOutcome> {
    let kind = policy.check_sql(&conn.dialect(), sql)?;
    let sql = sql.trim();

    if !transactional {
        return match kind {
            StatementKind::Query => {
                let result = conn
                    .query_capped(sql, &[], max_rows)
                    .await
                    .map_err(|e| WeebaseError::execution("query", e))?;
                tracing::info!(
                    rows = result.row_count(),
                    truncated = result.truncated,
                    "query executed"
                );
                Ok(SqlOutcome::Rows(result))
            }
            StatementKind::Exec => {
                let result = conn
                    .execute(sql, &[])
                    .await
                    .map_err(|e| WeebaseError::execution("execute", e))?;
                tracing::info!(affected_rows = result.affected_rows, "statement executed");
                Ok(SqlOutcome::Affected(affected_count(result.affected_rows)))
            }
        };
    }

    let tx = conn
        .begin_transaction()
        .await
        .map_err(|e| WeebaseError::execution("begin transaction", e))?;

    let outcome = match kind {
        StatementKind::Query => tx
            .query_capped(sql, &[], max_rows)
            .await
            .map(SqlOutcome::Rows)
            .map_err(|e| WeebaseError::execution("query", e)),
        StatementKind::Exec => tx
            .execute(sql, &[])
            .await
            .map(|result| SqlOutcome::Affected(affected_count(result.affected_rows)))
            .map_err(|e| WeebaseError::execution("execute", e)),
    };

    match outcome {
        Ok(outcome) => {
            tx.commit()
                .await
                .map_err(|e| WeebaseError::execution("commit transaction", e))?;
            tracing::info!("transaction committed");
            Ok(outcome)
        }
        Err(e) => {
            rollback_quietly(tx).await;
            Err(e)
        }
    }
}

fn affected_count(affected: u64) -> i64 {
    i64::try_from(affected).unwrap_or(-1)
}

/// Show the execution plan for a single statement
#[tracing::instrument(
    skip(conn, sql),
    fields(sql_preview = %sql.chars().take(100).collect::<String>())
)]
pub async fn explain(conn: &dyn Connection, sql: &str, max_rows: usize) -> Result<QueryResult> {
    let dialect = conn.dialect();
    if statement_keywords(&dialect, sql).len() > 1 {
        return Err(WeebaseError::Validation(
            "explain accepts a single statement".into(),
        ));
    }
    let statement = build_explain(&dialect, sql)?;

    for prelude in &statement.prelude {
        conn.execute(prelude, &[])
            .await
            .map_err(|e| WeebaseError::execution("explain", e))?;
    }

    let result = conn.query_capped(&statement.query, &[], max_rows).await;

    // the epilogue must run even when the plan query failed
    for epilogue in &statement.epilogue {
        if let Err(e) = conn.execute(epilogue, &[]).await {
            tracing::warn!(error = %e, "failed to restore session after explain");
        }
    }

    result.map_err(|e| WeebaseError::execution("explain", e))
}
