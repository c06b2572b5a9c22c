//! Integration tests for SqlService

mod common;

use pretty_assertions::assert_eq;
use weebase_core::SafetyPolicy;
use weebase_services::{ServiceError, SqlOutcome, SqlService};

use common::{MockConnection, seeded_sqlite, user_names};

const READ_ONLY: SafetyPolicy = SafetyPolicy {
    safe_mode_default: true,
    read_only_mode: true,
};

const PERMISSIVE: SafetyPolicy = SafetyPolicy {
    safe_mode_default: false,
    read_only_mode: false,
};

#[tokio::test]
async fn read_only_console_refuses_writes_before_running_anything() {
    let conn = MockConnection::new("postgres");
    let service = SqlService::default();

    for sql in [
        "DELETE FROM t",
        "SELECT 1; UPDATE t SET a = 1",
        "/* cleanup */ TRUNCATE t",
    ] {
        let result = service.execute_sql(&conn, sql, false, &READ_ONLY).await;
        assert!(matches!(result, Err(ServiceError::SafetyViolation(_))), "{}: {:?}", sql, result);
    }
    assert_eq!(conn.calls(), 0);

    let outcome = service
        .execute_sql(&conn, "SELECT 1", false, &READ_ONLY)
        .await
        .expect("select is allowed in read-only mode");
    assert!(matches!(outcome, SqlOutcome::Rows(_)));
    assert_eq!(conn.log(), vec!["SELECT 1".to_string()]);
}

#[tokio::test]
async fn read_only_console_reads_literals_the_way_the_server_does() {
    let service = SqlService::default();

    let mysql = MockConnection::new("mysql");
    let result = service
        .execute_sql(&mysql, r"SELECT 'a\''; DELETE FROM t; -- '", false, &READ_ONLY)
        .await;
    assert!(matches!(result, Err(ServiceError::SafetyViolation(_))), "{:?}", result);
    assert_eq!(mysql.calls(), 0);

    let mssql = MockConnection::new("sqlserver");
    let result = service
        .execute_sql(&mssql, "SELECT 1 DELETE FROM t", false, &READ_ONLY)
        .await;
    assert!(matches!(result, Err(ServiceError::SafetyViolation(_))), "{:?}", result);
    assert_eq!(mssql.calls(), 0);
}

#[tokio::test]
async fn safe_mode_blocks_destructive_statements() {
    let conn = MockConnection::new("mysql");
    let service = SqlService::default();
    let policy = SafetyPolicy::default();

    let err = service
        .execute_sql(&conn, "drop table users", false, &policy)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "safety_violation");
    assert!(err.to_string().contains("DROP"), "{}", err);
    assert_eq!(conn.calls(), 0);
}

#[tokio::test]
async fn empty_batch_is_invalid() {
    let conn = MockConnection::new("sqlite");
    let result = SqlService::default()
        .execute_sql(&conn, "  -- nothing\n", false, &PERMISSIVE)
        .await;
    assert!(matches!(result, Err(ServiceError::InvalidRequest(_))), "{:?}", result);
}

#[tokio::test]
async fn query_results_are_capped() {
    let conn = seeded_sqlite().await;
    let service = SqlService::new(2);

    let outcome = service
        .execute_sql(conn.as_ref(), "SELECT * FROM users ORDER BY id", false, &PERMISSIVE)
        .await
        .unwrap();

    let SqlOutcome::Rows(result) = outcome else {
        panic!("expected rows, got {:?}", outcome);
    };
    assert_eq!(result.row_count(), 2);
    assert!(result.truncated);
    assert_eq!(result.column_names(), vec!["id", "name", "team"]);
}

#[tokio::test]
async fn exec_batches_report_affected_rows() {
    let conn = seeded_sqlite().await;
    let service = SqlService::default();

    let outcome = service
        .execute_sql(conn.as_ref(), "UPDATE users SET team = 'core'", false, &PERMISSIVE)
        .await
        .unwrap();

    assert!(matches!(outcome, SqlOutcome::Affected(3)), "{:?}", outcome);
}

#[tokio::test]
async fn failed_transactional_batch_is_rolled_back() {
    let conn = seeded_sqlite().await;
    let service = SqlService::default();

    // the second insert collides with an existing primary key
    let result = service
        .execute_sql(
            conn.as_ref(),
            "INSERT INTO users (id, name) VALUES (10, 'dave'); \
             INSERT INTO users (id, name) VALUES (1, 'dup')",
            true,
            &PERMISSIVE,
        )
        .await;

    assert!(matches!(result, Err(ServiceError::OperationFailed { .. })), "{:?}", result);
    assert_eq!(user_names(conn.as_ref()).await, vec!["alice", "bob", "carol"]);
}

#[tokio::test]
async fn transactional_batch_commits() {
    let conn = seeded_sqlite().await;
    let service = SqlService::default();

    service
        .execute_sql(
            conn.as_ref(),
            "INSERT INTO users (id, name) VALUES (10, 'dave')",
            true,
            &PERMISSIVE,
        )
        .await
        .unwrap();

    assert_eq!(user_names(conn.as_ref()).await, vec!["alice", "bob", "carol", "dave"]);
}

#[tokio::test]
async fn explain_returns_plan_rows() {
    let conn = seeded_sqlite().await;
    let service = SqlService::default();

    let plan = service
        .explain_sql(conn.as_ref(), "SELECT * FROM users WHERE id = 1")
        .await
        .unwrap();
    assert!(plan.has_rows());

    let result = service.explain_sql(conn.as_ref(), "SELECT 1; SELECT 2").await;
    assert!(matches!(result, Err(ServiceError::InvalidRequest(_))), "{:?}", result);
}
