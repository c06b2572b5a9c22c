//! Integration tests for ConnectionService wired through `Services`

use pretty_assertions::assert_eq;
use std::sync::Arc;
use weebase_connection::{ConnectRequest, DashMapSessionStore, InMemoryProfileStore, NewProfile};
use weebase_core::{Connection, Value};
use weebase_services::{ServiceError, Services};
use weebase_settings::WeebaseSettings;

fn services(settings: WeebaseSettings) -> Services {
    Services::from_settings(
        &settings,
        Arc::new(DashMapSessionStore::new()),
        Arc::new(InMemoryProfileStore::new()),
    )
}

fn sqlite_only() -> WeebaseSettings {
    WeebaseSettings {
        enabled_drivers: vec!["sqlite".to_string()],
        ..WeebaseSettings::default()
    }
}

#[tokio::test]
async fn connect_query_disconnect() {
    let services = services(sqlite_only());
    let connections = &services.connections;

    let info = connections
        .connect("session-1", &ConnectRequest::dsn("sqlite3", ":memory:"))
        .await
        .expect("should connect");
    assert_eq!(info.dialect, "sqlite");
    assert_eq!(info.database, None);

    let active = connections.active("session-1").unwrap();
    assert_eq!(active.id, info.id);
    let result = active.connection.query("SELECT 41 + 1", &[]).await.unwrap();
    assert_eq!(result.scalar(), Some(&Value::Int64(42)));

    connections.disconnect("session-1").await.unwrap();
    assert!(matches!(connections.active("session-1"), Err(ServiceError::NotConnected)));
    // disconnecting twice is harmless
    connections.disconnect("session-1").await.unwrap();
}

#[tokio::test]
async fn disabled_driver_is_rejected() {
    let services = services(sqlite_only());

    let err = services
        .connections
        .connect("s", &ConnectRequest::dsn("postgres", "host=localhost user=app"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "configuration");

    let err = services
        .connections
        .save_profile(NewProfile::new("prod", "postgres", "host=db user=app"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "configuration");
}

#[tokio::test]
async fn profiles_round_trip_and_connect() {
    let services = services(sqlite_only());
    let connections = &services.connections;

    let saved = connections
        .save_profile(NewProfile::new(" scratch ", "sqlite", ":memory:"))
        .await
        .unwrap();
    assert_eq!(saved.name, "scratch");

    let listed = connections.list_profiles().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(connections.get_profile(saved.id).await.unwrap().id, saved.id);

    let info = connections
        .connect("session-2", &ConnectRequest::profile(saved.id))
        .await
        .unwrap();
    assert_eq!(info.database.as_deref(), Some("scratch"));
    assert_eq!(connections.info("session-2").unwrap(), info);
}

#[tokio::test]
async fn unknown_profile_is_not_found() {
    let services = services(sqlite_only());
    let err = services
        .connections
        .get_profile(uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn adhoc_connections_can_be_disabled() {
    let services = services(WeebaseSettings {
        allow_adhoc_connections: false,
        ..sqlite_only()
    });

    let result = services
        .connections
        .connect("s", &ConnectRequest::dsn("sqlite", ":memory:"))
        .await;

    assert!(matches!(result, Err(ServiceError::Configuration(_))), "{:?}", result);
}

#[tokio::test]
async fn policy_follows_settings() {
    let services = services(WeebaseSettings {
        read_only_mode: true,
        ..WeebaseSettings::default()
    });

    let policy = services.policy();
    assert!(policy.read_only_mode);
    assert!(policy.safe_mode_default);
    assert_eq!(services.sql.max_rows(), 200);
}
