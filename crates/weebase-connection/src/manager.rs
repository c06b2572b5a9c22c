//! Connection manager for handling active connections
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected
//!                 Connecting -> Failed    -> Disconnected
//! ```
//!
//! A failed connect never touches the session: the new handle is closed and
//! whatever was bound before stays bound.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use weebase_core::statement::{DsnFields, build_dsn};
use weebase_core::{ConnectionConfig, Dialect, Result, WeebaseError};
use weebase_drivers::DriverRegistry;

use crate::{ActiveConnection, ProfileStore, SessionStore};

/// A connect form: a saved profile, discrete fields or a raw DSN
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectRequest {
    pub profile_id: Option<Uuid>,
    pub driver: String,
    pub fields: DsnFields,
    pub dsn: String,
}

impl ConnectRequest {
    pub fn profile(id: Uuid) -> Self {
        Self {
            profile_id: Some(id),
            ..Self::default()
        }
    }

    pub fn dsn(driver: impl Into<String>, dsn: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            dsn: dsn.into(),
            ..Self::default()
        }
    }

    pub fn fields(driver: impl Into<String>, fields: DsnFields) -> Self {
        Self {
            driver: driver.into(),
            fields,
            ..Self::default()
        }
    }
}

/// Where a connect request points once profiles and fields are applied
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub driver: String,
    pub dialect: Dialect,
    pub dsn: String,
    pub database: Option<String>,
    pub from_profile: bool,
}

/// Manages the active connection of every session
pub struct ConnectionManager {
    drivers: DriverRegistry,
    sessions: Arc<dyn SessionStore>,
    profiles: Arc<dyn ProfileStore>,
    allow_adhoc: bool,
}

impl ConnectionManager {
    pub fn new(
        drivers: DriverRegistry,
        sessions: Arc<dyn SessionStore>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Self {
        Self {
            drivers,
            sessions,
            profiles,
            allow_adhoc: true,
        }
    }

    /// Allow or refuse connections that do not come from a saved profile
    pub fn with_adhoc_connections(mut self, allow: bool) -> Self {
        self.allow_adhoc = allow;
        self
    }

    /// Get the driver registry
    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }

    pub fn profiles(&self) -> &Arc<dyn ProfileStore> {
        &self.profiles
    }

    /// Turn a connect request into a driver and DSN. A profile wins over
    /// discrete fields, which win over a raw DSN.
    pub async fn resolve(&self, request: &ConnectRequest) -> Result<ResolvedTarget> {
        if let Some(id) = request.profile_id {
            let profile = self
                .profiles
                .get(id)
                .await?
                .ok_or_else(|| WeebaseError::NotFound(format!("profile {} not found", id)))?;
            return Ok(ResolvedTarget {
                dialect: profile.dialect(),
                driver: profile.driver,
                dsn: profile.dsn,
                database: Some(profile.name),
                from_profile: true,
            });
        }

        let driver = request.driver.trim();
        if driver.is_empty() {
            return Err(WeebaseError::Validation("driver is required".into()));
        }
        let dialect = Dialect::normalize(driver);

        let (dsn, database) = if !request.fields.is_empty() {
            let database = Some(request.fields.database.trim().to_string())
                .filter(|d| !d.is_empty());
            (build_dsn(&dialect, &request.fields)?, database)
        } else if !request.dsn.trim().is_empty() {
            (request.dsn.trim().to_string(), None)
        } else {
            return Err(WeebaseError::Validation(
                "a profile, connection fields or a dsn is required".into(),
            ));
        };

        Ok(ResolvedTarget {
            driver: driver.to_string(),
            dialect,
            dsn,
            database,
            from_profile: false,
        })
    }

    /// Open, ping and bind a connection to `session_id`, closing whatever
    /// connection the session held before
    #[tracing::instrument(skip(self, request), fields(session_id = %session_id))]
    pub async fn connect(
        &self,
        session_id: &str,
        request: &ConnectRequest,
    ) -> Result<ActiveConnection> {
        let target = self.resolve(request).await?;
        if !target.from_profile && !self.allow_adhoc {
            return Err(WeebaseError::Configuration(
                "ad-hoc connections are disabled, connect with a saved profile".into(),
            ));
        }

        let driver = self.drivers.get(&target.driver).ok_or_else(|| {
            WeebaseError::Configuration(format!("unsupported driver: {}", target.driver))
        })?;

        tracing::info!(driver = %target.driver, "connecting");
        let config = ConnectionConfig::new(target.dialect.clone(), target.dsn);
        let conn = driver.connect(&config).await.map_err(|e| {
            tracing::error!(error = %e, "failed to connect");
            e
        })?;

        if let Err(e) = conn.ping().await {
            tracing::error!(error = %e, "ping failed, closing new connection");
            if let Err(close_err) = conn.close().await {
                tracing::warn!(error = %close_err, "failed to close connection after ping failure");
            }
            return Err(WeebaseError::Connection(format!("ping failed: {}", e)));
        }

        let active = ActiveConnection::new(target.driver, conn, target.database);
        if let Some(previous) = self.sessions.insert(session_id, active.clone()) {
            tracing::debug!(previous_id = %previous.id, "replacing previous connection");
            close_quietly(&previous).await;
        }

        tracing::info!(connection_id = %active.id, "connection established");
        Ok(active)
    }

    /// Drop the session's connection. Disconnecting twice is not an error.
    #[tracing::instrument(skip(self), fields(session_id = %session_id))]
    pub async fn disconnect(&self, session_id: &str) -> Result<()> {
        match self.sessions.remove(session_id) {
            Some(active) => {
                tracing::info!(connection_id = %active.id, "disconnecting connection");
                active.connection.close().await
            }
            None => {
                tracing::debug!("session has no active connection");
                Ok(())
            }
        }
    }

    /// The session's connection, refreshing its last use
    pub fn active(&self, session_id: &str) -> Result<ActiveConnection> {
        self.sessions
            .touch(session_id)
            .ok_or_else(|| WeebaseError::Connection("not connected".into()))
    }

    pub fn is_connected(&self, session_id: &str) -> bool {
        self.sessions.get(session_id).is_some()
    }

    /// Close every connection idle for longer than `max_idle`
    pub async fn expire_idle(&self, max_idle: chrono::Duration) -> usize {
        let expired = self.sessions.remove_idle(chrono::Utc::now() - max_idle);
        for active in &expired {
            close_quietly(active).await;
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired idle connections");
        }
        expired.len()
    }
}

async fn close_quietly(active: &ActiveConnection) {
    if let Err(e) = active.connection.close().await {
        tracing::warn!(connection_id = %active.id, error = %e, "failed to close connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DashMapSessionStore, InMemoryProfileStore, NewProfile};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use weebase_core::{
        Connection, DatabaseDriver, QueryResult, StatementResult, Transaction, Value,
    };

    fn manager() -> ConnectionManager {
        ConnectionManager::new(
            DriverRegistry::with_enabled(&["sqlite"]),
            Arc::new(DashMapSessionStore::new()),
            Arc::new(InMemoryProfileStore::new()),
        )
    }

    #[tokio::test]
    async fn test_resolve_precedence() {
        let manager = manager();
        let profile = manager
            .profiles()
            .save(NewProfile::new("saved", "sqlite", "saved.db"))
            .await
            .unwrap();

        let request = ConnectRequest {
            profile_id: Some(profile.id),
            driver: "postgres".into(),
            fields: DsnFields {
                database: "fields.db".into(),
                ..DsnFields::default()
            },
            dsn: "raw.db".into(),
        };
        let target = manager.resolve(&request).await.unwrap();
        assert_eq!(target.dsn, "saved.db");
        assert_eq!(target.dialect, Dialect::Sqlite);
        assert!(target.from_profile);

        let request = ConnectRequest {
            profile_id: None,
            driver: "sqlite3".into(),
            ..request
        };
        let target = manager.resolve(&request).await.unwrap();
        assert_eq!(target.dsn, "fields.db");
        assert_eq!(target.database.as_deref(), Some("fields.db"));

        let target = manager.resolve(&ConnectRequest::dsn("sqlite", "raw.db")).await.unwrap();
        assert_eq!(target.dsn, "raw.db");
        assert!(!target.from_profile);
    }

    #[tokio::test]
    async fn test_resolve_rejects_empty_request() {
        let manager = manager();
        let err = manager.resolve(&ConnectRequest::dsn("sqlite", "  ")).await.unwrap_err();
        assert!(matches!(err, WeebaseError::Validation(_)));

        let err = manager.resolve(&ConnectRequest::default()).await.unwrap_err();
        assert!(matches!(err, WeebaseError::Validation(_)));

        let err = manager.resolve(&ConnectRequest::profile(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, WeebaseError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let manager = manager();
        let active = manager
            .connect("s1", &ConnectRequest::dsn("sqlite3", ":memory:"))
            .await
            .unwrap();
        assert_eq!(active.dialect, Dialect::Sqlite);
        assert!(manager.is_connected("s1"));

        let current = manager.active("s1").unwrap();
        assert_eq!(current.id, active.id);
        assert!(current.last_used_at >= active.last_used_at);

        manager.disconnect("s1").await.unwrap();
        assert!(active.connection.is_closed());
        assert!(!manager.is_connected("s1"));
        manager.disconnect("s1").await.unwrap();

        let err = manager.active("s1").unwrap_err();
        assert!(matches!(err, WeebaseError::Connection(_)));
    }

    #[tokio::test]
    async fn test_reconnect_closes_previous_handle() {
        let manager = manager();
        let first = manager
            .connect("s1", &ConnectRequest::dsn("sqlite", ":memory:"))
            .await
            .unwrap();
        let second = manager
            .connect("s1", &ConnectRequest::dsn("sqlite", ":memory:"))
            .await
            .unwrap();

        assert!(first.connection.is_closed());
        assert!(!second.connection.is_closed());
        assert_eq!(manager.active("s1").unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_connect_requires_enabled_driver() {
        let manager = manager();
        let err = manager
            .connect("s1", &ConnectRequest::dsn("postgres", "host=localhost"))
            .await
            .unwrap_err();
        assert!(matches!(err, WeebaseError::Configuration(_)));
        assert!(!manager.is_connected("s1"));
    }

    #[tokio::test]
    async fn test_adhoc_connections_can_be_disabled() {
        let manager = manager().with_adhoc_connections(false);
        let err = manager
            .connect("s1", &ConnectRequest::dsn("sqlite", ":memory:"))
            .await
            .unwrap_err();
        assert!(matches!(err, WeebaseError::Configuration(_)));

        let profile = manager
            .profiles()
            .save(NewProfile::new("mem", "sqlite", ":memory:"))
            .await
            .unwrap();
        let active = manager.connect("s1", &ConnectRequest::profile(profile.id)).await.unwrap();
        assert_eq!(active.database.as_deref(), Some("mem"));
    }

    #[tokio::test]
    async fn test_expire_idle_closes_connections() {
        let manager = manager();
        let active = manager
            .connect("s1", &ConnectRequest::dsn("sqlite", ":memory:"))
            .await
            .unwrap();

        assert_eq!(manager.expire_idle(chrono::Duration::hours(1)).await, 0);
        assert!(manager.is_connected("s1"));

        assert_eq!(manager.expire_idle(chrono::Duration::seconds(-1)).await, 1);
        assert!(!manager.is_connected("s1"));
        assert!(active.connection.is_closed());
    }

    /// Opens connections whose ping always fails
    struct UnreachableDriver {
        closed: Arc<AtomicUsize>,
    }

    struct UnreachableConnection {
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connection for UnreachableConnection {
        fn driver_name(&self) -> &str {
            "postgres"
        }

        async fn execute(
            &self,
            _sql: &str,
            _params: &[Value],
        ) -> weebase_core::Result<StatementResult> {
            Err(WeebaseError::Connection("server went away".into()))
        }

        async fn query(&self, _sql: &str, _params: &[Value]) -> weebase_core::Result<QueryResult> {
            Err(WeebaseError::Connection("server went away".into()))
        }

        async fn begin_transaction(&self) -> weebase_core::Result<Box<dyn Transaction>> {
            Err(WeebaseError::Connection("server went away".into()))
        }

        async fn close(&self) -> weebase_core::Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst) > 0
        }
    }

    #[async_trait]
    impl DatabaseDriver for UnreachableDriver {
        fn name(&self) -> &'static str {
            "postgres"
        }

        fn dialect(&self) -> Dialect {
            Dialect::Postgres
        }

        async fn connect(
            &self,
            _config: &ConnectionConfig,
        ) -> weebase_core::Result<Arc<dyn Connection>> {
            Ok(Arc::new(UnreachableConnection {
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    #[tokio::test]
    async fn test_failed_ping_closes_handle_and_keeps_session() {
        let closed = Arc::new(AtomicUsize::new(0));
        let mut drivers = DriverRegistry::with_enabled(&["sqlite"]);
        drivers.register(Arc::new(UnreachableDriver {
            closed: Arc::clone(&closed),
        }));
        let manager = ConnectionManager::new(
            drivers,
            Arc::new(DashMapSessionStore::new()),
            Arc::new(InMemoryProfileStore::new()),
        );

        let existing = manager
            .connect("s1", &ConnectRequest::dsn("sqlite", ":memory:"))
            .await
            .unwrap();

        let err = manager
            .connect("s1", &ConnectRequest::dsn("pg", "host=db"))
            .await
            .unwrap_err();
        assert!(matches!(err, WeebaseError::Connection(_)));
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        let current = manager.active("s1").unwrap();
        assert_eq!(current.id, existing.id);
        assert!(!existing.connection.is_closed());
    }
}
