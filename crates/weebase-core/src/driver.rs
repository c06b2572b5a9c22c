//! Database driver trait

use crate::{Connection, Dialect, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Opens connections for one dialect
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Canonical identifier, equal to the dialect name
    fn id(&self) -> &'static str {
        self.name()
    }

    /// Short name (e.g., "postgres", "mysql", "sqlite")
    fn name(&self) -> &'static str;

    /// Display name for UI
    fn display_name(&self) -> &'static str {
        self.name()
    }

    fn dialect(&self) -> Dialect;

    /// Default connection port (None for file-based databases like SQLite)
    fn default_port(&self) -> Option<u16> {
        None
    }

    /// Connection string format help text
    fn connection_string_help(&self) -> &'static str {
        ""
    }

    /// Create a new connection
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>>;

    /// Open a connection, ping it and close it again
    async fn test_connection(&self, config: &ConnectionConfig) -> Result<()> {
        let conn = self.connect(config).await?;
        let ping = conn.ping().await;
        conn.close().await?;
        ping
    }
}

/// What a driver needs to open a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub dialect: Dialect,
    /// Driver-specific connection string
    pub dsn: String,
}

impl ConnectionConfig {
    pub fn new(dialect: Dialect, dsn: impl Into<String>) -> Self {
        Self {
            dialect,
            dsn: dsn.into(),
        }
    }
}
