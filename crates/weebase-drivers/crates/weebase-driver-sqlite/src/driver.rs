//! SQLite driver implementation

use async_trait::async_trait;
use std::sync::Arc;
use weebase_core::{
    Connection, ConnectionConfig, DatabaseDriver, Dialect, Result, WeebaseError,
};

use crate::SqliteConnection;

/// SQLite database driver
pub struct SqliteDriver;

impl SqliteDriver {
    /// Create a new SQLite driver instance
    pub fn new() -> Self {
        tracing::debug!("SQLite driver initialized");
        Self
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDriver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn display_name(&self) -> &'static str {
        "SQLite"
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn connection_string_help(&self) -> &'static str {
        "Path to the database file, or :memory:"
    }

    #[tracing::instrument(skip(self, config), fields(path = %config.dsn))]
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        if config.dialect != Dialect::Sqlite {
            return Err(WeebaseError::Configuration(format!(
                "sqlite driver cannot open a {} connection",
                config.dialect
            )));
        }

        let conn = SqliteConnection::open(&config.dsn).map_err(|e| {
            tracing::error!(error = %e, "failed to connect to SQLite database");
            e
        })?;

        tracing::info!("SQLite connection created");
        Ok(Arc::new(conn))
    }
}
