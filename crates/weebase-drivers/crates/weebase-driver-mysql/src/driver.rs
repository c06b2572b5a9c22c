//! MySQL driver implementation

use async_trait::async_trait;
use std::sync::Arc;
use weebase_core::{
    Connection, ConnectionConfig, DatabaseDriver, Dialect, Result, WeebaseError,
};

use crate::MySqlConnection;

/// MySQL/MariaDB database driver
pub struct MySqlDriver;

impl MySqlDriver {
    /// Create a new MySQL driver instance
    pub fn new() -> Self {
        tracing::debug!("MySQL driver initialized");
        Self
    }
}

impl Default for MySqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDriver for MySqlDriver {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn display_name(&self) -> &'static str {
        "MySQL"
    }

    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn default_port(&self) -> Option<u16> {
        Some(3306)
    }

    fn connection_string_help(&self) -> &'static str {
        "user:password@tcp(host:3306)/database, or mysql://[user[:password]@]host[:port][/database]"
    }

    #[tracing::instrument(skip(self, config))]
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        if config.dialect != Dialect::MySql {
            return Err(WeebaseError::Configuration(format!(
                "mysql driver cannot open a {} connection",
                config.dialect
            )));
        }

        let conn = MySqlConnection::connect(&config.dsn).await.map_err(|e| {
            tracing::error!(error = %e, "failed to connect to MySQL database");
            e
        })?;

        tracing::info!("MySQL connection created");
        Ok(Arc::new(conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_metadata() {
        let driver = MySqlDriver::new();
        assert_eq!(driver.id(), "mysql");
        assert_eq!(driver.display_name(), "MySQL");
        assert_eq!(driver.default_port(), Some(3306));
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_dsn() {
        let config = ConnectionConfig::new(Dialect::MySql, "root@tcp(localhost:notaport)/db");
        let err = MySqlDriver::new().connect(&config).await.err().unwrap();
        assert!(matches!(err, WeebaseError::Configuration(_)));
    }
}
