//! Driver registry for managing available database drivers

use std::collections::BTreeMap;
use std::sync::Arc;
use weebase_core::{DatabaseDriver, Dialect};

/// Registry of available database drivers, keyed by canonical dialect name.
///
/// Lookups accept any alias `Dialect::normalize` understands, so `pg` finds
/// the postgres driver and `mssql` finds the SQL Server driver.
pub struct DriverRegistry {
    drivers: BTreeMap<String, Arc<dyn DatabaseDriver>>,
}

impl DriverRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            drivers: BTreeMap::new(),
        }
    }

    /// Create a registry with all built-in drivers registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        #[cfg(feature = "sqlite")]
        registry.register(Arc::new(crate::sqlite::SqliteDriver::new()));
        #[cfg(feature = "postgres")]
        registry.register(Arc::new(crate::postgres::PostgresDriver::new()));
        #[cfg(feature = "mysql")]
        registry.register(Arc::new(crate::mysql::MySqlDriver::new()));
        #[cfg(feature = "mssql")]
        registry.register(Arc::new(crate::mssql::MssqlDriver::new()));

        registry
    }

    /// Create a registry holding only the built-in drivers named in `enabled`.
    /// Names may be aliases; unknown names are logged and skipped.
    pub fn with_enabled<S: AsRef<str>>(enabled: &[S]) -> Self {
        let mut registry = Self::with_defaults();
        let keep: Vec<String> = enabled
            .iter()
            .map(|name| Dialect::normalize(name.as_ref()).as_str().to_string())
            .collect();

        for name in &keep {
            if !registry.drivers.contains_key(name) {
                tracing::warn!(driver = %name, "enabled driver is not available in this build");
            }
        }
        registry.drivers.retain(|name, _| keep.contains(name));
        registry
    }

    /// Register a new driver
    pub fn register(&mut self, driver: Arc<dyn DatabaseDriver>) {
        let name = driver.dialect().as_str().to_string();
        tracing::info!(driver = %name, "registering database driver");
        self.drivers.insert(name, driver);
    }

    /// Get a driver by name or alias
    pub fn get(&self, name: &str) -> Option<Arc<dyn DatabaseDriver>> {
        let dialect = Dialect::normalize(name);
        let driver = self.drivers.get(dialect.as_str()).cloned();
        if driver.is_none() {
            tracing::warn!(driver = %name, "driver not found in registry");
        }
        driver
    }

    /// List all registered driver names
    pub fn list(&self) -> Vec<&str> {
        self.drivers.keys().map(|s| s.as_str()).collect()
    }

    /// Check if a driver is registered under `name` or one of its aliases
    pub fn has(&self, name: &str) -> bool {
        self.drivers.contains_key(Dialect::normalize(name).as_str())
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
