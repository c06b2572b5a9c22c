//! Weebase Drivers - Database driver implementations
//!
//! This crate re-exports the dialect adapters enabled through cargo features
//! and provides the `DriverRegistry` used to look them up by name.

#[cfg(feature = "mssql")]
pub use weebase_driver_mssql as mssql;
#[cfg(feature = "mysql")]
pub use weebase_driver_mysql as mysql;
#[cfg(feature = "postgres")]
pub use weebase_driver_postgres as postgres;
#[cfg(feature = "sqlite")]
pub use weebase_driver_sqlite as sqlite;

mod registry;

pub use registry::DriverRegistry;

/// Re-export commonly used types from weebase-core
pub use weebase_core::{
    ColumnMeta, Connection, ConnectionConfig, DatabaseDriver, Dialect, QueryResult, Result, Row,
    StatementResult, Transaction, Value, WeebaseError,
};
