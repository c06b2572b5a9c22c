//! MS SQL Server driver for Weebase
//!
//! Built on tiberius over a plain tokio TCP stream. Parameters use the
//! `@P1, @P2, ...` placeholder style.

mod connection;
mod driver;
mod dsn;

#[cfg(test)]
mod connection_tests;

pub use connection::{MssqlConnection, MssqlTransaction};
pub use driver::MssqlDriver;
pub use dsn::MssqlDsn;
