//! PostgreSQL driver for Weebase
//!
//! Wraps `tokio-postgres`. Parameters are bound against the types the server
//! reports for the prepared statement, so integer widths and text-encoded
//! dates arrive in the form the column expects.

mod connection;
mod driver;

pub use connection::{PostgresConnection, PostgresTransaction};
pub use driver::PostgresDriver;
