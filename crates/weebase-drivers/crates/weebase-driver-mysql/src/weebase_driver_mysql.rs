//! MySQL/MariaDB driver implementation

mod connection;
mod driver;
mod dsn;

pub use connection::{MySqlConnection, MySqlTransaction};
pub use driver::MySqlDriver;
pub use dsn::MySqlDsn;
