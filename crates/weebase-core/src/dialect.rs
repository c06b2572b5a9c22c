//! Canonical database dialects and driver-name normalization

use serde::{Deserialize, Serialize};
use sqlparser::dialect::{
    Dialect as SqlParserDialect, GenericDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect,
    SQLiteDialect,
};
use std::fmt;

use crate::{Result, WeebaseError};

/// A supported database family, resolved once from a free-form driver name.
///
/// Unrecognized names are kept as an opaque lower-cased token so that
/// quoting still has a sensible default; anything that needs a
/// dialect-specific branch fails on them with "unsupported driver".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
    SqlServer,
    Other(String),
}

impl Dialect {
    /// The four dialects with a built-in adapter
    pub const KNOWN: [Dialect; 4] = [
        Dialect::Postgres,
        Dialect::MySql,
        Dialect::Sqlite,
        Dialect::SqlServer,
    ];

    /// Resolve a driver name through the alias table. Never fails.
    pub fn normalize(driver: &str) -> Self {
        let lowered = driver.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "postgres" | "postgresql" | "pg" => Dialect::Postgres,
            "mysql" | "mariadb" => Dialect::MySql,
            "sqlite" | "sqlite3" => Dialect::Sqlite,
            "sqlserver" | "mssql" => Dialect::SqlServer,
            _ => Dialect::Other(lowered),
        }
    }

    /// Canonical name of the dialect
    pub fn as_str(&self) -> &str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite",
            Dialect::SqlServer => "sqlserver",
            Dialect::Other(name) => name,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Dialect::Other(_))
    }

    /// Fail with a configuration error for dialects without a built-in branch
    pub fn ensure_supported(&self) -> Result<()> {
        match self {
            Dialect::Other(name) => Err(WeebaseError::Configuration(format!(
                "unsupported driver: {}",
                name
            ))),
            _ => Ok(()),
        }
    }

    /// Positional parameter placeholder for the 1-based parameter `index`
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index),
            Dialect::SqlServer => format!("@P{}", index),
            _ => "?".to_string(),
        }
    }

    /// The sqlparser dialect that tokenizes this family's literals and
    /// comments the way its server does
    pub fn sqlparser_dialect(&self) -> Box<dyn SqlParserDialect> {
        match self {
            Dialect::Postgres => Box::new(PostgreSqlDialect {}),
            Dialect::MySql => Box::new(MySqlDialect {}),
            Dialect::Sqlite => Box::new(SQLiteDialect {}),
            Dialect::SqlServer => Box::new(MsSqlDialect {}),
            Dialect::Other(_) => Box::new(GenericDialect {}),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Dialect {
    fn from(value: String) -> Self {
        Dialect::normalize(&value)
    }
}

impl From<Dialect> for String {
    fn from(value: Dialect) -> Self {
        value.as_str().to_string()
    }
}

/// Hands out placeholders in order while a statement is being assembled
pub(crate) struct Placeholders<'a> {
    dialect: &'a Dialect,
    next: usize,
}

impl<'a> Placeholders<'a> {
    pub(crate) fn new(dialect: &'a Dialect) -> Self {
        Self { dialect, next: 1 }
    }

    pub(crate) fn next(&mut self) -> String {
        let placeholder = self.dialect.placeholder(self.next);
        self.next += 1;
        placeholder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_aliases() {
        assert_eq!(Dialect::normalize("pg"), Dialect::Postgres);
        assert_eq!(Dialect::normalize("PostgreSQL"), Dialect::Postgres);
        assert_eq!(Dialect::normalize("mariadb"), Dialect::MySql);
        assert_eq!(Dialect::normalize("sqlite3"), Dialect::Sqlite);
        assert_eq!(Dialect::normalize(" MSSQL "), Dialect::SqlServer);
        assert_eq!(Dialect::normalize("sqlserver"), Dialect::SqlServer);
    }

    #[test]
    fn test_unknown_driver_is_kept_lowercased() {
        let dialect = Dialect::normalize("Oracle");
        assert_eq!(dialect, Dialect::Other("oracle".into()));
        assert_eq!(dialect.as_str(), "oracle");
        assert!(!dialect.is_known());

        let err = dialect.ensure_supported().unwrap_err();
        assert!(matches!(err, WeebaseError::Configuration(_)));
        assert!(err.to_string().contains("unsupported driver"));
    }

    #[test]
    fn test_placeholders_per_dialect() {
        let mut pg = Placeholders::new(&Dialect::Postgres);
        assert_eq!(pg.next(), "$1");
        assert_eq!(pg.next(), "$2");

        let mut mssql = Placeholders::new(&Dialect::SqlServer);
        assert_eq!(mssql.next(), "@P1");

        assert_eq!(Dialect::MySql.placeholder(3), "?");
        assert_eq!(Dialect::Sqlite.placeholder(1), "?");
    }

    #[test]
    fn test_serde_uses_canonical_names() {
        let json = serde_json::to_string(&Dialect::SqlServer).unwrap();
        assert_eq!(json, "\"sqlserver\"");
        let parsed: Dialect = serde_json::from_str("\"postgresql\"").unwrap();
        assert_eq!(parsed, Dialect::Postgres);
    }
}
