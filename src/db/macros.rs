//! Database dispatch helpers.
//!
//! `DatabaseType` identifies the backend behind a pool, and the dispatch
//! macro generates the repetitive per-backend match arms. The macro expands
//! at compile time with zero runtime overhead.

use crate::error::{DbError, DbResult};
use url::Url;

/// Database backend type for dispatch operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    MySql,
    Postgres,
    SQLite,
}

impl DatabaseType {
    /// Select the backend from a connection URL scheme.
    ///
    /// This is the only place the crate interprets the "driver" part of a
    /// connection URL; everything downstream dispatches on the result.
    pub fn from_url(url: &Url) -> DbResult<Self> {
        match url.scheme().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::MySql),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "sqlite" => Ok(Self::SQLite),
            other => Err(DbError::config(format!(
                "Unsupported connection URL scheme '{other}' (expected mysql, postgres, or sqlite)"
            ))),
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MySql => write!(f, "mysql"),
            Self::Postgres => write!(f, "postgres"),
            Self::SQLite => write!(f, "sqlite"),
        }
    }
}

/// Macro for generating database dispatch match arms.
///
/// Generates match arms for `DbPool` variants, reducing the need to manually
/// write repetitive match statements.
///
/// # Example
///
/// ```ignore
/// db_dispatch!(pool, {
///     MySql(p) => do_mysql(p),
///     Postgres(p) => do_postgres(p),
///     SQLite(p) => do_sqlite(p),
/// });
/// ```
#[macro_export]
macro_rules! db_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::pool::DbPool::$variant($p) => $body,
            )+
        }
    };
}

pub use db_dispatch;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_url_schemes() {
        let cases = [
            ("mysql://localhost/db", DatabaseType::MySql),
            ("mariadb://localhost/db", DatabaseType::MySql),
            ("postgres://localhost/db", DatabaseType::Postgres),
            ("postgresql://localhost/db", DatabaseType::Postgres),
            ("sqlite:data.db", DatabaseType::SQLite),
        ];
        for (raw, expected) in cases {
            let url = Url::parse(raw).unwrap();
            assert_eq!(DatabaseType::from_url(&url).unwrap(), expected);
        }
    }

    #[test]
    fn test_from_url_unknown_scheme() {
        let url = Url::parse("oracle://localhost/db").unwrap();
        assert!(matches!(
            DatabaseType::from_url(&url),
            Err(DbError::Config { .. })
        ));
    }

    #[test]
    fn test_database_type_display() {
        assert_eq!(DatabaseType::MySql.to_string(), "mysql");
        assert_eq!(DatabaseType::Postgres.to_string(), "postgres");
        assert_eq!(DatabaseType::SQLite.to_string(), "sqlite");
    }
}
