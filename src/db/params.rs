//! Statement parameters and per-backend binding.

use serde_json::Value as JsonValue;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{MySql, Postgres, Sqlite};

/// A positional parameter for a mapped statement.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Json(JsonValue),
}

impl From<JsonValue> for StatementParam {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(v) => Self::Bool(v),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => Self::String(s),
            other => Self::Json(other),
        }
    }
}

impl From<&str> for StatementParam {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<i64> for StatementParam {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for StatementParam {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q StatementParam,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        StatementParam::Null => query.bind(None::<String>),
        StatementParam::Bool(v) => query.bind(*v),
        StatementParam::Int(v) => query.bind(*v),
        StatementParam::Float(v) => query.bind(*v),
        StatementParam::String(v) => query.bind(v.as_str()),
        StatementParam::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q StatementParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        StatementParam::Null => query.bind(None::<String>),
        StatementParam::Bool(v) => query.bind(*v),
        StatementParam::Int(v) => query.bind(*v),
        StatementParam::Float(v) => query.bind(*v),
        StatementParam::String(v) => query.bind(v.as_str()),
        StatementParam::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q StatementParam,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        StatementParam::Null => query.bind(None::<String>),
        StatementParam::Bool(v) => query.bind(*v),
        StatementParam::Int(v) => query.bind(*v),
        StatementParam::Float(v) => query.bind(*v),
        StatementParam::String(v) => query.bind(v.as_str()),
        // SQLite doesn't have a native JSON type, store as string
        StatementParam::Json(v) => query.bind(v.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_scalars() {
        assert_eq!(StatementParam::from(json!(null)), StatementParam::Null);
        assert_eq!(StatementParam::from(json!(true)), StatementParam::Bool(true));
        assert_eq!(StatementParam::from(json!(42)), StatementParam::Int(42));
        assert_eq!(StatementParam::from(json!(1.5)), StatementParam::Float(1.5));
        assert_eq!(
            StatementParam::from(json!("hi")),
            StatementParam::String("hi".to_string())
        );
    }

    #[test]
    fn test_from_json_compound() {
        let param = StatementParam::from(json!({"a": 1}));
        assert!(matches!(param, StatementParam::Json(_)));
        let param = StatementParam::from(json!([1, 2]));
        assert!(matches!(param, StatementParam::Json(_)));
    }
}
