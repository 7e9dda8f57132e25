//! Sessions over the routing table.
//!
//! [`SessionFactory`] binds the routing table and the statement registry; a
//! [`Session`] is bound to one pool, resolved from an explicit routing role
//! at creation time. Sessions run mapped statements by name and return rows
//! as JSON maps.
//!
//! Statements classified as writes are refused on a secondary-routed session.
//! The raw `*_sql` methods are escape hatches that bypass the registry and
//! the write guard.

use crate::db::params::{
    StatementParam, bind_mysql_param, bind_postgres_param, bind_sqlite_param,
};
use crate::db::pool::DbPool;
use crate::db::routing::{PoolRole, RoutingTable};
use crate::db::statements::{StatementKind, StatementRegistry};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

/// Default per-statement timeout.
pub const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 30;

/// Result of a mapped query.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    pub execution_time_ms: u64,
}

/// Builds sessions bound to a routed pool.
#[derive(Clone)]
pub struct SessionFactory {
    router: Arc<RoutingTable>,
    statements: Arc<StatementRegistry>,
    default_timeout: Duration,
}

impl SessionFactory {
    pub fn new(router: Arc<RoutingTable>, statements: Arc<StatementRegistry>) -> Self {
        Self {
            router,
            statements,
            default_timeout: Duration::from_secs(DEFAULT_STATEMENT_TIMEOUT_SECS),
        }
    }

    /// Override the per-statement timeout applied to every session.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Open a session for the given role; `None` uses the default role.
    pub fn session(&self, role: Option<PoolRole>) -> Session {
        let effective = role.unwrap_or(self.router.default_role());
        let pool = self.router.resolve(Some(effective)).clone();
        Session {
            pool,
            role: effective,
            statements: Arc::clone(&self.statements),
            timeout: self.default_timeout,
        }
    }
}

/// A unit of work bound to one pool.
pub struct Session {
    pool: DbPool,
    role: PoolRole,
    statements: Arc<StatementRegistry>,
    timeout: Duration,
}

impl Session {
    /// The routing role this session was resolved with.
    pub fn role(&self) -> PoolRole {
        self.role
    }

    /// Run a mapped read statement and return its rows.
    pub async fn query(&self, name: &str, params: &[StatementParam]) -> DbResult<RowSet> {
        let stmt = self.statements.get(name)?;
        if stmt.kind == StatementKind::Write {
            return Err(DbError::invalid_input(format!(
                "Statement '{}' modifies data; use execute",
                stmt.name
            )));
        }
        debug!(statement = %stmt.name, role = %self.role, "Running mapped query");
        self.query_sql(&stmt.sql, params).await
    }

    /// Run a mapped statement and return the number of affected rows.
    ///
    /// Write statements are refused when the session is routed to the
    /// secondary pool.
    pub async fn execute(&self, name: &str, params: &[StatementParam]) -> DbResult<u64> {
        let stmt = self.statements.get(name)?;
        if stmt.kind == StatementKind::Write && self.role == PoolRole::Secondary {
            return Err(DbError::write_refused(&stmt.name));
        }
        debug!(statement = %stmt.name, role = %self.role, "Running mapped execute");
        self.execute_sql(&stmt.sql, params).await
    }

    /// Run raw SQL returning rows. Bypasses the registry and the write guard.
    pub async fn query_sql(&self, sql: &str, params: &[StatementParam]) -> DbResult<RowSet> {
        let start = Instant::now();
        let (columns, rows) = match &self.pool {
            DbPool::MySql(p) => mysql::fetch_rows(p, sql, params, self.timeout).await?,
            DbPool::Postgres(p) => postgres::fetch_rows(p, sql, params, self.timeout).await?,
            DbPool::SQLite(p) => sqlite::fetch_rows(p, sql, params, self.timeout).await?,
        };
        let execution_time_ms = start.elapsed().as_millis() as u64;
        debug!(
            rows = rows.len(),
            execution_time_ms, "Query finished"
        );
        Ok(RowSet {
            columns,
            rows,
            execution_time_ms,
        })
    }

    /// Run raw SQL returning affected rows. Bypasses the registry and the
    /// write guard.
    pub async fn execute_sql(&self, sql: &str, params: &[StatementParam]) -> DbResult<u64> {
        match &self.pool {
            DbPool::MySql(p) => mysql::execute_write(p, sql, params, self.timeout).await,
            DbPool::Postgres(p) => postgres::execute_write(p, sql, params, self.timeout).await,
            DbPool::SQLite(p) => sqlite::execute_write(p, sql, params, self.timeout).await,
        }
    }
}

fn timeout_error(operation: &str, timeout: Duration) -> DbError {
    DbError::timeout(operation, timeout.as_secs() as u32)
}

type JsonRows = Vec<serde_json::Map<String, JsonValue>>;

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its backend.
// The code structure is intentionally parallel to make differences obvious.

mod mysql {
    use super::*;
    use sqlx::MySqlPool;
    use sqlx::mysql::MySqlRow;

    pub async fn fetch_rows(
        pool: &MySqlPool,
        sql: &str,
        params: &[StatementParam],
        query_timeout: Duration,
    ) -> DbResult<(Vec<String>, JsonRows)> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_mysql_param(query, param);
        }
        let rows: Vec<MySqlRow> = match timeout(query_timeout, query.fetch_all(pool)).await {
            Ok(result) => result.map_err(DbError::from)?,
            Err(_) => return Err(timeout_error("query execution", query_timeout)),
        };
        let columns = rows
            .first()
            .map(|r| r.column_names())
            .unwrap_or_default();
        Ok((columns, rows.iter().map(|r| r.to_json_map()).collect()))
    }

    pub async fn execute_write(
        pool: &MySqlPool,
        sql: &str,
        params: &[StatementParam],
        query_timeout: Duration,
    ) -> DbResult<u64> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_mysql_param(query, param);
        }
        match timeout(query_timeout, query.execute(pool)).await {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(DbError::from(e)),
            Err(_) => Err(timeout_error("write execution", query_timeout)),
        }
    }
}

mod postgres {
    use super::*;
    use sqlx::PgPool;
    use sqlx::postgres::PgRow;

    pub async fn fetch_rows(
        pool: &PgPool,
        sql: &str,
        params: &[StatementParam],
        query_timeout: Duration,
    ) -> DbResult<(Vec<String>, JsonRows)> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_postgres_param(query, param);
        }
        let rows: Vec<PgRow> = match timeout(query_timeout, query.fetch_all(pool)).await {
            Ok(result) => result.map_err(DbError::from)?,
            Err(_) => return Err(timeout_error("query execution", query_timeout)),
        };
        let columns = rows
            .first()
            .map(|r| r.column_names())
            .unwrap_or_default();
        Ok((columns, rows.iter().map(|r| r.to_json_map()).collect()))
    }

    pub async fn execute_write(
        pool: &PgPool,
        sql: &str,
        params: &[StatementParam],
        query_timeout: Duration,
    ) -> DbResult<u64> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_postgres_param(query, param);
        }
        match timeout(query_timeout, query.execute(pool)).await {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(DbError::from(e)),
            Err(_) => Err(timeout_error("write execution", query_timeout)),
        }
    }
}

mod sqlite {
    use super::*;
    use sqlx::SqlitePool;
    use sqlx::sqlite::SqliteRow;

    pub async fn fetch_rows(
        pool: &SqlitePool,
        sql: &str,
        params: &[StatementParam],
        query_timeout: Duration,
    ) -> DbResult<(Vec<String>, JsonRows)> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_sqlite_param(query, param);
        }
        let rows: Vec<SqliteRow> = match timeout(query_timeout, query.fetch_all(pool)).await {
            Ok(result) => result.map_err(DbError::from)?,
            Err(_) => return Err(timeout_error("query execution", query_timeout)),
        };
        let columns = rows
            .first()
            .map(|r| r.column_names())
            .unwrap_or_default();
        Ok((columns, rows.iter().map(|r| r.to_json_map()).collect()))
    }

    pub async fn execute_write(
        pool: &SqlitePool,
        sql: &str,
        params: &[StatementParam],
        query_timeout: Duration,
    ) -> DbResult<u64> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_sqlite_param(query, param);
        }
        match timeout(query_timeout, query.execute(pool)).await {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(DbError::from(e)),
            Err(_) => Err(timeout_error("write execution", query_timeout)),
        }
    }
}
