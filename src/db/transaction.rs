//! Transaction management over the routing table.
//!
//! [`TransactionManager`] wraps the routing table: `begin` resolves a pool
//! for an explicit role, opens a backend transaction, and registers it under
//! a generated id. The transaction then holds a dedicated connection until
//! committed, rolled back, or expired. Expired transactions are rolled back
//! by a background sweep task.

use crate::db::params::{
    StatementParam, bind_mysql_param, bind_postgres_param, bind_sqlite_param,
};
use crate::db::pool::DbPool;
use crate::db::routing::{PoolRole, RoutingTable};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use chrono::{DateTime, Utc};
use sqlx::{MySql, Postgres, Sqlite, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default transaction timeout in seconds.
pub const DEFAULT_TRANSACTION_TIMEOUT_SECS: u32 = 60;

/// Maximum transaction timeout in seconds.
pub const MAX_TRANSACTION_TIMEOUT_SECS: u32 = 300;

/// Sweep interval for expired transactions.
const SWEEP_INTERVAL_SECS: u64 = 5;

/// Database-specific transaction wrapper.
enum DbTransaction {
    MySql(Transaction<'static, MySql>),
    Postgres(Transaction<'static, Postgres>),
    SQLite(Transaction<'static, Sqlite>),
}

impl DbTransaction {
    async fn commit(self) -> DbResult<()> {
        match self {
            DbTransaction::MySql(tx) => tx.commit().await.map_err(DbError::from),
            DbTransaction::Postgres(tx) => tx.commit().await.map_err(DbError::from),
            DbTransaction::SQLite(tx) => tx.commit().await.map_err(DbError::from),
        }
    }

    async fn rollback(self) -> DbResult<()> {
        match self {
            DbTransaction::MySql(tx) => tx.rollback().await.map_err(DbError::from),
            DbTransaction::Postgres(tx) => tx.rollback().await.map_err(DbError::from),
            DbTransaction::SQLite(tx) => tx.rollback().await.map_err(DbError::from),
        }
    }
}

struct ActiveTransaction {
    transaction: Option<DbTransaction>,
    role: PoolRole,
    created_at: Instant,
    timeout_secs: u32,
}

impl ActiveTransaction {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed().as_secs() > self.timeout_secs as u64
    }
}

/// Metadata about an active transaction (for listing without consuming).
#[derive(Debug, Clone)]
pub struct TransactionMetadata {
    pub transaction_id: String,
    /// Pool the transaction was routed to.
    pub role: PoolRole,
    /// When the transaction started (absolute time).
    pub started_at: DateTime<Utc>,
    pub duration_secs: u64,
    pub timeout_secs: u32,
}

/// Stateful transaction registry bound to the routing table.
#[derive(Clone)]
pub struct TransactionManager {
    router: Arc<RoutingTable>,
    transactions: Arc<RwLock<HashMap<String, ActiveTransaction>>>,
    /// Manager start time for converting Instant to DateTime
    start_instant: Instant,
    start_datetime: DateTime<Utc>,
}

impl TransactionManager {
    pub fn new(router: Arc<RoutingTable>) -> Self {
        Self {
            router,
            transactions: Arc::new(RwLock::new(HashMap::new())),
            start_instant: Instant::now(),
            start_datetime: Utc::now(),
        }
    }

    /// Start a background task that rolls back expired transactions.
    ///
    /// Call once from the composition root.
    pub fn start_sweep_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                self.sweep_expired().await;
            }
        });
    }

    /// Begin a transaction on the pool resolved for `role` (`None` uses the
    /// default role). Returns the generated transaction id.
    pub async fn begin(
        &self,
        role: Option<PoolRole>,
        timeout_secs: Option<u32>,
    ) -> DbResult<String> {
        let effective = role.unwrap_or(self.router.default_role());
        let timeout_secs = timeout_secs
            .map(|t| t.min(MAX_TRANSACTION_TIMEOUT_SECS))
            .unwrap_or(DEFAULT_TRANSACTION_TIMEOUT_SECS);

        let tx = match self.router.resolve(Some(effective)) {
            DbPool::MySql(pool) => DbTransaction::MySql(pool.begin().await.map_err(DbError::from)?),
            DbPool::Postgres(pool) => {
                DbTransaction::Postgres(pool.begin().await.map_err(DbError::from)?)
            }
            DbPool::SQLite(pool) => {
                DbTransaction::SQLite(pool.begin().await.map_err(DbError::from)?)
            }
        };

        let transaction_id = generate_transaction_id();
        let entry = ActiveTransaction {
            transaction: Some(tx),
            role: effective,
            created_at: Instant::now(),
            timeout_secs,
        };

        {
            let mut txs = self.transactions.write().await;
            txs.insert(transaction_id.clone(), entry);
        }

        info!(
            transaction_id = %transaction_id,
            role = %effective,
            timeout_secs = timeout_secs,
            "Transaction started"
        );

        Ok(transaction_id)
    }

    /// Get role, timeout, and expiry state without taking ownership.
    pub async fn get_info(&self, transaction_id: &str) -> DbResult<(PoolRole, u32, bool)> {
        let txs = self.transactions.read().await;
        match txs.get(transaction_id) {
            Some(entry) => Ok((entry.role, entry.timeout_secs, entry.is_expired())),
            None => Err(DbError::transaction("Transaction not found", transaction_id)),
        }
    }

    /// List all active transactions with their metadata.
    pub async fn list_all(&self) -> Vec<TransactionMetadata> {
        let txs = self.transactions.read().await;
        txs.iter()
            .map(|(id, entry)| {
                let offset_from_start = entry.created_at.duration_since(self.start_instant);
                TransactionMetadata {
                    transaction_id: id.clone(),
                    role: entry.role,
                    started_at: self.start_datetime + offset_from_start,
                    duration_secs: entry.created_at.elapsed().as_secs(),
                    timeout_secs: entry.timeout_secs,
                }
            })
            .collect()
    }

    fn validate_entry(entry: &ActiveTransaction, transaction_id: &str) -> DbResult<()> {
        if entry.is_expired() {
            return Err(DbError::transaction(
                "Transaction has expired",
                transaction_id,
            ));
        }
        if entry.transaction.is_none() {
            return Err(DbError::transaction(
                "Transaction is no longer active",
                transaction_id,
            ));
        }
        Ok(())
    }

    /// Execute a write statement within a transaction.
    pub async fn execute_in(
        &self,
        transaction_id: &str,
        sql: &str,
        params: &[StatementParam],
    ) -> DbResult<u64> {
        let mut txs = self.transactions.write().await;
        let entry = txs
            .get_mut(transaction_id)
            .ok_or_else(|| DbError::transaction("Transaction not found", transaction_id))?;

        Self::validate_entry(entry, transaction_id)?;

        let tx = entry.transaction.as_mut().ok_or_else(|| {
            DbError::transaction("Transaction is no longer active", transaction_id)
        })?;

        let rows_affected = match tx {
            DbTransaction::MySql(tx) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_mysql_param(query, param);
                }
                query
                    .execute(&mut **tx)
                    .await
                    .map_err(DbError::from)?
                    .rows_affected()
            }
            DbTransaction::Postgres(tx) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_postgres_param(query, param);
                }
                query
                    .execute(&mut **tx)
                    .await
                    .map_err(DbError::from)?
                    .rows_affected()
            }
            DbTransaction::SQLite(tx) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_sqlite_param(query, param);
                }
                query
                    .execute(&mut **tx)
                    .await
                    .map_err(DbError::from)?
                    .rows_affected()
            }
        };

        debug!(
            transaction_id = %transaction_id,
            rows_affected = rows_affected,
            "Executed in transaction"
        );

        Ok(rows_affected)
    }

    /// Execute a query within a transaction.
    pub async fn query_in(
        &self,
        transaction_id: &str,
        sql: &str,
        params: &[StatementParam],
    ) -> DbResult<Vec<serde_json::Map<String, serde_json::Value>>> {
        use futures_util::TryStreamExt;

        let mut txs = self.transactions.write().await;
        let entry = txs
            .get_mut(transaction_id)
            .ok_or_else(|| DbError::transaction("Transaction not found", transaction_id))?;

        Self::validate_entry(entry, transaction_id)?;

        let tx = entry.transaction.as_mut().ok_or_else(|| {
            DbError::transaction("Transaction is no longer active", transaction_id)
        })?;

        let rows: Vec<serde_json::Map<String, serde_json::Value>> = match tx {
            DbTransaction::MySql(tx) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_mysql_param(query, param);
                }
                let rows: Vec<sqlx::mysql::MySqlRow> = query
                    .fetch(&mut **tx)
                    .try_collect()
                    .await
                    .map_err(DbError::from)?;
                rows.iter().map(|r| r.to_json_map()).collect()
            }
            DbTransaction::Postgres(tx) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_postgres_param(query, param);
                }
                let rows: Vec<sqlx::postgres::PgRow> = query
                    .fetch(&mut **tx)
                    .try_collect()
                    .await
                    .map_err(DbError::from)?;
                rows.iter().map(|r| r.to_json_map()).collect()
            }
            DbTransaction::SQLite(tx) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_sqlite_param(query, param);
                }
                let rows: Vec<sqlx::sqlite::SqliteRow> = query
                    .fetch(&mut **tx)
                    .try_collect()
                    .await
                    .map_err(DbError::from)?;
                rows.iter().map(|r| r.to_json_map()).collect()
            }
        };

        debug!(
            transaction_id = %transaction_id,
            row_count = rows.len(),
            "Queried in transaction"
        );

        Ok(rows)
    }

    /// Commit a transaction.
    pub async fn commit(&self, transaction_id: &str) -> DbResult<()> {
        let mut txs = self.transactions.write().await;
        let entry = txs
            .remove(transaction_id)
            .ok_or_else(|| DbError::transaction("Transaction not found", transaction_id))?;

        let tx = entry.transaction.ok_or_else(|| {
            DbError::transaction("Transaction is no longer active", transaction_id)
        })?;

        tx.commit().await?;

        info!(
            transaction_id = %transaction_id,
            role = %entry.role,
            "Transaction committed"
        );

        Ok(())
    }

    /// Rollback a transaction.
    pub async fn rollback(&self, transaction_id: &str) -> DbResult<()> {
        let mut txs = self.transactions.write().await;
        let entry = txs
            .remove(transaction_id)
            .ok_or_else(|| DbError::transaction("Transaction not found", transaction_id))?;

        let tx = entry.transaction.ok_or_else(|| {
            DbError::transaction("Transaction is no longer active", transaction_id)
        })?;

        tx.rollback().await?;

        info!(
            transaction_id = %transaction_id,
            role = %entry.role,
            "Transaction rolled back"
        );

        Ok(())
    }

    /// Roll back all expired transactions.
    async fn sweep_expired(&self) {
        let mut txs = self.transactions.write().await;
        let expired_ids: Vec<String> = txs
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired_ids {
            if let Some(entry) = txs.remove(&id) {
                if let Some(tx) = entry.transaction {
                    warn!(
                        transaction_id = %id,
                        role = %entry.role,
                        "Rolling back expired transaction"
                    );
                    // Best effort rollback - ignore errors
                    let _ = tx.rollback().await;
                }
            }
        }
    }

    /// Get the number of active transactions.
    pub async fn count(&self) -> usize {
        let txs = self.transactions.read().await;
        txs.len()
    }
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolSettings;
    use crate::db::pool::connect_primary;

    async fn manager() -> TransactionManager {
        let primary = connect_primary(&PoolSettings::from_url("sqlite::memory:"))
            .await
            .unwrap();
        let secondary = connect_primary(&PoolSettings::from_url("sqlite::memory:"))
            .await
            .unwrap();
        TransactionManager::new(Arc::new(RoutingTable::new(
            primary,
            secondary,
            PoolRole::Secondary,
        )))
    }

    #[test]
    fn test_transaction_id_format() {
        let id = generate_transaction_id();
        assert!(id.starts_with("tx_"));
        assert_eq!(id.len(), 3 + 32); // "tx_" + 32 hex chars
    }

    #[test]
    fn test_timeout_constants() {
        assert!(DEFAULT_TRANSACTION_TIMEOUT_SECS <= MAX_TRANSACTION_TIMEOUT_SECS);
    }

    #[tokio::test]
    async fn test_manager_starts_empty() {
        let manager = manager().await;
        assert_eq!(manager.count().await, 0);
        assert!(manager.list_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_transaction_not_found() {
        let manager = manager().await;
        assert!(manager.get_info("tx_missing").await.is_err());
        assert!(manager.commit("tx_missing").await.is_err());
        assert!(manager.rollback("tx_missing").await.is_err());
    }

    #[tokio::test]
    async fn test_begin_records_role_and_clamps_timeout() {
        let manager = manager().await;
        let id = manager
            .begin(Some(PoolRole::Primary), Some(10_000))
            .await
            .unwrap();
        let (role, timeout_secs, expired) = manager.get_info(&id).await.unwrap();
        assert_eq!(role, PoolRole::Primary);
        assert_eq!(timeout_secs, MAX_TRANSACTION_TIMEOUT_SECS);
        assert!(!expired);
        manager.rollback(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_begin_default_role() {
        let manager = manager().await;
        let id = manager.begin(None, None).await.unwrap();
        let (role, timeout_secs, _) = manager.get_info(&id).await.unwrap();
        assert_eq!(role, PoolRole::Secondary);
        assert_eq!(timeout_secs, DEFAULT_TRANSACTION_TIMEOUT_SECS);
        manager.rollback(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_metadata_listing() {
        let manager = manager().await;
        let id = manager.begin(Some(PoolRole::Primary), Some(30)).await.unwrap();

        let list = manager.list_all().await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].transaction_id, id);
        assert_eq!(list[0].role, PoolRole::Primary);
        assert_eq!(list[0].timeout_secs, 30);

        manager.commit(&id).await.unwrap();
        assert_eq!(manager.count().await, 0);
    }
}
