//! Read/write-splitting persistence layer.
//!
//! This library wires two database connection pools (a primary for writes and
//! a secondary for reads) behind a role-based routing table, loads named SQL
//! statements from mapper files, and exposes a session facade plus a
//! transaction manager on top of the routed pools.

pub mod config;
pub mod db;
pub mod error;

pub use config::{PoolSettings, Settings};
pub use db::{
    DatabaseType, DbPool, PoolRole, RoutingTable, Session, SessionFactory, StatementParam,
    StatementRegistry, TransactionManager,
};
pub use error::{DbError, DbResult};

use std::sync::Arc;
use tracing::info;

/// Fully wired data access stack.
///
/// Built once at startup from [`Settings`]; everything downstream borrows
/// the shared routing table and statement registry through `Arc`s.
pub struct DataAccess {
    router: Arc<RoutingTable>,
    sessions: SessionFactory,
    transactions: Arc<TransactionManager>,
}

impl DataAccess {
    /// Connect both pools, load the mapped statements, and assemble the
    /// session factory and transaction manager.
    ///
    /// Also starts the background sweep for expired transactions.
    pub async fn bootstrap(settings: &Settings) -> DbResult<Self> {
        settings.validate()?;

        let primary = db::connect_primary(&settings.primary).await?;
        info!(
            db_type = %primary.db_type(),
            connections = primary.size(),
            "Primary pool connected"
        );

        let secondary = db::connect_secondary(&settings.secondary).await?;
        info!(
            db_type = %secondary.db_type(),
            connections = secondary.size(),
            "Secondary pool connected"
        );

        let statements = Arc::new(StatementRegistry::load(
            &settings.mapper_dir,
            settings.statement_namespace.as_deref(),
            primary.db_type(),
        )?);
        info!(
            statements = statements.len(),
            mapper_dir = %settings.mapper_dir.display(),
            "Mapped statements loaded"
        );

        let router = Arc::new(RoutingTable::new(
            primary,
            secondary,
            settings.default_role,
        ));

        let sessions = SessionFactory::new(router.clone(), statements);
        let transactions = Arc::new(TransactionManager::new(router.clone()));
        transactions.clone().start_sweep_task();

        Ok(Self {
            router,
            sessions,
            transactions,
        })
    }

    /// Open a session routed to `role` (`None` uses the configured default).
    pub fn session(&self, role: Option<PoolRole>) -> Session {
        self.sessions.session(role)
    }

    pub fn sessions(&self) -> &SessionFactory {
        &self.sessions
    }

    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.transactions
    }

    pub fn router(&self) -> &RoutingTable {
        &self.router
    }

    /// Close both pools. Active transactions are abandoned.
    pub async fn close(&self) {
        self.router.close().await;
        info!("Pools closed");
    }
}
