//! Database access layer.
//!
//! This module provides:
//! - Connection pool construction for the primary and secondary databases
//! - Role-based pool routing
//! - Mapped statement loading and read/write classification
//! - Session facade for running mapped statements
//! - Transaction management with timeout-based cleanup
//! - Database dispatch macros for reducing code duplication

#[macro_use]
pub mod macros;
pub mod params;
pub mod pool;
pub mod routing;
pub mod session;
pub mod statements;
pub mod transaction;
pub mod types;

pub use macros::DatabaseType;
pub use params::StatementParam;
pub use pool::{DbPool, connect_primary, connect_secondary};
pub use routing::{PoolRole, RoutingTable};
pub use session::{RowSet, Session, SessionFactory};
pub use statements::{MappedStatement, StatementKind, StatementRegistry};
pub use transaction::{TransactionManager, TransactionMetadata};
