//! Role-based pool routing.
//!
//! [`RoutingTable`] associates each [`PoolRole`] with a connection pool and
//! designates one role as the default. The table is built once at startup and
//! is read-only afterwards; there is no re-registration API. Callers select a
//! pool by passing the role explicitly through the call chain; the crate
//! keeps no ambient routing state.

use crate::db::pool::DbPool;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

/// Routing key: exactly two values, used only to select a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolRole {
    Primary,
    Secondary,
}

impl std::fmt::Display for PoolRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

impl FromStr for PoolRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            other => Err(format!(
                "Unknown pool role '{other}' (expected 'primary' or 'secondary')"
            )),
        }
    }
}

/// Immutable dispatch table from [`PoolRole`] to pool.
///
/// The constructor takes the pools as named parameters so each role is bound
/// to its same-named pool; a swapped assignment has to be made visibly at the
/// composition root.
pub struct RoutingTable {
    primary: DbPool,
    secondary: DbPool,
    default_role: PoolRole,
}

impl RoutingTable {
    /// Build the table. Both pools must already be connected.
    pub fn new(primary: DbPool, secondary: DbPool, default_role: PoolRole) -> Self {
        Self {
            primary,
            secondary,
            default_role,
        }
    }

    /// Resolve a pool for the given role, falling back to the default role
    /// when none is supplied.
    pub fn resolve(&self, role: Option<PoolRole>) -> &DbPool {
        let effective = role.unwrap_or(self.default_role);
        debug!(role = %effective, explicit = role.is_some(), "Resolved pool");
        match effective {
            PoolRole::Primary => &self.primary,
            PoolRole::Secondary => &self.secondary,
        }
    }

    /// The role used when callers pass no explicit role.
    pub fn default_role(&self) -> PoolRole {
        self.default_role
    }

    /// Close both pools.
    pub async fn close(&self) {
        self.primary.close().await;
        self.secondary.close().await;
    }
}

impl std::fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingTable")
            .field("primary", &self.primary.db_type())
            .field("secondary", &self.secondary.db_type())
            .field("default_role", &self.default_role)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolSettings;
    use crate::db::pool::connect_primary;

    async fn memory_pool() -> DbPool {
        connect_primary(&PoolSettings::from_url("sqlite::memory:"))
            .await
            .unwrap()
    }

    #[test]
    fn test_role_display_round_trip() {
        for role in [PoolRole::Primary, PoolRole::Secondary] {
            let parsed: PoolRole = role.to_string().parse().unwrap();
            assert_eq!(parsed, role);
        }
    }

    #[test]
    fn test_role_parse_case_insensitive() {
        assert_eq!("PRIMARY".parse::<PoolRole>().unwrap(), PoolRole::Primary);
        assert_eq!(
            " Secondary ".parse::<PoolRole>().unwrap(),
            PoolRole::Secondary
        );
    }

    #[test]
    fn test_role_parse_unknown() {
        assert!("master".parse::<PoolRole>().is_err());
        assert!("".parse::<PoolRole>().is_err());
    }

    #[test]
    fn test_role_serde_lowercase() {
        let json = serde_json::to_string(&PoolRole::Secondary).unwrap();
        assert_eq!(json, "\"secondary\"");
        let role: PoolRole = serde_json::from_str("\"primary\"").unwrap();
        assert_eq!(role, PoolRole::Primary);
    }

    #[tokio::test]
    async fn test_resolve_both_roles() {
        let table = RoutingTable::new(
            memory_pool().await,
            memory_pool().await,
            PoolRole::Secondary,
        );
        // Both roles must resolve; role selection is observable through the
        // pointer identity of the returned pool.
        let primary = table.resolve(Some(PoolRole::Primary)) as *const DbPool;
        let secondary = table.resolve(Some(PoolRole::Secondary)) as *const DbPool;
        assert_ne!(primary, secondary);
        table.close().await;
    }

    #[tokio::test]
    async fn test_resolve_default_role() {
        let table = RoutingTable::new(
            memory_pool().await,
            memory_pool().await,
            PoolRole::Secondary,
        );
        let fallback = table.resolve(None) as *const DbPool;
        let secondary = table.resolve(Some(PoolRole::Secondary)) as *const DbPool;
        assert_eq!(fallback, secondary);
        assert_eq!(table.default_role(), PoolRole::Secondary);
        table.close().await;
    }

    #[tokio::test]
    async fn test_resolve_default_role_primary() {
        let table = RoutingTable::new(
            memory_pool().await,
            memory_pool().await,
            PoolRole::Primary,
        );
        let fallback = table.resolve(None) as *const DbPool;
        let primary = table.resolve(Some(PoolRole::Primary)) as *const DbPool;
        assert_eq!(fallback, primary);
        table.close().await;
    }
}
