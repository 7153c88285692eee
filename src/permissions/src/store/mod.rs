//! Permission store query contracts
//!
//! A [`PermissionStore`] opens read-only transactions against one tenant's
//! permission data. Every query runs inside a [`StoreTx`] so that a caller can
//! group several queries under one transaction and resolve it exactly once:
//! [`finish`] commits on success and rolls back on failure. Dropping a
//! transaction without resolving it rolls it back.
//!
//! Ordering contract: role and permission lists are ordered by name
//! ascending; resources by type then identifier.

use crate::error::Result;
use crate::types::{
    Permission, PermissionOverride, Resource, ResourceFilter, Role, RoleId, TenantId,
    TenantPermission, UserId,
};
use async_trait::async_trait;
use tracing::warn;

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{InMemoryPermissionStore, TenantDataset};

#[cfg(feature = "postgres")]
pub use postgres::PostgresPermissionStore;

/// Source of per-tenant transactions
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Begin a read-only transaction on the tenant's data
    async fn begin(&self, tenant: &TenantId) -> Result<Box<dyn StoreTx>>;
}

/// Queries available inside one tenant transaction
#[async_trait]
pub trait StoreTx: Send {
    /// Tenant-wide permissions matching the filter
    async fn tenant_permissions(&mut self, filter: &ResourceFilter)
        -> Result<Vec<TenantPermission>>;

    /// Every role defined for the tenant
    async fn tenant_roles(&mut self) -> Result<Vec<Role>>;

    /// Roles assigned directly to the user
    async fn user_roles(&mut self, user: &UserId) -> Result<Vec<Role>>;

    /// Immediate children of any of the given roles, one row per edge
    async fn child_roles(&mut self, parents: &[RoleId]) -> Result<Vec<Role>>;

    /// Distinct direct permissions of the given roles matching the filter
    async fn role_permissions(
        &mut self,
        roles: &[RoleId],
        filter: &ResourceFilter,
    ) -> Result<Vec<Permission>>;

    /// Raw extra/revoked override rows matching the filter
    async fn user_permission_overrides(
        &mut self,
        user: &UserId,
        filter: &ResourceFilter,
    ) -> Result<Vec<PermissionOverride>>;

    /// Resources assigned to the user whose type matches the filter
    async fn user_resources(
        &mut self,
        user: &UserId,
        filter: &ResourceFilter,
    ) -> Result<Vec<Resource>>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Resolve a transaction from the outcome of the work done inside it.
///
/// A rollback failure is logged and the original error is returned.
pub async fn finish<T>(tx: Box<dyn StoreTx>, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Transaction rollback failed");
            }
            Err(err)
        }
    }
}
