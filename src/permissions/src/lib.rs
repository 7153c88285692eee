//! # Tenant Permissions
//!
//! Resolves, for one tenant and user, the roles, role graph and permission
//! overrides a policy engine needs to make an authorization decision. Each
//! tenant's data lives in its own database, reached through short-lived IAM
//! credentials.
//!
//! ## Features
//!
//! - **Per-tenant connection pools** created lazily, one per tenant
//! - **Cached IAM database tokens**, refreshed only after expiry
//! - **Role hierarchy resolution** breadth-first with a cycle guard
//! - **Tenant role graph** for policy engines that walk inheritance themselves
//! - **Concurrent aggregation** that returns a complete view or a single error
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tenant_permissions::{
//!     ForUserRequest, InMemoryPermissionStore, Permission, PermissionService, Role,
//!     TenantDataset, TenantId, UserId,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tenant = TenantId::parse("acme")?;
//!     let user = UserId::parse("alice")?;
//!
//!     let store = InMemoryPermissionStore::new();
//!     store
//!         .put_tenant(
//!             tenant.clone(),
//!             TenantDataset::new()
//!                 .with_role(Role::new("r1", "editor"))
//!                 .with_permission(Permission::new("p1", "invoices:create"))
//!                 .grant("r1", "p1")
//!                 .assign(&user, "r1"),
//!         )
//!         .await;
//!
//!     let service = PermissionService::new(Arc::new(store));
//!     let request = ForUserRequest::new(tenant, user);
//!     let for_user = service
//!         .get_for_user(&request, &CancellationToken::new())
//!         .await?;
//!
//!     assert_eq!(for_user.roles[0].name, "editor");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod roles;
pub mod service;
pub mod store;
pub mod tenant;
pub mod types;
pub mod wire;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export commonly used types
pub use error::{PermissionsError, Result};
pub use roles::{build_role_map, resolve_user_roles, RoleNode, TenantRoleMap};
pub use service::{ForUser, ForUserRequest, PermissionService};
pub use store::{InMemoryPermissionStore, PermissionStore, StoreTx, TenantDataset};
pub use tenant::{CredentialProvider, PoolConnector, TenantRegistry};
pub use types::{
    OverrideKind, Permission, Resource, ResourceFilter, Role, TenantId, UserId, UserOverrides,
};
pub use wire::{PermissionsRequest, PermissionsResponse, RoleGraph};

#[cfg(feature = "postgres")]
pub use store::PostgresPermissionStore;
