//! Shared fixtures and store wrappers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tenant_permissions::types::{PermissionOverride, RoleId};
use tenant_permissions::{
    InMemoryPermissionStore, OverrideKind, Permission, PermissionStore, PermissionsError,
    Resource, ResourceFilter, Result, Role, StoreTx, TenantDataset, TenantId, UserId,
};

pub const TENANT: &str = "test_tenant";

pub const CUSTOMER_MANAGER: &str = "e4d9424c-8249-4888-9812-35f5aefb02b2";
pub const CUSTOMER_SERVICE: &str = "eb1386c5-6a18-43e3-9176-b7ffa927ecc2";
pub const DISCOUNT_DECIDER: &str = "b5622eba-1c4c-42de-803d-778261c61b79";

pub const CUSTOMERS_CREATE: &str = "9bb579ce-e5a0-4917-a8c8-f9916e5ee9aa";
pub const CUSTOMERS_READ: &str = "1349adb7-052b-4879-b843-29621d96966f";
pub const CUSTOMERS_UPDATE: &str = "2c1c7083-e97e-456c-8e33-db4b1ae4ef49";
pub const CUSTOMERS_DELETE: &str = "af02ce53-955d-4c5c-89db-9a9e0c9f11fa";
pub const DISCOUNTS_CREATE: &str = "2a16bbbb-40cb-4bfb-8e99-fa521ab74508";
pub const DISCOUNTS_READ: &str = "49539ec8-f619-47b4-8101-299ed590e5fb";
pub const DISCOUNTS_DELETE: &str = "06597dcc-26dd-4f48-99be-95ccce65bca9";

/// Assigned "customer service"; one extra and one revoked permission
pub const SERVICE_AGENT: &str = "2cdabaf2-24fb-4c90-961f-b92f129f895e";
/// No role assignments at all
pub const NEWCOMER: &str = "4817f881-0081-4a96-a8c1-7da5b743c2ec";

pub fn tenant() -> TenantId {
    TenantId::parse(TENANT).unwrap()
}

pub fn user(id: &str) -> UserId {
    UserId::parse(id).unwrap()
}

/// customer manager -> customer service -> discount decider
pub fn customer_dataset() -> TenantDataset {
    let agent = user(SERVICE_AGENT);
    TenantDataset::new()
        .with_role(Role::new(CUSTOMER_MANAGER, "customer manager"))
        .with_role(Role::new(CUSTOMER_SERVICE, "customer service"))
        .with_role(Role::new(DISCOUNT_DECIDER, "discount decider"))
        .with_permission(Permission::new(CUSTOMERS_CREATE, "customers:create"))
        .with_permission(Permission::new(CUSTOMERS_READ, "customers:read"))
        .with_permission(Permission::new(CUSTOMERS_UPDATE, "customers:update"))
        .with_permission(Permission::new(CUSTOMERS_DELETE, "customers:delete"))
        .with_permission(Permission::new(DISCOUNTS_CREATE, "discounts:create"))
        .with_permission(Permission::new(DISCOUNTS_READ, "discounts:read"))
        .with_permission(Permission::new(DISCOUNTS_DELETE, "discounts:delete"))
        .grant(CUSTOMER_MANAGER, CUSTOMERS_DELETE)
        .grant(CUSTOMER_MANAGER, CUSTOMERS_UPDATE)
        .grant(CUSTOMER_SERVICE, CUSTOMERS_CREATE)
        .grant(CUSTOMER_SERVICE, CUSTOMERS_READ)
        .grant(DISCOUNT_DECIDER, DISCOUNTS_CREATE)
        .grant(DISCOUNT_DECIDER, DISCOUNTS_DELETE)
        .grant(DISCOUNT_DECIDER, DISCOUNTS_READ)
        .inherit(CUSTOMER_MANAGER, CUSTOMER_SERVICE)
        .inherit(CUSTOMER_SERVICE, DISCOUNT_DECIDER)
        .assign(&agent, CUSTOMER_SERVICE)
        .with_override(&agent, CUSTOMERS_UPDATE, OverrideKind::Extra)
        .with_override(&agent, DISCOUNTS_DELETE, OverrideKind::Revoked)
        .with_resource(
            &agent,
            Resource::new("90a12308-003c-4b90-957e-59ad1f3e5b7a", "customers"),
        )
        .with_resource(
            &agent,
            Resource::new("6b7ef64b-8f4f-47e2-9cc6-ebeb0075904b", "discounts"),
        )
}

pub async fn customer_store() -> InMemoryPermissionStore {
    let store = InMemoryPermissionStore::new();
    store.put_tenant(tenant(), customer_dataset()).await;
    store
}

/// Counters shared by every transaction of a [`FaultyStore`]
#[derive(Default)]
pub struct TxStats {
    pub begun: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub slow_completed: AtomicUsize,
}

impl TxStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Store wrapper that fails or stalls one named query
#[derive(Clone)]
pub struct FaultyStore {
    inner: InMemoryPermissionStore,
    fail_on: Option<&'static str>,
    slow_on: Option<(&'static str, Duration)>,
    pub stats: Arc<TxStats>,
}

impl FaultyStore {
    pub fn new(inner: InMemoryPermissionStore) -> Self {
        Self {
            inner,
            fail_on: None,
            slow_on: None,
            stats: Arc::new(TxStats::default()),
        }
    }

    pub fn failing(mut self, query: &'static str) -> Self {
        self.fail_on = Some(query);
        self
    }

    pub fn slow(mut self, query: &'static str, delay: Duration) -> Self {
        self.slow_on = Some((query, delay));
        self
    }
}

#[async_trait]
impl PermissionStore for FaultyStore {
    async fn begin(&self, tenant: &TenantId) -> Result<Box<dyn StoreTx>> {
        let inner = self.inner.begin(tenant).await?;
        self.stats.begun.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FaultyTx {
            inner,
            fail_on: self.fail_on,
            slow_on: self.slow_on,
            stats: self.stats.clone(),
        }))
    }
}

struct FaultyTx {
    inner: Box<dyn StoreTx>,
    fail_on: Option<&'static str>,
    slow_on: Option<(&'static str, Duration)>,
    stats: Arc<TxStats>,
}

impl FaultyTx {
    /// Fault injection for one query; returns a future that does not borrow `self`
    fn before(&self, query: &'static str) -> impl std::future::Future<Output = Result<()>> + Send {
        let fail = self.fail_on == Some(query);
        let delay = self
            .slow_on
            .and_then(|(slow, delay)| (slow == query).then_some(delay));
        let stats = self.stats.clone();
        async move {
            if fail {
                return Err(PermissionsError::query(query, "injected failure"));
            }
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
                stats.slow_completed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }
}

#[async_trait]
impl StoreTx for FaultyTx {
    async fn tenant_permissions(&mut self, filter: &ResourceFilter) -> Result<Vec<Permission>> {
        self.before("tenant_permissions").await?;
        self.inner.tenant_permissions(filter).await
    }

    async fn tenant_roles(&mut self) -> Result<Vec<Role>> {
        self.before("tenant_roles").await?;
        self.inner.tenant_roles().await
    }

    async fn user_roles(&mut self, user: &UserId) -> Result<Vec<Role>> {
        self.before("user_roles").await?;
        self.inner.user_roles(user).await
    }

    async fn child_roles(&mut self, parents: &[RoleId]) -> Result<Vec<Role>> {
        self.before("child_roles").await?;
        self.inner.child_roles(parents).await
    }

    async fn role_permissions(
        &mut self,
        roles: &[RoleId],
        filter: &ResourceFilter,
    ) -> Result<Vec<Permission>> {
        self.before("role_permissions").await?;
        self.inner.role_permissions(roles, filter).await
    }

    async fn user_permission_overrides(
        &mut self,
        user: &UserId,
        filter: &ResourceFilter,
    ) -> Result<Vec<PermissionOverride>> {
        self.before("user_permission_overrides").await?;
        self.inner.user_permission_overrides(user, filter).await
    }

    async fn user_resources(
        &mut self,
        user: &UserId,
        filter: &ResourceFilter,
    ) -> Result<Vec<Resource>> {
        self.before("user_resources").await?;
        self.inner.user_resources(user, filter).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.stats.commits.fetch_add(1, Ordering::SeqCst);
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.stats.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.inner.rollback().await
    }
}
