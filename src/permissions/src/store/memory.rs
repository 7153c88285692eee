//! In-memory permission store for tests and local development

use super::{PermissionStore, StoreTx};
use crate::error::{PermissionsError, Result};
use crate::types::{
    OverrideKind, Permission, PermissionId, PermissionOverride, Resource, ResourceFilter, Role,
    RoleId, TenantId, TenantPermission, UserId,
};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// One tenant's permission data, laid out like the relational schema
#[derive(Debug, Clone, Default)]
pub struct TenantDataset {
    roles: HashMap<RoleId, Role>,
    permissions: HashMap<PermissionId, Permission>,
    tenant_permissions: BTreeSet<PermissionId>,
    role_permissions: Vec<(RoleId, PermissionId)>,
    role_edges: Vec<(RoleId, RoleId)>,
    user_roles: Vec<(UserId, RoleId)>,
    overrides: Vec<(UserId, PermissionId, String)>,
    resources: Vec<(UserId, Resource)>,
}

impl TenantDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.insert(role.id.clone(), role);
        self
    }

    /// Register a permission and enable it for the tenant
    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.tenant_permissions.insert(permission.id.clone());
        self.permissions.insert(permission.id.clone(), permission);
        self
    }

    pub fn grant(mut self, role_id: impl Into<RoleId>, permission_id: impl Into<PermissionId>) -> Self {
        self.role_permissions
            .push((role_id.into(), permission_id.into()));
        self
    }

    /// Add a parent -> child inheritance edge
    pub fn inherit(mut self, parent: impl Into<RoleId>, child: impl Into<RoleId>) -> Self {
        self.role_edges.push((parent.into(), child.into()));
        self
    }

    pub fn assign(mut self, user: &UserId, role_id: impl Into<RoleId>) -> Self {
        self.user_roles.push((user.clone(), role_id.into()));
        self
    }

    pub fn with_override(
        self,
        user: &UserId,
        permission_id: impl Into<PermissionId>,
        kind: OverrideKind,
    ) -> Self {
        let kind = match kind {
            OverrideKind::Extra => "extra",
            OverrideKind::Revoked => "revoked",
        };
        self.with_raw_override(user, permission_id, kind)
    }

    /// Store an override row with an arbitrary discriminator
    pub fn with_raw_override(
        mut self,
        user: &UserId,
        permission_id: impl Into<PermissionId>,
        permission_type: impl Into<String>,
    ) -> Self {
        self.overrides
            .push((user.clone(), permission_id.into(), permission_type.into()));
        self
    }

    pub fn with_resource(mut self, user: &UserId, resource: Resource) -> Self {
        self.resources.push((user.clone(), resource));
        self
    }

    fn role(&self, id: &RoleId) -> Option<&Role> {
        self.roles.get(id)
    }

    fn permission(&self, id: &PermissionId) -> Option<&Permission> {
        self.permissions.get(id)
    }
}

fn sort_by_name<T>(items: &mut [T], name: impl Fn(&T) -> (&str, &str)) {
    items.sort_by(|a, b| name(a).cmp(&name(b)));
}

/// In-memory permission store keyed by tenant
#[derive(Clone, Default)]
pub struct InMemoryPermissionStore {
    tenants: Arc<RwLock<HashMap<TenantId, Arc<TenantDataset>>>>,
}

impl InMemoryPermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a tenant's data
    pub async fn put_tenant(&self, tenant: TenantId, dataset: TenantDataset) {
        let mut tenants = self.tenants.write().await;
        tenants.insert(tenant, Arc::new(dataset));
    }

    pub async fn remove_tenant(&self, tenant: &TenantId) -> bool {
        let mut tenants = self.tenants.write().await;
        tenants.remove(tenant).is_some()
    }

    pub async fn tenant_count(&self) -> usize {
        self.tenants.read().await.len()
    }
}

#[async_trait]
impl PermissionStore for InMemoryPermissionStore {
    async fn begin(&self, tenant: &TenantId) -> Result<Box<dyn StoreTx>> {
        let tenants = self.tenants.read().await;
        let data = tenants.get(tenant).cloned().ok_or_else(|| {
            PermissionsError::Connection(format!("database \"{}\" does not exist", tenant))
        })?;
        Ok(Box::new(MemoryTx { data }))
    }
}

/// Snapshot of a tenant taken when the transaction began
struct MemoryTx {
    data: Arc<TenantDataset>,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn tenant_permissions(
        &mut self,
        filter: &ResourceFilter,
    ) -> Result<Vec<TenantPermission>> {
        let mut permissions: Vec<Permission> = self
            .data
            .tenant_permissions
            .iter()
            .filter_map(|id| self.data.permission(id))
            .filter(|p| filter.matches_permission(&p.name))
            .cloned()
            .collect();
        sort_by_name(&mut permissions, |p| (p.name.as_str(), p.id.as_str()));
        Ok(permissions)
    }

    async fn tenant_roles(&mut self) -> Result<Vec<Role>> {
        let mut roles: Vec<Role> = self.data.roles.values().cloned().collect();
        sort_by_name(&mut roles, |r| (r.name.as_str(), r.id.as_str()));
        Ok(roles)
    }

    async fn user_roles(&mut self, user: &UserId) -> Result<Vec<Role>> {
        let mut roles: Vec<Role> = self
            .data
            .user_roles
            .iter()
            .filter(|(u, _)| u == user)
            .filter_map(|(_, role_id)| self.data.role(role_id))
            .cloned()
            .collect();
        sort_by_name(&mut roles, |r| (r.name.as_str(), r.id.as_str()));
        Ok(roles)
    }

    async fn child_roles(&mut self, parents: &[RoleId]) -> Result<Vec<Role>> {
        let mut roles: Vec<Role> = self
            .data
            .role_edges
            .iter()
            .filter(|(parent, _)| parents.contains(parent))
            .filter_map(|(_, child)| self.data.role(child))
            .cloned()
            .collect();
        sort_by_name(&mut roles, |r| (r.name.as_str(), r.id.as_str()));
        Ok(roles)
    }

    async fn role_permissions(
        &mut self,
        roles: &[RoleId],
        filter: &ResourceFilter,
    ) -> Result<Vec<Permission>> {
        let ids: BTreeSet<&PermissionId> = self
            .data
            .role_permissions
            .iter()
            .filter(|(role_id, _)| roles.contains(role_id))
            .map(|(_, permission_id)| permission_id)
            .collect();
        let mut permissions: Vec<Permission> = ids
            .into_iter()
            .filter_map(|id| self.data.permission(id))
            .filter(|p| filter.matches_permission(&p.name))
            .cloned()
            .collect();
        sort_by_name(&mut permissions, |p| (p.name.as_str(), p.id.as_str()));
        Ok(permissions)
    }

    async fn user_permission_overrides(
        &mut self,
        user: &UserId,
        filter: &ResourceFilter,
    ) -> Result<Vec<PermissionOverride>> {
        let mut rows: Vec<PermissionOverride> = self
            .data
            .overrides
            .iter()
            .filter(|(u, _, _)| u == user)
            .filter_map(|(_, permission_id, permission_type)| {
                self.data
                    .permission(permission_id)
                    .map(|permission| PermissionOverride {
                        permission: permission.clone(),
                        permission_type: permission_type.clone(),
                    })
            })
            .filter(|row| filter.matches_permission(&row.permission.name))
            .collect();
        sort_by_name(&mut rows, |row| {
            (row.permission.name.as_str(), row.permission.id.as_str())
        });
        Ok(rows)
    }

    async fn user_resources(
        &mut self,
        user: &UserId,
        filter: &ResourceFilter,
    ) -> Result<Vec<Resource>> {
        let mut resources: Vec<Resource> = self
            .data
            .resources
            .iter()
            .filter(|(u, r)| u == user && filter.matches_resource_type(&r.resource_type))
            .map(|(_, r)| r.clone())
            .collect();
        sort_by_name(&mut resources, |r| (r.resource_type.as_str(), r.id.as_str()));
        Ok(resources)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
