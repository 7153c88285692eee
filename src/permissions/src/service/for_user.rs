//! Per-user permission view

use crate::roles::TenantRoleMap;
use crate::types::{
    ExtraPermission, Permission, Resource, ResourceFilter, RevokedPermission, Role, TenantId,
    TenantPermission, UserId, UserPermission,
};
use std::collections::HashSet;

/// What to resolve for one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForUserRequest {
    pub tenant: TenantId,
    pub user: UserId,

    /// Narrows permissions and resources; empty means everything
    pub resources: ResourceFilter,

    /// Also fetch the tenant-wide flat permission list
    pub include_tenant_permissions: bool,

    /// Also fetch the user's role-derived flat permission list
    pub include_user_permissions: bool,
}

impl ForUserRequest {
    pub fn new(tenant: TenantId, user: UserId) -> Self {
        Self {
            tenant,
            user,
            resources: ResourceFilter::all(),
            include_tenant_permissions: false,
            include_user_permissions: false,
        }
    }

    pub fn with_resources(mut self, resources: ResourceFilter) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_tenant_permissions(mut self) -> Self {
        self.include_tenant_permissions = true;
        self
    }

    pub fn with_user_permissions(mut self) -> Self {
        self.include_user_permissions = true;
        self
    }
}

/// Everything a policy engine needs about one user, fully populated.
///
/// Overrides are reported raw; [`ForUser::effective_permissions`] applies them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForUser {
    /// Direct roles followed by inherited roles, each once
    pub roles: Vec<Role>,
    pub extra_permissions: Vec<ExtraPermission>,
    pub revoked_permissions: Vec<RevokedPermission>,
    pub resources: Vec<Resource>,

    /// Tenant-wide role graph
    pub role_map: TenantRoleMap,

    /// Present when requested
    pub tenant_permissions: Option<Vec<TenantPermission>>,

    /// Present when requested
    pub user_permissions: Option<Vec<UserPermission>>,
}

impl ForUser {
    /// Role-derived permissions plus extras, minus revocations, ordered by name
    pub fn effective_permissions(&self) -> Vec<Permission> {
        let revoked: HashSet<&str> = self
            .revoked_permissions
            .iter()
            .map(|p| p.id.as_str())
            .collect();

        let from_roles = self
            .roles
            .iter()
            .filter_map(|role| self.role_map.get(&role.id))
            .flat_map(|node| node.permissions.iter());

        let mut seen: HashSet<&str> = HashSet::new();
        let mut effective: Vec<Permission> = Vec::new();
        for permission in from_roles.chain(self.extra_permissions.iter()) {
            if !revoked.contains(permission.id.as_str()) && seen.insert(permission.id.as_str()) {
                effective.push(permission.clone());
            }
        }

        effective.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        effective
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.roles.iter().any(|r| r.name == name)
    }
}
