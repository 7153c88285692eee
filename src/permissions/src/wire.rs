//! JSON request/response shapes for policy-engine callers
//!
//! Every list in a response serializes as `[]` rather than `null`, including
//! a response built without any resolved data.

use crate::error::Result;
use crate::roles::TenantRoleMap;
use crate::service::{ForUser, ForUserRequest};
use crate::types::{ResourceFilter, TenantId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Incoming permissions request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionsRequest {
    #[serde(default)]
    pub tenant_id: String,

    #[serde(default)]
    pub user_id: String,

    /// Resource-type filter; empty means everything
    #[serde(default)]
    pub resources: Vec<String>,
}

impl PermissionsRequest {
    /// Validate identifiers and build the service request
    pub fn into_request(self) -> Result<ForUserRequest> {
        let tenant = TenantId::parse(self.tenant_id)?;
        let user = UserId::parse(self.user_id)?;
        Ok(ForUserRequest::new(tenant, user).with_resources(ResourceFilter::new(self.resources)))
    }
}

/// Role graph flattened to names: role name -> own permissions and children
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleGraph(BTreeMap<String, RoleGraphEntry>);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGraphEntry {
    pub permissions: Vec<String>,
    pub inherits: Vec<String>,
}

impl RoleGraph {
    pub fn get(&self, role: &str) -> Option<&RoleGraphEntry> {
        self.0.get(role)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&TenantRoleMap> for RoleGraph {
    fn from(map: &TenantRoleMap) -> Self {
        let entries = map
            .nodes()
            .map(|node| {
                let entry = RoleGraphEntry {
                    permissions: node.permissions.iter().map(|p| p.name.clone()).collect(),
                    inherits: node.inherits.iter().map(|r| r.name.clone()).collect(),
                };
                (node.role.name.clone(), entry)
            })
            .collect();
        RoleGraph(entries)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResource {
    pub resource_id: String,
    pub resource_type: String,
}

/// Outgoing permissions response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionsResponse {
    pub tenant_id: String,
    pub user_id: String,
    pub roles: Vec<String>,
    pub revoked_permissions: Vec<String>,
    pub extra_permissions: Vec<String>,
    pub user_resources: Vec<UserResource>,
    pub role_graph: RoleGraph,
}

impl PermissionsResponse {
    pub fn new(tenant: &TenantId, user: &UserId, for_user: Option<&ForUser>) -> Self {
        let mut response = PermissionsResponse {
            tenant_id: tenant.to_string(),
            user_id: user.to_string(),
            ..Default::default()
        };

        if let Some(for_user) = for_user {
            response.roles = for_user.roles.iter().map(|r| r.name.clone()).collect();
            response.revoked_permissions = for_user
                .revoked_permissions
                .iter()
                .map(|p| p.name.clone())
                .collect();
            response.extra_permissions = for_user
                .extra_permissions
                .iter()
                .map(|p| p.name.clone())
                .collect();
            response.user_resources = for_user
                .resources
                .iter()
                .map(|r| UserResource {
                    resource_id: r.id.clone(),
                    resource_type: r.resource_type.clone(),
                })
                .collect();
            response.role_graph = RoleGraph::from(&for_user.role_map);
        }

        response
    }
}
