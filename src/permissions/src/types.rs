//! Core permission resolution types

use crate::error::{PermissionsError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique role identifier
pub type RoleId = String;

/// Unique permission identifier
pub type PermissionId = String;

/// Unique resource identifier
pub type ResourceId = String;

/// Tenant identifier; selects the tenant's isolated database
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Parse a tenant identifier, rejecting empty values
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(PermissionsError::MissingTenantContext);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// User identifier within a tenant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Parse a user identifier, rejecting empty values
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(PermissionsError::MissingUserContext);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tenant role
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Role {
    /// Role identifier, unique per tenant
    pub id: RoleId,

    /// Human-readable role name (e.g., "sales_person")
    pub name: String,
}

impl Role {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Permission; `name` encodes `resource:action` (e.g., "invoices:create")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    /// Permission identifier
    pub id: PermissionId,

    /// Permission name
    pub name: String,
}

impl Permission {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Resource half of the name ("invoices" for "invoices:create")
    pub fn resource(&self) -> &str {
        self.name.split_once(':').map_or(self.name.as_str(), |(r, _)| r)
    }

    /// Action half of the name, empty when the name has no separator
    pub fn action(&self) -> &str {
        self.name.split_once(':').map_or("", |(_, a)| a)
    }
}

/// Permission granted to a role, tenant-scoped
pub type TenantPermission = Permission;

/// Permission resolved for a user through role membership
pub type UserPermission = Permission;

/// Direct per-user grant
pub type ExtraPermission = Permission;

/// Direct per-user removal
pub type RevokedPermission = Permission;

/// Concrete object a user can act on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    /// Resource identifier
    pub id: ResourceId,

    /// Resource type (e.g., "horses")
    #[serde(rename = "type")]
    pub resource_type: String,
}

impl Resource {
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
        }
    }
}

/// Resource-type filter applied to permissions and resources.
///
/// An empty filter matches everything. Permissions match when their name
/// starts with `<resource>:` for one of the entries, resources when their type
/// equals one of the entries; both comparisons ignore case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceFilter(Vec<String>);

impl ResourceFilter {
    /// Filter that matches everything
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new<I, S>(resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            resources
                .into_iter()
                .map(Into::into)
                .filter(|r: &String| !r.is_empty())
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn resources(&self) -> &[String] {
        &self.0
    }

    /// Check a permission name against the filter
    pub fn matches_permission(&self, name: &str) -> bool {
        if self.0.is_empty() {
            return true;
        }
        let name = name.to_lowercase();
        self.0
            .iter()
            .any(|r| name.starts_with(&format!("{}:", r.to_lowercase())))
    }

    /// Check a resource type against the filter
    pub fn matches_resource_type(&self, resource_type: &str) -> bool {
        if self.0.is_empty() {
            return true;
        }
        let resource_type = resource_type.to_lowercase();
        self.0.iter().any(|r| r.to_lowercase() == resource_type)
    }

    /// `ILIKE` patterns for permission names; empty for an empty filter.
    ///
    /// LIKE metacharacters inside a resource are escaped so "a_b" does not
    /// match "axb:read".
    pub fn like_patterns(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|r| format!("{}:%", escape_like(r)))
            .collect()
    }

    /// Lower-cased resource types for equality matching
    pub fn lowercase_types(&self) -> Vec<String> {
        self.0.iter().map(|r| r.to_lowercase()).collect()
    }
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Discriminator of a per-user permission override row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideKind {
    /// Adds a permission not granted by role membership
    Extra,
    /// Removes a permission that would otherwise be granted
    Revoked,
}

impl FromStr for OverrideKind {
    type Err = PermissionsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "extra" => Ok(OverrideKind::Extra),
            "revoked" => Ok(OverrideKind::Revoked),
            other => Err(PermissionsError::UnknownPermissionType(other.to_string())),
        }
    }
}

/// Raw override row as stored; the discriminator is validated on partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionOverride {
    pub permission: Permission,
    pub permission_type: String,
}

impl PermissionOverride {
    pub fn new(permission: Permission, kind: OverrideKind) -> Self {
        let permission_type = match kind {
            OverrideKind::Extra => "extra",
            OverrideKind::Revoked => "revoked",
        };
        Self {
            permission,
            permission_type: permission_type.to_string(),
        }
    }
}

/// User's extra and revoked permissions, each ordered by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserOverrides {
    pub extra: Vec<ExtraPermission>,
    pub revoked: Vec<RevokedPermission>,
}

impl UserOverrides {
    /// Split raw override rows by discriminator.
    ///
    /// An unrecognised discriminator fails the whole partition.
    pub fn partition(rows: impl IntoIterator<Item = PermissionOverride>) -> Result<Self> {
        let mut overrides = UserOverrides::default();
        for row in rows {
            match row.permission_type.parse::<OverrideKind>()? {
                OverrideKind::Extra => overrides.extra.push(row.permission),
                OverrideKind::Revoked => overrides.revoked.push(row.permission),
            }
        }
        Ok(overrides)
    }
}
