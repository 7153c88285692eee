//! PostgreSQL permission store over per-tenant databases

use super::{PermissionStore, StoreTx};
use crate::error::{PermissionsError, Result};
use crate::tenant::{PgTenantConnector, TenantRegistry};
use crate::types::{
    Permission, PermissionOverride, Resource, ResourceFilter, Role, RoleId, TenantId,
    TenantPermission, UserId,
};
use async_trait::async_trait;
use sqlx::postgres::{PgRow, Postgres};
use sqlx::{Row, Transaction};
use std::sync::Arc;

const TENANT_PERMISSIONS_SQL: &str = r#"
    SELECT p.permission_id::text AS id, p.permission_name AS name
    FROM tenant_permissions tp
    JOIN permissions p ON tp.permission_id = p.permission_id
    WHERE cardinality($1::text[]) = 0 OR p.permission_name ILIKE ANY ($1::text[])
    ORDER BY name COLLATE "C" ASC, id ASC
"#;

const TENANT_ROLES_SQL: &str = r#"
    SELECT r.role_id::text AS id, r.role_name AS name
    FROM roles r
    ORDER BY name COLLATE "C" ASC, id ASC
"#;

const USER_ROLES_SQL: &str = r#"
    SELECT ur.role_id::text AS id, r.role_name AS name
    FROM user_roles ur
    JOIN roles r ON ur.role_id = r.role_id
    WHERE ur.user_id = $1::uuid
    ORDER BY name COLLATE "C" ASC, id ASC
"#;

const CHILD_ROLES_SQL: &str = r#"
    SELECT rh.child_role_id::text AS id, r.role_name AS name
    FROM role_hierarchy rh
    JOIN roles r ON rh.child_role_id = r.role_id
    WHERE rh.parent_role_id = ANY ($1::uuid[])
    ORDER BY name COLLATE "C" ASC, id ASC
"#;

const ROLE_PERMISSIONS_SQL: &str = r#"
    SELECT DISTINCT p.permission_id::text AS id, p.permission_name AS name
    FROM role_permissions rp
    JOIN permissions p ON rp.permission_id = p.permission_id
    WHERE rp.role_id = ANY ($1::uuid[])
      AND (cardinality($2::text[]) = 0 OR p.permission_name ILIKE ANY ($2::text[]))
    ORDER BY name COLLATE "C" ASC, id ASC
"#;

const USER_PERMISSIONS_SQL: &str = r#"
    SELECT up.permission_id::text AS id, p.permission_name AS name, up.permission_type
    FROM user_permissions up
    JOIN permissions p ON up.permission_id = p.permission_id
    WHERE up.user_id = $1::uuid
      AND (cardinality($2::text[]) = 0 OR p.permission_name ILIKE ANY ($2::text[]))
    ORDER BY name COLLATE "C" ASC, id ASC
"#;

const USER_RESOURCES_SQL: &str = r#"
    SELECT ur.resource_id::text AS id, rt.resource_type_name AS resource_type
    FROM user_resources ur
    JOIN resource_types rt ON ur.resource_type_id = rt.resource_type_id
    WHERE ur.user_id = $1::uuid
      AND (cardinality($2::text[]) = 0 OR lower(rt.resource_type_name) = ANY ($2::text[]))
    ORDER BY resource_type COLLATE "C" ASC, id ASC
"#;

/// Permission store reading each tenant's own database.
///
/// Connections come from the [`TenantRegistry`]; every transaction is
/// read-only.
#[derive(Clone)]
pub struct PostgresPermissionStore {
    registry: Arc<TenantRegistry<PgTenantConnector>>,
}

impl PostgresPermissionStore {
    pub fn new(registry: Arc<TenantRegistry<PgTenantConnector>>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<TenantRegistry<PgTenantConnector>> {
        &self.registry
    }
}

#[async_trait]
impl PermissionStore for PostgresPermissionStore {
    async fn begin(&self, tenant: &TenantId) -> Result<Box<dyn StoreTx>> {
        let pool = self.registry.get(tenant).await?;
        let mut tx = pool
            .pool()
            .begin()
            .await
            .map_err(|e| PermissionsError::query("begin", e))?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| PermissionsError::query("set transaction read only", e))?;
        Ok(Box::new(PgTx { tx }))
    }
}

/// Open tenant transaction; sqlx rolls it back if dropped unresolved
struct PgTx {
    tx: Transaction<'static, Postgres>,
}

fn role_from_row(row: &PgRow) -> std::result::Result<Role, sqlx::Error> {
    Ok(Role {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
    })
}

fn permission_from_row(row: &PgRow) -> std::result::Result<Permission, sqlx::Error> {
    Ok(Permission {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
    })
}

fn collect<T>(
    rows: Vec<PgRow>,
    operation: &'static str,
    map: impl Fn(&PgRow) -> std::result::Result<T, sqlx::Error>,
) -> Result<Vec<T>> {
    rows.iter()
        .map(|row| map(row).map_err(|e| PermissionsError::query(operation, e)))
        .collect()
}

#[async_trait]
impl StoreTx for PgTx {
    async fn tenant_permissions(
        &mut self,
        filter: &ResourceFilter,
    ) -> Result<Vec<TenantPermission>> {
        let rows = sqlx::query(TENANT_PERMISSIONS_SQL)
            .bind(filter.like_patterns())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| PermissionsError::query("query tenant_permissions", e))?;
        collect(rows, "scan tenant_permissions", permission_from_row)
    }

    async fn tenant_roles(&mut self) -> Result<Vec<Role>> {
        let rows = sqlx::query(TENANT_ROLES_SQL)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| PermissionsError::query("query roles", e))?;
        collect(rows, "scan roles", role_from_row)
    }

    async fn user_roles(&mut self, user: &UserId) -> Result<Vec<Role>> {
        let rows = sqlx::query(USER_ROLES_SQL)
            .bind(user.as_str())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| PermissionsError::query("query user_roles", e))?;
        collect(rows, "scan user_roles", role_from_row)
    }

    async fn child_roles(&mut self, parents: &[RoleId]) -> Result<Vec<Role>> {
        if parents.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(CHILD_ROLES_SQL)
            .bind(parents.to_vec())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| PermissionsError::query("query role_hierarchy", e))?;
        collect(rows, "scan role_hierarchy", role_from_row)
    }

    async fn role_permissions(
        &mut self,
        roles: &[RoleId],
        filter: &ResourceFilter,
    ) -> Result<Vec<Permission>> {
        if roles.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(ROLE_PERMISSIONS_SQL)
            .bind(roles.to_vec())
            .bind(filter.like_patterns())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| PermissionsError::query("query role_permissions", e))?;
        collect(rows, "scan role_permissions", permission_from_row)
    }

    async fn user_permission_overrides(
        &mut self,
        user: &UserId,
        filter: &ResourceFilter,
    ) -> Result<Vec<PermissionOverride>> {
        let rows = sqlx::query(USER_PERMISSIONS_SQL)
            .bind(user.as_str())
            .bind(filter.like_patterns())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| PermissionsError::query("query user_permissions", e))?;
        collect(rows, "scan user_permissions", |row| {
            Ok(PermissionOverride {
                permission: permission_from_row(row)?,
                permission_type: row.try_get("permission_type")?,
            })
        })
    }

    async fn user_resources(
        &mut self,
        user: &UserId,
        filter: &ResourceFilter,
    ) -> Result<Vec<Resource>> {
        let rows = sqlx::query(USER_RESOURCES_SQL)
            .bind(user.as_str())
            .bind(filter.lowercase_types())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| PermissionsError::query("query user_resources", e))?;
        collect(rows, "scan user_resources", |row| {
            Ok(Resource {
                id: row.try_get("id")?,
                resource_type: row.try_get("resource_type")?,
            })
        })
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| PermissionsError::query("commit", e))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| PermissionsError::query("rollback", e))
    }
}
