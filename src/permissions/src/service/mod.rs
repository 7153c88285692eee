//! Permission aggregation
//!
//! [`PermissionService::get_for_user`] gathers everything about one user
//! concurrently. Each part runs as its own task with its own transaction.
//! The first failure cancels the remaining tasks and is returned alone; a
//! [`ForUser`] is only ever returned complete.

use crate::error::{PermissionsError, Result};
use crate::roles::{build_role_map, resolve_user_roles, TenantRoleMap};
use crate::store::{finish, PermissionStore, StoreTx};
use crate::types::{
    Resource, ResourceFilter, Role, TenantId, TenantPermission, UserId, UserOverrides,
    UserPermission,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod for_user;

pub use for_user::{ForUser, ForUserRequest};

/// One completed part of a [`ForUser`]
enum Part {
    RoleMap(TenantRoleMap),
    Overrides(UserOverrides),
    Roles(Vec<Role>),
    Resources(Vec<Resource>),
    TenantPermissions(Vec<TenantPermission>),
    UserPermissions(Vec<UserPermission>),
}

#[derive(Default)]
struct Parts {
    role_map: Option<TenantRoleMap>,
    overrides: Option<UserOverrides>,
    roles: Option<Vec<Role>>,
    resources: Option<Vec<Resource>>,
    tenant_permissions: Option<Vec<TenantPermission>>,
    user_permissions: Option<Vec<UserPermission>>,
}

impl Parts {
    fn apply(&mut self, part: Part) {
        match part {
            Part::RoleMap(v) => self.role_map = Some(v),
            Part::Overrides(v) => self.overrides = Some(v),
            Part::Roles(v) => self.roles = Some(v),
            Part::Resources(v) => self.resources = Some(v),
            Part::TenantPermissions(v) => self.tenant_permissions = Some(v),
            Part::UserPermissions(v) => self.user_permissions = Some(v),
        }
    }

    fn assemble(self) -> Result<ForUser> {
        let missing = |part: &str| PermissionsError::Internal(format!("{} not resolved", part));
        let overrides = self.overrides.ok_or_else(|| missing("permission overrides"))?;
        Ok(ForUser {
            roles: self.roles.ok_or_else(|| missing("user roles"))?,
            extra_permissions: overrides.extra,
            revoked_permissions: overrides.revoked,
            resources: self.resources.ok_or_else(|| missing("user resources"))?,
            role_map: self.role_map.ok_or_else(|| missing("tenant role map"))?,
            tenant_permissions: self.tenant_permissions,
            user_permissions: self.user_permissions,
        })
    }
}

/// Resolves roles, permissions and resources for users of any tenant
#[derive(Clone)]
pub struct PermissionService {
    store: Arc<dyn PermissionStore>,
    timeout: Option<Duration>,
}

impl PermissionService {
    pub fn new(store: Arc<dyn PermissionStore>) -> Self {
        Self {
            store,
            timeout: None,
        }
    }

    /// Bound every [`get_for_user`](Self::get_for_user) call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn begin(&self, tenant: &TenantId) -> Result<Box<dyn StoreTx>> {
        self.store
            .begin(tenant)
            .await
            .map_err(|e| e.context("get tenant connection"))
    }

    /// Tenant-wide permissions matching the filter
    pub async fn tenant_permissions(
        &self,
        tenant: &TenantId,
        filter: &ResourceFilter,
    ) -> Result<Vec<TenantPermission>> {
        let run = async {
            let mut tx = self.begin(tenant).await?;
            let result = tx.tenant_permissions(filter).await;
            finish(tx, result).await
        };
        run.await.map_err(|e| e.context("get tenant permissions"))
    }

    /// Direct and inherited roles of the user
    pub async fn user_roles(&self, tenant: &TenantId, user: &UserId) -> Result<Vec<Role>> {
        let run = async {
            let mut tx = self.begin(tenant).await?;
            let result = resolve_user_roles(tx.as_mut(), user).await;
            finish(tx, result).await
        };
        run.await.map_err(|e| e.context("get user roles"))
    }

    /// Extra and revoked permissions of the user
    pub async fn user_overrides(
        &self,
        tenant: &TenantId,
        user: &UserId,
        filter: &ResourceFilter,
    ) -> Result<UserOverrides> {
        let run = async {
            let mut tx = self.begin(tenant).await?;
            let result = match tx.user_permission_overrides(user, filter).await {
                Ok(rows) => UserOverrides::partition(rows),
                Err(e) => Err(e),
            };
            finish(tx, result).await
        };
        run.await
            .map_err(|e| e.context("get user permission overrides"))
    }

    /// Resources assigned to the user
    pub async fn user_resources(
        &self,
        tenant: &TenantId,
        user: &UserId,
        filter: &ResourceFilter,
    ) -> Result<Vec<Resource>> {
        let run = async {
            let mut tx = self.begin(tenant).await?;
            let result = tx.user_resources(user, filter).await;
            finish(tx, result).await
        };
        run.await.map_err(|e| e.context("get user resources"))
    }

    /// Role graph of the whole tenant
    pub async fn tenant_role_map(
        &self,
        tenant: &TenantId,
        filter: &ResourceFilter,
    ) -> Result<TenantRoleMap> {
        let run = async {
            let mut tx = self.begin(tenant).await?;
            let result = build_role_map(tx.as_mut(), filter).await;
            finish(tx, result).await
        };
        run.await.map_err(|e| e.context("get tenant role map"))
    }

    /// Distinct permissions granted through any of the user's resolved roles
    pub async fn user_permissions(
        &self,
        tenant: &TenantId,
        user: &UserId,
        filter: &ResourceFilter,
    ) -> Result<Vec<UserPermission>> {
        let run = async {
            let mut tx = self.begin(tenant).await?;
            let result = async {
                let roles = resolve_user_roles(tx.as_mut(), user).await?;
                if roles.is_empty() {
                    return Ok(Vec::new());
                }
                let ids: Vec<_> = roles.into_iter().map(|r| r.id).collect();
                tx.role_permissions(&ids, filter).await
            }
            .await;
            finish(tx, result).await
        };
        run.await.map_err(|e| e.context("get user permissions"))
    }

    /// Resolve everything about one user.
    ///
    /// Returns [`PermissionsError::Cancelled`] without querying if `cancel` is
    /// already cancelled. Cancelling `cancel` later, any part failing, or the
    /// service timeout elapsing abandons all outstanding parts.
    pub async fn get_for_user(
        &self,
        request: &ForUserRequest,
        cancel: &CancellationToken,
    ) -> Result<ForUser> {
        if cancel.is_cancelled() {
            return Err(PermissionsError::Cancelled);
        }

        debug!(
            tenant = %request.tenant,
            user = %request.user,
            resources = ?request.resources.resources(),
            "Resolving permissions for user"
        );

        let work = self.gather(request, cancel.child_token());
        let for_user = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| PermissionsError::Timeout(limit))??,
            None => work.await?,
        };

        info!(
            tenant = %request.tenant,
            user = %request.user,
            roles = for_user.roles.len(),
            extra = for_user.extra_permissions.len(),
            revoked = for_user.revoked_permissions.len(),
            resources = for_user.resources.len(),
            "Resolved permissions for user"
        );
        Ok(for_user)
    }

    async fn gather(&self, request: &ForUserRequest, group: CancellationToken) -> Result<ForUser> {
        // Dropping this future (timeout, caller gave up) cancels the group
        let _cancel_on_exit = group.clone().drop_guard();
        let mut tasks: JoinSet<Result<Part>> = JoinSet::new();

        let tenant = &request.tenant;
        let user = &request.user;
        let filter = &request.resources;

        spawn_part(&mut tasks, &group, {
            let (svc, tenant, filter) = (self.clone(), tenant.clone(), filter.clone());
            async move {
                svc.tenant_role_map(&tenant, &filter)
                    .await
                    .map(Part::RoleMap)
            }
        });
        spawn_part(&mut tasks, &group, {
            let (svc, tenant, user, filter) =
                (self.clone(), tenant.clone(), user.clone(), filter.clone());
            async move {
                svc.user_overrides(&tenant, &user, &filter)
                    .await
                    .map(Part::Overrides)
            }
        });
        spawn_part(&mut tasks, &group, {
            let (svc, tenant, user) = (self.clone(), tenant.clone(), user.clone());
            async move { svc.user_roles(&tenant, &user).await.map(Part::Roles) }
        });
        spawn_part(&mut tasks, &group, {
            let (svc, tenant, user, filter) =
                (self.clone(), tenant.clone(), user.clone(), filter.clone());
            async move {
                svc.user_resources(&tenant, &user, &filter)
                    .await
                    .map(Part::Resources)
            }
        });
        if request.include_tenant_permissions {
            spawn_part(&mut tasks, &group, {
                let (svc, tenant, filter) = (self.clone(), tenant.clone(), filter.clone());
                async move {
                    svc.tenant_permissions(&tenant, &filter)
                        .await
                        .map(Part::TenantPermissions)
                }
            });
        }
        if request.include_user_permissions {
            spawn_part(&mut tasks, &group, {
                let (svc, tenant, user, filter) =
                    (self.clone(), tenant.clone(), user.clone(), filter.clone());
                async move {
                    svc.user_permissions(&tenant, &user, &filter)
                        .await
                        .map(Part::UserPermissions)
                }
            });
        }

        let mut parts = Parts::default();
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(|e| PermissionsError::Internal(format!("permission task failed: {}", e)))
                .and_then(|result| result);

            match outcome {
                Ok(part) => parts.apply(part),
                Err(err) => {
                    group.cancel();
                    tasks.abort_all();
                    warn!(
                        tenant = %request.tenant,
                        user = %request.user,
                        error = %err,
                        "Permission aggregation failed"
                    );
                    return Err(err);
                }
            }
        }

        parts.assemble()
    }
}

/// Run one part under the group's cancellation
fn spawn_part<F>(tasks: &mut JoinSet<Result<Part>>, group: &CancellationToken, work: F)
where
    F: Future<Output = Result<Part>> + Send + 'static,
{
    let group = group.clone();
    tasks.spawn(async move {
        tokio::select! {
            biased;
            _ = group.cancelled() => Err(PermissionsError::Cancelled),
            result = work => result,
        }
    });
}
