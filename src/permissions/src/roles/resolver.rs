//! Breadth-first expansion of a user's role hierarchy

use crate::error::Result;
use crate::store::StoreTx;
use crate::types::{Role, RoleId, UserId};
use std::collections::HashSet;
use tracing::debug;

/// Resolve a user's direct and inherited roles.
///
/// Output order: direct roles by name, then each inheritance level by name.
/// A role reachable along several paths (diamonds, cycles) appears once, at
/// its first level, and traversal stops when a level adds no unseen role.
/// A user without direct roles resolves to nothing, whatever edges exist.
pub async fn resolve_user_roles(tx: &mut dyn StoreTx, user: &UserId) -> Result<Vec<Role>> {
    let direct = tx
        .user_roles(user)
        .await
        .map_err(|e| e.context("get direct roles"))?;
    if direct.is_empty() {
        return Ok(Vec::new());
    }

    let mut visited: HashSet<RoleId> = HashSet::with_capacity(direct.len());
    let mut resolved: Vec<Role> = Vec::with_capacity(direct.len());
    for role in direct {
        if visited.insert(role.id.clone()) {
            resolved.push(role);
        }
    }

    let mut frontier: Vec<RoleId> = resolved.iter().map(|r| r.id.clone()).collect();
    let mut depth = 0usize;
    while !frontier.is_empty() {
        let children = tx
            .child_roles(&frontier)
            .await
            .map_err(|e| e.context("get child roles"))?;

        let mut next = Vec::new();
        for child in children {
            if visited.insert(child.id.clone()) {
                next.push(child.id.clone());
                resolved.push(child);
            }
        }

        if !next.is_empty() {
            depth += 1;
        }
        frontier = next;
    }

    debug!(user = %user, roles = resolved.len(), depth, "Resolved user roles");
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryPermissionStore, PermissionStore, TenantDataset};
    use crate::types::TenantId;

    fn user() -> UserId {
        UserId::parse("u1").unwrap()
    }

    async fn resolve(dataset: TenantDataset) -> Vec<String> {
        let tenant = TenantId::parse("t1").unwrap();
        let store = InMemoryPermissionStore::new();
        store.put_tenant(tenant.clone(), dataset).await;
        let mut tx = store.begin(&tenant).await.unwrap();
        resolve_user_roles(tx.as_mut(), &user())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect()
    }

    #[tokio::test]
    async fn test_direct_then_children() {
        let dataset = TenantDataset::new()
            .with_role(Role::new("1", "sales_person"))
            .with_role(Role::new("2", "sales_auditor"))
            .inherit("1", "2")
            .assign(&user(), "1");

        assert_eq!(resolve(dataset).await, vec!["sales_person", "sales_auditor"]);
    }

    #[tokio::test]
    async fn test_no_direct_roles_ignores_orphan_edges() {
        let dataset = TenantDataset::new()
            .with_role(Role::new("1", "parent"))
            .with_role(Role::new("2", "child"))
            .inherit("1", "2");

        assert!(resolve(dataset).await.is_empty());
    }

    #[tokio::test]
    async fn test_level_order_sorted_within_level() {
        let dataset = TenantDataset::new()
            .with_role(Role::new("m", "manager"))
            .with_role(Role::new("a", "assistant"))
            .with_role(Role::new("z", "zoo_keeper"))
            .with_role(Role::new("b", "bookkeeper"))
            .with_role(Role::new("c", "clerk"))
            .inherit("m", "z")
            .inherit("m", "b")
            .inherit("b", "c")
            .assign(&user(), "m")
            .assign(&user(), "a");

        assert_eq!(
            resolve(dataset).await,
            vec!["assistant", "manager", "bookkeeper", "zoo_keeper", "clerk"]
        );
    }

    #[tokio::test]
    async fn test_diamond_reports_role_once() {
        let dataset = TenantDataset::new()
            .with_role(Role::new("top", "top"))
            .with_role(Role::new("l", "left"))
            .with_role(Role::new("r", "right"))
            .with_role(Role::new("base", "base"))
            .inherit("top", "l")
            .inherit("top", "r")
            .inherit("l", "base")
            .inherit("r", "base")
            .assign(&user(), "top");

        assert_eq!(resolve(dataset).await, vec!["top", "left", "right", "base"]);
    }

    #[tokio::test]
    async fn test_cycle_terminates() {
        let dataset = TenantDataset::new()
            .with_role(Role::new("a", "alpha"))
            .with_role(Role::new("b", "beta"))
            .with_role(Role::new("c", "gamma"))
            .inherit("a", "b")
            .inherit("b", "c")
            .inherit("c", "a")
            .assign(&user(), "a");

        assert_eq!(resolve(dataset).await, vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn test_self_edge_terminates() {
        let dataset = TenantDataset::new()
            .with_role(Role::new("a", "alpha"))
            .inherit("a", "a")
            .assign(&user(), "a");

        assert_eq!(resolve(dataset).await, vec!["alpha"]);
    }
}
