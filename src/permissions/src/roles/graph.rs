//! Tenant role graph: one node per role with its own permissions and
//! immediate children

use crate::error::Result;
use crate::store::StoreTx;
use crate::types::{ResourceFilter, Role, RoleId, TenantPermission};
use std::collections::HashMap;
use tracing::{debug, warn};

/// One tenant role with its direct permissions and immediate children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleNode {
    pub role: Role,

    /// Direct permissions, ordered by name
    pub permissions: Vec<TenantPermission>,

    /// Immediate child roles (not the transitive closure), ordered by name
    pub inherits: Vec<Role>,
}

/// Tenant-wide role graph keyed by role identifier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantRoleMap {
    nodes: HashMap<RoleId, RoleNode>,
}

impl TenantRoleMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: RoleNode) {
        self.nodes.insert(node.role.id.clone(), node);
    }

    pub fn get(&self, id: &str) -> Option<&RoleNode> {
        self.nodes.get(id)
    }

    /// Look a node up by role name
    pub fn by_name(&self, name: &str) -> Option<&RoleNode> {
        self.nodes.values().find(|n| n.role.name == name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &RoleNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// First inheritance cycle found, as role ids from the repeated role back to itself
    pub fn find_cycle(&self) -> Option<Vec<RoleId>> {
        let mut state: HashMap<&str, u8> = HashMap::with_capacity(self.nodes.len());
        let mut path: Vec<&str> = Vec::new();

        let mut ids: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        ids.sort_unstable();

        for id in ids {
            if let Some(cycle) = self.dfs_cycle(id, &mut state, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    /// Three-colour DFS: 1 = on the current path, 2 = finished
    fn dfs_cycle<'a>(
        &'a self,
        id: &'a str,
        state: &mut HashMap<&'a str, u8>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<RoleId>> {
        match state.get(id) {
            Some(1) => {
                let start = path.iter().position(|n| *n == id)?;
                let cycle = path[start..]
                    .iter()
                    .chain(std::iter::once(&id))
                    .map(|n| n.to_string())
                    .collect();
                return Some(cycle);
            }
            Some(2) => return None,
            _ => {}
        }

        state.insert(id, 1);
        path.push(id);

        if let Some(node) = self.nodes.get(id) {
            for child in &node.inherits {
                if let Some(cycle) = self.dfs_cycle(&child.id, state, path) {
                    return Some(cycle);
                }
            }
        }

        state.insert(id, 2);
        path.pop();
        None
    }
}

/// Build the tenant role graph.
///
/// Every tenant role gets exactly one node, with empty lists when it has no
/// matching permissions or no children. The filter narrows permissions only;
/// roles and edges are always complete. Cycles are reported but the graph is
/// still returned.
pub async fn build_role_map(
    tx: &mut dyn StoreTx,
    filter: &ResourceFilter,
) -> Result<TenantRoleMap> {
    let roles = tx
        .tenant_roles()
        .await
        .map_err(|e| e.context("get tenant roles"))?;

    let mut map = TenantRoleMap::new();
    for role in roles {
        let ids = [role.id.clone()];
        let permissions = tx
            .role_permissions(&ids, filter)
            .await
            .map_err(|e| e.context("get role permissions"))?;
        let inherits = tx
            .child_roles(&ids)
            .await
            .map_err(|e| e.context("get child roles"))?;

        map.insert(RoleNode {
            role,
            permissions,
            inherits,
        });
    }

    if let Some(cycle) = map.find_cycle() {
        let names: Vec<&str> = cycle
            .iter()
            .map(|id| map.get(id).map_or(id.as_str(), |n| n.role.name.as_str()))
            .collect();
        warn!(cycle = %names.join(" -> "), "Role inheritance cycle detected");
    }

    debug!(roles = map.len(), "Built tenant role map");
    Ok(map)
}
