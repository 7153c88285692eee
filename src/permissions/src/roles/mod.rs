//! Role hierarchy resolution and the tenant role graph
//!
//! - [`resolve_user_roles`]: a user's direct roles plus every inherited role,
//!   breadth-first, each role reported once
//! - [`build_role_map`]: every tenant role with its own permissions and its
//!   immediate children, for consumers that walk inheritance themselves

pub mod graph;
pub mod resolver;

pub use graph::{build_role_map, RoleNode, TenantRoleMap};
pub use resolver::resolve_user_roles;
