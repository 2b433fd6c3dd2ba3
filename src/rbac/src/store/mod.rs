//! Role graph storage
//!
//! The store owns three relations: roles with their parent edges and
//! members (the source of truth), and the ancestor closure table derived
//! from them. Everything happens inside a [`GraphTransaction`]; the closure
//! primitives are whole-set operations so that a rebuild costs one
//! statement per sweep rather than one per edge.

use crate::error::Result;
use crate::types::{AncestorEntry, ResourceKind, ResourceRef, Role, RoleId, RoleIdentity, UserId};
use async_trait::async_trait;
use std::collections::BTreeSet;

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryRoleStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresRoleStore;

/// Set of role ids passed to and returned from set-at-a-time operations
pub type RoleSet = BTreeSet<RoleId>;

/// Role store trait
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Open a transaction. Nothing done through it is visible to other
    /// transactions until [`GraphTransaction::commit`].
    async fn begin(&self) -> Result<Box<dyn GraphTransaction>>;
}

/// One unit of work against the role graph and its closure
#[async_trait]
pub trait GraphTransaction: Send {
    // ------------------------------------------------------------------
    // Role graph
    // ------------------------------------------------------------------

    /// Get-or-create a role. Returns the id and whether a row was created.
    async fn get_or_create_role(&mut self, identity: &RoleIdentity) -> Result<(RoleId, bool)>;

    async fn find_role(&mut self, identity: &RoleIdentity) -> Result<Option<RoleId>>;

    async fn get_role(&mut self, id: RoleId) -> Result<Option<Role>>;

    async fn all_role_ids(&mut self) -> Result<RoleSet>;

    /// Roles bound to one content object
    async fn roles_for_resource(&mut self, resource: ResourceRef) -> Result<RoleSet>;

    /// Returns false if the edge already existed
    async fn insert_parent_edge(&mut self, child: RoleId, parent: RoleId) -> Result<bool>;

    /// Returns false if there was no such edge
    async fn delete_parent_edge(&mut self, child: RoleId, parent: RoleId) -> Result<bool>;

    async fn parents_of(&mut self, id: RoleId) -> Result<RoleSet>;

    async fn insert_member(&mut self, role: RoleId, user: UserId) -> Result<bool>;

    async fn delete_member(&mut self, role: RoleId, user: UserId) -> Result<bool>;

    async fn members_of(&mut self, role: RoleId) -> Result<BTreeSet<UserId>>;

    /// Delete roles together with their edges, memberships and every
    /// closure row that names them. Returns the surviving former children.
    async fn delete_roles(&mut self, ids: &RoleSet) -> Result<RoleSet>;

    /// All (child, parent) edges
    async fn parent_edges(&mut self) -> Result<Vec<(RoleId, RoleId)>>;

    // ------------------------------------------------------------------
    // Closure maintenance
    // ------------------------------------------------------------------

    /// Serialize against concurrent rebuilds until the transaction ends
    async fn lock_closure(&mut self) -> Result<()>;

    /// Delete every `(d, a)` with `d` in `removals`, `a != d`, for which no
    /// parent `p` of `d` has a `(p, a)` row. Returns the number deleted.
    async fn delete_unreachable_ancestors(&mut self, removals: &RoleSet) -> Result<u64>;

    /// Insert `(d, d)` and `(d, a)` for every `(p, a)` with `p` a parent of
    /// `d`, for `d` in `additions`, skipping rows that exist. Returns the
    /// number inserted.
    async fn insert_reachable_ancestors(&mut self, additions: &RoleSet) -> Result<u64>;

    /// Roles that list any of `ids` as a parent
    async fn children_of(&mut self, ids: &RoleSet) -> Result<RoleSet>;

    /// Roles in `ids` that the closure records as an ancestor of one of
    /// their own parents
    async fn self_reaching_roles(&mut self, ids: &RoleSet) -> Result<RoleSet>;

    // ------------------------------------------------------------------
    // Closure reads
    // ------------------------------------------------------------------

    async fn ancestors_of(&mut self, id: RoleId) -> Result<RoleSet>;

    async fn descendents_of(&mut self, id: RoleId) -> Result<RoleSet>;

    async fn ancestor_entries(&mut self) -> Result<Vec<AncestorEntry>>;

    /// Whether `user` is a direct member of any ancestor of `role`
    async fn is_member_of_ancestor(&mut self, user: UserId, role: RoleId) -> Result<bool>;

    /// Ancestors of every descendent of the roles `user` belongs to
    async fn visible_role_ids(&mut self, user: UserId) -> Result<RoleSet>;

    /// Distinct role fields the user holds on one content object
    async fn role_fields_held(&mut self, user: UserId, resource: ResourceRef) -> Result<BTreeSet<String>>;

    /// Role fields defined on one content object
    async fn role_fields_defined(&mut self, resource: ResourceRef) -> Result<BTreeSet<String>>;

    /// Object ids of `kind` on which `user` holds `role_field`
    async fn accessible_object_ids(
        &mut self,
        user: UserId,
        kind: ResourceKind,
        role_field: &str,
    ) -> Result<BTreeSet<i64>>;

    /// Object ids of `kind` that have a `role_field` role at all
    async fn object_ids_with_role(&mut self, kind: ResourceKind, role_field: &str) -> Result<BTreeSet<i64>>;

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
