//! In-memory role store
//!
//! A transaction reads from a snapshot of the committed state taken when it
//! began, so readers never wait on writers. The first write takes the
//! store's writer lock, refreshes the snapshot and works on a private copy
//! from then on. Commit publishes the copy; rollback (or drop) throws it
//! away and releases the lock. Every closure primitive computes its result
//! set from the state as it was before the statement and applies it
//! afterwards, the way a single SQL statement would.

use super::{GraphTransaction, RoleSet, RoleStore};
use crate::error::Result;
use crate::types::{AncestorEntry, ResourceKind, ResourceRef, Role, RoleId, RoleIdentity, UserId};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

#[derive(Debug, Clone, Default)]
struct GraphState {
    last_id: i64,
    roles: BTreeMap<RoleId, Role>,
    identities: HashMap<RoleIdentity, RoleId>,
    /// (child, parent)
    parents: BTreeSet<(RoleId, RoleId)>,
    /// (parent, child)
    children: BTreeSet<(RoleId, RoleId)>,
    /// (role, user)
    members: BTreeSet<(RoleId, UserId)>,
    /// (user, role)
    memberships: BTreeSet<(UserId, RoleId)>,
    /// (descendent, ancestor)
    ancestors: BTreeMap<(RoleId, RoleId), AncestorEntry>,
    /// (ancestor, descendent)
    descendents: BTreeSet<(RoleId, RoleId)>,
}

fn related(set: &BTreeSet<(RoleId, RoleId)>, key: RoleId) -> impl Iterator<Item = RoleId> + '_ {
    set.range((key, RoleId::MIN)..=(key, RoleId::MAX)).map(|(_, other)| *other)
}

impl GraphState {
    fn parents(&self, id: RoleId) -> impl Iterator<Item = RoleId> + '_ {
        related(&self.parents, id)
    }

    fn children(&self, id: RoleId) -> impl Iterator<Item = RoleId> + '_ {
        related(&self.children, id)
    }

    fn ancestors(&self, id: RoleId) -> impl Iterator<Item = RoleId> + '_ {
        self.ancestors
            .range((id, RoleId::MIN)..=(id, RoleId::MAX))
            .map(|((_, ancestor), _)| *ancestor)
    }

    fn descendents(&self, id: RoleId) -> impl Iterator<Item = RoleId> + '_ {
        related(&self.descendents, id)
    }

    fn roles_of_user(&self, user: UserId) -> impl Iterator<Item = RoleId> + '_ {
        self.memberships
            .range((user, RoleId::MIN)..=(user, RoleId::MAX))
            .map(|(_, role)| *role)
    }

    fn has_entry(&self, descendent: RoleId, ancestor: RoleId) -> bool {
        self.ancestors.contains_key(&(descendent, ancestor))
    }

    /// Closure rows whose ancestor is a role the user directly belongs to
    fn entries_held_by(&self, user: UserId) -> impl Iterator<Item = &AncestorEntry> + '_ {
        self.roles_of_user(user).flat_map(move |held| {
            self.descendents(held)
                .filter_map(move |d| self.ancestors.get(&(d, held)))
        })
    }

    fn insert_entry(&mut self, entry: AncestorEntry) {
        self.descendents.insert((entry.ancestor, entry.descendent));
        self.ancestors.insert((entry.descendent, entry.ancestor), entry);
    }

    fn remove_entry(&mut self, descendent: RoleId, ancestor: RoleId) -> bool {
        self.descendents.remove(&(ancestor, descendent));
        self.ancestors.remove(&(descendent, ancestor)).is_some()
    }
}

/// In-memory role store
#[derive(Debug, Clone, Default)]
pub struct InMemoryRoleStore {
    committed: Arc<RwLock<Arc<GraphState>>>,
    writer: Arc<Mutex<()>>,
}

impl InMemoryRoleStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    async fn snapshot(&self) -> Arc<GraphState> {
        self.committed.read().await.clone()
    }
}

#[async_trait]
impl RoleStore for InMemoryRoleStore {
    async fn begin(&self) -> Result<Box<dyn GraphTransaction>> {
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            snapshot: self.snapshot().await,
            working: None,
            writer: None,
        }))
    }
}

/// Transaction over [`InMemoryRoleStore`]
pub struct MemoryTransaction {
    store: InMemoryRoleStore,
    snapshot: Arc<GraphState>,
    working: Option<GraphState>,
    writer: Option<OwnedMutexGuard<()>>,
}

impl MemoryTransaction {
    fn state(&self) -> &GraphState {
        match &self.working {
            Some(working) => working,
            None => self.snapshot.as_ref(),
        }
    }

    /// Take the writer lock before the first write. Reads made so far may
    /// predate commits that landed in between, so the snapshot is refreshed.
    async fn lock_writer(&mut self) {
        if self.writer.is_some() {
            return;
        }
        let guard = self.store.writer.clone().lock_owned().await;
        self.snapshot = self.store.snapshot().await;
        self.writer = Some(guard);
    }

    /// Only valid once [`lock_writer`](Self::lock_writer) has run
    fn state_mut(&mut self) -> &mut GraphState {
        let committed = &self.snapshot;
        self.working.get_or_insert_with(|| GraphState::clone(committed))
    }
}

#[async_trait]
impl GraphTransaction for MemoryTransaction {
    async fn get_or_create_role(&mut self, identity: &RoleIdentity) -> Result<(RoleId, bool)> {
        self.lock_writer().await;
        if let Some(id) = self.state().identities.get(identity) {
            return Ok((*id, false));
        }

        let state = self.state_mut();
        state.last_id += 1;
        let id = RoleId(state.last_id);
        state.roles.insert(id, Role::from_identity(id, identity));
        state.identities.insert(identity.clone(), id);
        Ok((id, true))
    }

    async fn find_role(&mut self, identity: &RoleIdentity) -> Result<Option<RoleId>> {
        Ok(self.state().identities.get(identity).copied())
    }

    async fn get_role(&mut self, id: RoleId) -> Result<Option<Role>> {
        Ok(self.state().roles.get(&id).cloned())
    }

    async fn all_role_ids(&mut self) -> Result<RoleSet> {
        Ok(self.state().roles.keys().copied().collect())
    }

    async fn roles_for_resource(&mut self, resource: ResourceRef) -> Result<RoleSet> {
        Ok(self
            .state()
            .roles
            .values()
            .filter(|role| role.resource == Some(resource))
            .map(|role| role.id)
            .collect())
    }

    async fn insert_parent_edge(&mut self, child: RoleId, parent: RoleId) -> Result<bool> {
        self.lock_writer().await;
        if self.state().parents.contains(&(child, parent)) {
            return Ok(false);
        }
        let state = self.state_mut();
        state.parents.insert((child, parent));
        state.children.insert((parent, child));
        Ok(true)
    }

    async fn delete_parent_edge(&mut self, child: RoleId, parent: RoleId) -> Result<bool> {
        self.lock_writer().await;
        if !self.state().parents.contains(&(child, parent)) {
            return Ok(false);
        }
        let state = self.state_mut();
        state.parents.remove(&(child, parent));
        state.children.remove(&(parent, child));
        Ok(true)
    }

    async fn parents_of(&mut self, id: RoleId) -> Result<RoleSet> {
        Ok(self.state().parents(id).collect())
    }

    async fn insert_member(&mut self, role: RoleId, user: UserId) -> Result<bool> {
        self.lock_writer().await;
        if self.state().members.contains(&(role, user)) {
            return Ok(false);
        }
        let state = self.state_mut();
        state.members.insert((role, user));
        state.memberships.insert((user, role));
        Ok(true)
    }

    async fn delete_member(&mut self, role: RoleId, user: UserId) -> Result<bool> {
        self.lock_writer().await;
        if !self.state().members.contains(&(role, user)) {
            return Ok(false);
        }
        let state = self.state_mut();
        state.members.remove(&(role, user));
        state.memberships.remove(&(user, role));
        Ok(true)
    }

    async fn members_of(&mut self, role: RoleId) -> Result<BTreeSet<UserId>> {
        Ok(self
            .state()
            .members
            .range((role, UserId::MIN)..=(role, UserId::MAX))
            .map(|(_, user)| *user)
            .collect())
    }

    async fn delete_roles(&mut self, ids: &RoleSet) -> Result<RoleSet> {
        self.lock_writer().await;
        let orphans: RoleSet = {
            let state = self.state();
            ids.iter()
                .flat_map(move |id| state.children(*id))
                .filter(|child| !ids.contains(child))
                .collect()
        };

        let state = self.state_mut();

        for id in ids {
            let parents: Vec<RoleId> = state.parents(*id).collect();
            for parent in parents {
                state.parents.remove(&(*id, parent));
                state.children.remove(&(parent, *id));
            }
            let children: Vec<RoleId> = state.children(*id).collect();
            for child in children {
                state.parents.remove(&(child, *id));
                state.children.remove(&(*id, child));
            }

            let users: Vec<UserId> = state
                .members
                .range((*id, UserId::MIN)..=(*id, UserId::MAX))
                .map(|(_, user)| *user)
                .collect();
            for user in users {
                state.members.remove(&(*id, user));
                state.memberships.remove(&(user, *id));
            }

            let ancestors: Vec<RoleId> = state.ancestors(*id).collect();
            for ancestor in ancestors {
                state.remove_entry(*id, ancestor);
            }
            let descendents: Vec<RoleId> = state.descendents(*id).collect();
            for descendent in descendents {
                state.remove_entry(descendent, *id);
            }

            if let Some(role) = state.roles.remove(id) {
                state.identities.remove(&role.identity());
            }
        }

        Ok(orphans)
    }

    async fn parent_edges(&mut self) -> Result<Vec<(RoleId, RoleId)>> {
        Ok(self.state().parents.iter().copied().collect())
    }

    async fn lock_closure(&mut self) -> Result<()> {
        self.lock_writer().await;
        Ok(())
    }

    async fn delete_unreachable_ancestors(&mut self, removals: &RoleSet) -> Result<u64> {
        self.lock_writer().await;
        let state = self.state();
        let doomed: Vec<(RoleId, RoleId)> = removals
            .iter()
            .flat_map(move |&descendent| {
                state
                    .ancestors(descendent)
                    .filter(move |&ancestor| ancestor != descendent)
                    .filter(move |&ancestor| {
                        !state
                            .parents(descendent)
                            .any(|parent| state.has_entry(parent, ancestor))
                    })
                    .map(move |ancestor| (descendent, ancestor))
            })
            .collect();

        if doomed.is_empty() {
            return Ok(0);
        }

        let state = self.state_mut();
        let deleted = doomed
            .into_iter()
            .filter(|(descendent, ancestor)| state.remove_entry(*descendent, *ancestor))
            .count();
        Ok(deleted as u64)
    }

    async fn insert_reachable_ancestors(&mut self, additions: &RoleSet) -> Result<u64> {
        self.lock_writer().await;
        let state = self.state();
        let mut fresh: Vec<AncestorEntry> = Vec::new();

        for id in additions {
            let Some(role) = state.roles.get(id) else {
                continue;
            };
            let reachable: RoleSet = std::iter::once(role.id)
                .chain(state.parents(role.id).flat_map(move |parent| state.ancestors(parent)))
                .collect();

            fresh.extend(
                reachable
                    .into_iter()
                    .filter(|ancestor| !state.has_entry(role.id, *ancestor))
                    .map(|ancestor| AncestorEntry::new(role, ancestor)),
            );
        }

        if fresh.is_empty() {
            return Ok(0);
        }

        let inserted = fresh.len() as u64;
        let state = self.state_mut();
        for entry in fresh {
            state.insert_entry(entry);
        }
        Ok(inserted)
    }

    async fn children_of(&mut self, ids: &RoleSet) -> Result<RoleSet> {
        let state = self.state();
        Ok(ids.iter().flat_map(move |id| state.children(*id)).collect())
    }

    async fn self_reaching_roles(&mut self, ids: &RoleSet) -> Result<RoleSet> {
        let state = self.state();
        Ok(ids
            .iter()
            .copied()
            .filter(|&id| state.parents(id).any(|parent| state.has_entry(parent, id)))
            .collect())
    }

    async fn ancestors_of(&mut self, id: RoleId) -> Result<RoleSet> {
        Ok(self.state().ancestors(id).collect())
    }

    async fn descendents_of(&mut self, id: RoleId) -> Result<RoleSet> {
        Ok(self.state().descendents(id).collect())
    }

    async fn ancestor_entries(&mut self) -> Result<Vec<AncestorEntry>> {
        Ok(self.state().ancestors.values().cloned().collect())
    }

    async fn is_member_of_ancestor(&mut self, user: UserId, role: RoleId) -> Result<bool> {
        let state = self.state();
        Ok(state
            .ancestors(role)
            .any(|ancestor| state.members.contains(&(ancestor, user))))
    }

    async fn visible_role_ids(&mut self, user: UserId) -> Result<RoleSet> {
        let state = self.state();
        let reachable: RoleSet = state
            .roles_of_user(user)
            .flat_map(move |held| state.descendents(held))
            .collect();

        Ok(reachable
            .into_iter()
            .flat_map(move |descendent| state.ancestors(descendent))
            .collect())
    }

    async fn role_fields_held(&mut self, user: UserId, resource: ResourceRef) -> Result<BTreeSet<String>> {
        let content_type_id = resource.kind.content_type_id();
        Ok(self
            .state()
            .entries_held_by(user)
            .filter(|entry| entry.content_type_id == content_type_id && entry.object_id == resource.id)
            .map(|entry| entry.role_field.clone())
            .collect())
    }

    async fn role_fields_defined(&mut self, resource: ResourceRef) -> Result<BTreeSet<String>> {
        Ok(self
            .state()
            .roles
            .values()
            .filter(|role| role.resource == Some(resource))
            .map(|role| role.role_field.clone())
            .collect())
    }

    async fn accessible_object_ids(
        &mut self,
        user: UserId,
        kind: ResourceKind,
        role_field: &str,
    ) -> Result<BTreeSet<i64>> {
        let content_type_id = kind.content_type_id();
        Ok(self
            .state()
            .entries_held_by(user)
            .filter(|entry| entry.content_type_id == content_type_id && entry.role_field == role_field)
            .map(|entry| entry.object_id)
            .collect())
    }

    async fn object_ids_with_role(&mut self, kind: ResourceKind, role_field: &str) -> Result<BTreeSet<i64>> {
        Ok(self
            .state()
            .roles
            .values()
            .filter(|role| role.role_field == role_field)
            .filter_map(|role| role.resource)
            .filter(|resource| resource.kind == kind)
            .map(|resource| resource.id)
            .collect())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction {
            store,
            working,
            writer,
            ..
        } = *self;
        if let Some(state) = working {
            *store.committed.write().await = Arc::new(state);
        }
        drop(writer);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for MemoryTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransaction")
            .field("dirty", &self.working.is_some())
            .field("writing", &self.writer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team_role(id: i64, field: &str) -> RoleIdentity {
        RoleIdentity::object(ResourceRef::team(id), field)
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = InMemoryRoleStore::new();
        let mut tx = store.begin().await.unwrap();

        let (first, created) = tx.get_or_create_role(&team_role(1, "member_role")).await.unwrap();
        assert!(created);
        let (second, created) = tx.get_or_create_role(&team_role(1, "member_role")).await.unwrap();
        assert!(!created);
        assert_eq!(first, second);

        let (other, _) = tx.get_or_create_role(&team_role(1, "admin_role")).await.unwrap();
        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = InMemoryRoleStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.get_or_create_role(&RoleIdentity::singleton("system_administrator"))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.all_role_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let store = InMemoryRoleStore::new();

        let mut tx = store.begin().await.unwrap();
        let (id, _) = tx
            .get_or_create_role(&RoleIdentity::singleton("system_auditor"))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let role = tx.get_role(id).await.unwrap().unwrap();
        assert_eq!(role.singleton_name.as_deref(), Some("system_auditor"));
    }

    #[tokio::test]
    async fn test_readers_do_not_wait_for_open_writer() {
        let store = InMemoryRoleStore::new();
        let mut writer = store.begin().await.unwrap();
        let (id, _) = writer.get_or_create_role(&team_role(1, "member_role")).await.unwrap();

        let mut reader = store.begin().await.unwrap();
        assert!(reader.get_role(id).await.unwrap().is_none());

        writer.commit().await.unwrap();

        // The reader keeps its snapshot; a new transaction sees the commit
        assert!(reader.get_role(id).await.unwrap().is_none());
        let mut fresh = store.begin().await.unwrap();
        assert!(fresh.get_role(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_second_writer_waits_and_sees_first_commit() {
        let store = InMemoryRoleStore::new();
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        let (id, _) = first.get_or_create_role(&team_role(1, "member_role")).await.unwrap();

        let waiting = tokio::spawn(async move {
            let result = second.get_or_create_role(&team_role(1, "member_role")).await;
            second.rollback().await.unwrap();
            result
        });
        tokio::task::yield_now().await;
        assert!(!waiting.is_finished());

        first.commit().await.unwrap();
        let (again, created) = waiting.await.unwrap().unwrap();
        assert_eq!(again, id);
        assert!(!created);
    }

    #[tokio::test]
    async fn test_set_primitives_follow_statement_semantics() {
        let store = InMemoryRoleStore::new();
        let mut tx = store.begin().await.unwrap();

        let (top, _) = tx.get_or_create_role(&team_role(1, "admin_role")).await.unwrap();
        let (mid, _) = tx.get_or_create_role(&team_role(1, "member_role")).await.unwrap();
        let (low, _) = tx.get_or_create_role(&team_role(1, "read_role")).await.unwrap();
        tx.insert_parent_edge(mid, top).await.unwrap();
        tx.insert_parent_edge(low, mid).await.unwrap();

        // One statement over all three only sees existing rows, so `low`
        // picks up nothing from `mid` yet.
        let all: RoleSet = [top, mid, low].into_iter().collect();
        assert_eq!(tx.insert_reachable_ancestors(&all).await.unwrap(), 3);
        assert_eq!(tx.insert_reachable_ancestors(&all).await.unwrap(), 2);
        assert_eq!(tx.insert_reachable_ancestors(&all).await.unwrap(), 1);
        assert_eq!(tx.insert_reachable_ancestors(&all).await.unwrap(), 0);

        assert_eq!(tx.ancestors_of(low).await.unwrap(), all);
        assert_eq!(tx.children_of(&[top].into_iter().collect()).await.unwrap(), [mid].into_iter().collect());
    }

    #[tokio::test]
    async fn test_delete_roles_returns_orphans() {
        let store = InMemoryRoleStore::new();
        let mut tx = store.begin().await.unwrap();

        let (parent, _) = tx.get_or_create_role(&team_role(1, "admin_role")).await.unwrap();
        let (child, _) = tx.get_or_create_role(&team_role(2, "member_role")).await.unwrap();
        tx.insert_parent_edge(child, parent).await.unwrap();
        tx.insert_member(parent, UserId(1)).await.unwrap();

        let orphans = tx.delete_roles(&[parent].into_iter().collect()).await.unwrap();
        assert_eq!(orphans, [child].into_iter().collect());
        assert!(tx.get_role(parent).await.unwrap().is_none());
        assert!(tx.parents_of(child).await.unwrap().is_empty());
        assert!(tx.find_role(&team_role(1, "admin_role")).await.unwrap().is_none());
    }
}
