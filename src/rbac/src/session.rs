//! One logical operation against the role graph
//!
//! A [`GraphSession`] owns one store transaction. Every mutation made
//! through it either rebuilds the closure before returning or, inside a
//! batch, queues the affected roles for the batch's single rebuild. Nothing
//! becomes visible to other sessions until [`GraphSession::commit`].

use crate::batch::{BatchGuard, PendingChanges};
use crate::closure::{expected_closure, ClosureRebuilder, ClosureReport, RebuildStats};
use crate::error::{RbacError, Result};
use crate::evaluator::AccessEvaluator;
use crate::metrics::MetricsCollector;
use crate::singleton::SingletonRole;
use crate::store::{GraphTransaction, RoleSet};
use crate::types::{Accessor, ResourceKind, ResourceRef, Role, RoleId, RoleIdentity, UserId};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Transaction-scoped handle for graph mutations and access queries
pub struct GraphSession {
    tx: Box<dyn GraphTransaction>,
    rebuilder: ClosureRebuilder,
    evaluator: AccessEvaluator,
    metrics: Option<MetricsCollector>,
    pending: PendingChanges,
    poisoned: Option<String>,
}

impl GraphSession {
    pub fn new(tx: Box<dyn GraphTransaction>, rebuilder: ClosureRebuilder, evaluator: AccessEvaluator) -> Self {
        Self {
            tx,
            rebuilder,
            evaluator,
            metrics: None,
            pending: PendingChanges::default(),
            poisoned: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    // ========================================================================
    // Role graph mutations
    // ========================================================================

    /// Get-or-create a role. A newly created role gets its self entry from
    /// the rebuild path like any other change.
    pub async fn create_role(&mut self, identity: RoleIdentity) -> Result<RoleId> {
        self.ensure_usable()?;
        validate_identity(&identity)?;

        let (id, created) = self.tx.get_or_create_role(&identity).await?;
        if created {
            debug!("Created {} for {}", id, identity);
            self.notify(RoleSet::from([id]), RoleSet::new()).await?;
        }
        Ok(id)
    }

    /// Get-or-create a global role by name
    pub async fn singleton(&mut self, name: &str) -> Result<RoleId> {
        self.create_role(RoleIdentity::singleton(name)).await
    }

    pub async fn singleton_role(&mut self, role: SingletonRole) -> Result<RoleId> {
        self.create_role(role.identity()).await
    }

    /// Make `parent` a parent of `child`. Returns false if the edge existed.
    pub async fn add_parent(&mut self, child: RoleId, parent: RoleId) -> Result<bool> {
        self.ensure_usable()?;
        self.require_role(child).await?;
        self.require_role(parent).await?;

        let inserted = self.tx.insert_parent_edge(child, parent).await?;
        if inserted {
            self.notify(RoleSet::from([child]), RoleSet::new()).await?;
        }
        Ok(inserted)
    }

    /// Drop the edge from `child` to `parent`. Returns false if there was none.
    pub async fn remove_parent(&mut self, child: RoleId, parent: RoleId) -> Result<bool> {
        self.ensure_usable()?;
        self.require_role(child).await?;
        self.require_role(parent).await?;

        let deleted = self.tx.delete_parent_edge(child, parent).await?;
        if deleted {
            self.notify(RoleSet::new(), RoleSet::from([child])).await?;
        }
        Ok(deleted)
    }

    /// Memberships are not part of the graph and never rebuild
    pub async fn add_member(&mut self, role: RoleId, user: UserId) -> Result<bool> {
        self.ensure_usable()?;
        self.require_role(role).await?;
        self.tx.insert_member(role, user).await
    }

    pub async fn remove_member(&mut self, role: RoleId, user: UserId) -> Result<bool> {
        self.ensure_usable()?;
        self.require_role(role).await?;
        self.tx.delete_member(role, user).await
    }

    /// Delete a role with its edges, memberships and closure rows, then
    /// rebuild its former children.
    pub async fn delete_role(&mut self, id: RoleId) -> Result<()> {
        self.ensure_usable()?;
        self.require_role(id).await?;

        let orphans = self.tx.delete_roles(&RoleSet::from([id])).await?;
        debug!("Deleted {}, {} children to rebuild", id, orphans.len());
        self.notify(RoleSet::new(), orphans).await
    }

    /// Delete every role bound to `resource`. Returns how many were deleted.
    pub async fn delete_resource_roles(&mut self, resource: ResourceRef) -> Result<usize> {
        self.ensure_usable()?;

        let ids = self.tx.roles_for_resource(resource).await?;
        if ids.is_empty() {
            return Err(RbacError::ResourceNotFound(resource));
        }

        let orphans = self.tx.delete_roles(&ids).await?;
        debug!("Deleted {} roles of {}, {} children to rebuild", ids.len(), resource, orphans.len());
        self.notify(RoleSet::new(), orphans).await?;
        Ok(ids.len())
    }

    // ========================================================================
    // Batching and rebuilds
    // ========================================================================

    /// Open a batch scope. Nested calls through the guard deepen the same
    /// scope; only the outermost [`BatchGuard::finish`] rebuilds.
    pub fn batch(&mut self) -> BatchGuard<'_> {
        BatchGuard::new(self)
    }

    pub fn pending(&self) -> &PendingChanges {
        &self.pending
    }

    pub fn is_batching(&self) -> bool {
        self.pending.is_batching()
    }

    /// Rebuild now, regardless of any open batch
    pub async fn rebuild(&mut self, additions: RoleSet, removals: RoleSet) -> Result<RebuildStats> {
        self.ensure_usable()?;
        self.run_rebuild(additions, removals).await
    }

    /// Rebuild the closure of every role
    pub async fn rebuild_all(&mut self) -> Result<RebuildStats> {
        self.ensure_usable()?;
        let all = self.tx.all_role_ids().await?;
        info!("Rebuilding closure for all {} roles", all.len());
        self.rebuild(all.clone(), all).await
    }

    /// Compare the closure table with the reachability of the parent edges
    pub async fn verify_closure(&mut self) -> Result<ClosureReport> {
        let roles = self.tx.all_role_ids().await?;
        let edges = self.tx.parent_edges().await?;
        let expected = expected_closure(&roles, &edges);
        let actual: BTreeSet<(RoleId, RoleId)> = self
            .tx
            .ancestor_entries()
            .await?
            .into_iter()
            .map(|entry| (entry.descendent, entry.ancestor))
            .collect();

        let report = ClosureReport::compare(&expected, &actual);
        if !report.is_consistent() {
            warn!(
                "Closure inconsistent: {} missing, {} extra",
                report.missing.len(),
                report.extra.len()
            );
        }
        Ok(report)
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub async fn role(&mut self, id: RoleId) -> Result<Option<Role>> {
        self.tx.get_role(id).await
    }

    pub async fn find_role(&mut self, identity: &RoleIdentity) -> Result<Option<RoleId>> {
        self.tx.find_role(identity).await
    }

    pub async fn roles_for_resource(&mut self, resource: ResourceRef) -> Result<RoleSet> {
        self.tx.roles_for_resource(resource).await
    }

    /// Every role reachable from `id`, itself included
    pub async fn ancestors(&mut self, id: RoleId) -> Result<RoleSet> {
        self.require_role(id).await?;
        self.tx.ancestors_of(id).await
    }

    /// Every role that reaches `id`, itself included
    pub async fn descendents(&mut self, id: RoleId) -> Result<RoleSet> {
        self.require_role(id).await?;
        self.tx.descendents_of(id).await
    }

    pub async fn parents(&mut self, id: RoleId) -> Result<RoleSet> {
        self.require_role(id).await?;
        self.tx.parents_of(id).await
    }

    pub async fn children(&mut self, id: RoleId) -> Result<RoleSet> {
        self.require_role(id).await?;
        self.tx.children_of(&RoleSet::from([id])).await
    }

    pub async fn members(&mut self, id: RoleId) -> Result<BTreeSet<UserId>> {
        self.require_role(id).await?;
        self.tx.members_of(id).await
    }

    // ========================================================================
    // Access evaluation
    // ========================================================================

    pub async fn is_member(&mut self, accessor: &Accessor, role: RoleId) -> Result<bool> {
        self.evaluator.is_member(self.tx.as_mut(), accessor, role).await
    }

    pub async fn visible_roles(&mut self, accessor: &Accessor) -> Result<RoleSet> {
        self.evaluator.visible_roles(self.tx.as_mut(), accessor).await
    }

    pub async fn roles_on_resource(&mut self, accessor: &Accessor, resource: ResourceRef) -> Result<BTreeSet<String>> {
        self.evaluator.roles_on_resource(self.tx.as_mut(), accessor, resource).await
    }

    pub async fn accessible_objects(
        &mut self,
        accessor: &Accessor,
        kind: ResourceKind,
        role_field: &str,
    ) -> Result<BTreeSet<i64>> {
        self.evaluator
            .accessible_objects(self.tx.as_mut(), accessor, kind, role_field)
            .await
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// Publish every change. A poisoned session is rolled back instead.
    pub async fn commit(self) -> Result<()> {
        if let Some(reason) = self.poisoned {
            self.tx.rollback().await?;
            return Err(RbacError::SessionPoisoned(reason));
        }
        self.tx.commit().await
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await
    }

    // ========================================================================
    // Internals
    // ========================================================================

    pub(crate) fn pending_mut(&mut self) -> &mut PendingChanges {
        &mut self.pending
    }

    pub(crate) fn poison(&mut self, reason: impl Into<String>) {
        if self.poisoned.is_none() {
            self.poisoned = Some(reason.into());
        }
    }

    pub(crate) async fn flush_batch(&mut self, additions: RoleSet, removals: RoleSet) -> Result<RebuildStats> {
        self.ensure_usable()?;

        let stats = self.run_rebuild(additions, removals).await?;
        info!(
            "Batch flushed: {} sweeps, +{} -{} closure rows",
            stats.sweeps, stats.inserted, stats.deleted
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_batch_flush().await;
        }
        Ok(stats)
    }

    async fn notify(&mut self, additions: RoleSet, removals: RoleSet) -> Result<()> {
        if self.pending.is_batching() {
            self.pending.queue(additions, removals);
            return Ok(());
        }
        self.run_rebuild(additions, removals).await.map(|_| ())
    }

    async fn run_rebuild(&mut self, additions: RoleSet, removals: RoleSet) -> Result<RebuildStats> {
        match self.rebuilder.rebuild(self.tx.as_mut(), additions, removals).await {
            Ok(stats) => Ok(stats),
            Err(e) => {
                self.poison(e.to_string());
                Err(e)
            }
        }
    }

    async fn require_role(&mut self, id: RoleId) -> Result<Role> {
        self.tx.get_role(id).await?.ok_or(RbacError::RoleNotFound(id))
    }

    fn ensure_usable(&self) -> Result<()> {
        match &self.poisoned {
            Some(reason) => Err(RbacError::SessionPoisoned(reason.clone())),
            None => Ok(()),
        }
    }
}

fn validate_identity(identity: &RoleIdentity) -> Result<()> {
    match identity {
        RoleIdentity::Singleton { name } if name.trim().is_empty() => Err(RbacError::InvalidRoleIdentity(
            "singleton name must not be empty".to_string(),
        )),
        RoleIdentity::Object { role_field, .. } if role_field.trim().is_empty() => Err(
            RbacError::InvalidRoleIdentity("role_field must not be empty".to_string()),
        ),
        RoleIdentity::Object { resource, .. } if resource.id <= 0 => Err(RbacError::InvalidRoleIdentity(
            format!("invalid object id for {}", resource),
        )),
        _ => Ok(()),
    }
}
