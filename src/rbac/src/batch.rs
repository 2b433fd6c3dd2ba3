//! Deferred closure rebuilding
//!
//! A batch is opened on a [`GraphSession`] and lives as a [`BatchGuard`].
//! While any guard is open, mutations queue the roles they touched in
//! [`PendingChanges`] instead of rebuilding. Ending the outermost guard with
//! [`BatchGuard::finish`] runs one rebuild over everything queued.
//!
//! Batch state belongs to the session, so two sessions batching at the same
//! time never share a queue.
//!
//! ```rust,ignore
//! let mut batch = session.batch();
//! let admin = batch.create_role(RoleIdentity::object(org, "admin_role")).await?;
//! let member = batch.create_role(RoleIdentity::object(org, "member_role")).await?;
//! batch.add_parent(member, admin).await?;
//! batch.finish().await?;
//! ```

use crate::closure::RebuildStats;
use crate::error::Result;
use crate::session::GraphSession;
use crate::store::RoleSet;
use std::ops::{Deref, DerefMut};
use tracing::warn;

/// Roles queued for the next rebuild of a batching session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingChanges {
    depth: usize,
    additions: RoleSet,
    removals: RoleSet,
}

impl PendingChanges {
    /// Nesting depth of open batches
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_batching(&self) -> bool {
        self.depth > 0
    }

    pub fn additions(&self) -> &RoleSet {
        &self.additions
    }

    pub fn removals(&self) -> &RoleSet {
        &self.removals
    }

    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }

    pub(crate) fn enter(&mut self) {
        self.depth += 1;
    }

    /// Close one level. Returns the queued sets when the outermost level
    /// closed, leaving the queue empty.
    pub(crate) fn exit(&mut self) -> Option<(RoleSet, RoleSet)> {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            Some((
                std::mem::take(&mut self.additions),
                std::mem::take(&mut self.removals),
            ))
        } else {
            None
        }
    }

    pub(crate) fn queue(&mut self, additions: RoleSet, removals: RoleSet) {
        self.additions.extend(additions);
        self.removals.extend(removals);
    }
}

/// An open batch scope.
///
/// Dereferences to the session, so every session operation is available
/// through the guard, including opening a nested batch. A guard dropped
/// without [`finish`](BatchGuard::finish) discards the queue once the
/// outermost level closes and poisons the session: the closure no longer
/// matches the graph and the session can only be rolled back.
#[must_use = "a batch must be ended with finish()"]
pub struct BatchGuard<'a> {
    session: &'a mut GraphSession,
    finished: bool,
}

impl<'a> BatchGuard<'a> {
    pub(crate) fn new(session: &'a mut GraphSession) -> Self {
        session.pending_mut().enter();
        Self {
            session,
            finished: false,
        }
    }

    /// End this level. Only the outermost level rebuilds; inner levels
    /// return empty stats.
    pub async fn finish(mut self) -> Result<RebuildStats> {
        self.finished = true;
        match self.session.pending_mut().exit() {
            Some((additions, removals)) => self.session.flush_batch(additions, removals).await,
            None => Ok(RebuildStats::default()),
        }
    }
}

impl Deref for BatchGuard<'_> {
    type Target = GraphSession;

    fn deref(&self) -> &GraphSession {
        self.session
    }
}

impl DerefMut for BatchGuard<'_> {
    fn deref_mut(&mut self) -> &mut GraphSession {
        self.session
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let depth = self.session.pending().depth();
        let discarded = self.session.pending_mut().exit();
        if let Some((additions, removals)) = &discarded {
            warn!(
                "Batch abandoned at depth {}, discarding {} additions and {} removals",
                depth,
                additions.len(),
                removals.len()
            );
        } else {
            warn!("Nested batch abandoned at depth {}", depth);
        }
        self.session.poison("batch abandoned before finish()");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RoleId;

    #[test]
    fn test_pending_changes_nesting() {
        let mut pending = PendingChanges::default();
        pending.enter();
        pending.enter();
        pending.queue(RoleSet::from([RoleId(1)]), RoleSet::new());

        assert_eq!(pending.exit(), None);
        assert!(pending.is_batching());

        pending.queue(RoleSet::new(), RoleSet::from([RoleId(2)]));
        let (additions, removals) = pending.exit().unwrap();

        assert_eq!(additions, RoleSet::from([RoleId(1)]));
        assert_eq!(removals, RoleSet::from([RoleId(2)]));
        assert!(pending.is_empty());
        assert!(!pending.is_batching());
    }
}
