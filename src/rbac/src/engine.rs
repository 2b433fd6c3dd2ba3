//! Role graph engine
//!
//! Owns the store, the configuration and the shared metrics, and hands out
//! [`GraphSession`]s. Convenience methods run a single operation in a
//! session of their own.

use crate::closure::{ClosureRebuilder, ClosureReport, RebuildStats};
use crate::config::RbacConfig;
use crate::error::Result;
use crate::evaluator::AccessEvaluator;
use crate::metrics::{MetricsCollector, RebuildMetrics};
use crate::session::GraphSession;
use crate::singleton::SingletonRole;
use crate::store::{InMemoryRoleStore, RoleSet, RoleStore};
use crate::types::{Accessor, RoleId};
use std::sync::Arc;
use tracing::info;

/// Role graph engine
///
/// # Architecture
///
/// ```text
/// GraphSession ─ mutation ─→ RoleStore (roles, edges, members)
///      │                         │
///      ├─ batch? ─→ PendingChanges
///      │                         ↓
///      └─ rebuild ─→ ClosureRebuilder ─→ ancestor closure
///                                        ↑
///                     AccessEvaluator ───┘     [Metrics]
/// ```
pub struct RoleGraph {
    /// Role graph and closure storage backend
    store: Arc<dyn RoleStore>,

    /// Engine configuration
    config: RbacConfig,

    /// Rebuild metrics shared by all sessions
    metrics: Option<MetricsCollector>,
}

impl RoleGraph {
    /// Create an engine over `store`
    pub fn new(store: Arc<dyn RoleStore>, config: RbacConfig) -> Self {
        let metrics = if config.enable_metrics {
            Some(MetricsCollector::new())
        } else {
            None
        };

        info!(
            "RoleGraph initialized with max_rebuild_iterations={}, metrics={}",
            config.max_rebuild_iterations, config.enable_metrics
        );

        Self {
            store,
            config,
            metrics,
        }
    }

    /// Engine over a fresh in-memory store with default configuration
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryRoleStore::new()), RbacConfig::default())
    }

    /// Connect to PostgreSQL, apply migrations and build an engine
    #[cfg(feature = "postgres")]
    pub async fn connect(config: RbacConfig) -> Result<Self> {
        let store = crate::store::PostgresRoleStore::connect(&config.database).await?;
        store.run_migrations().await?;
        Ok(Self::new(Arc::new(store), config))
    }

    /// Open a session. Its changes become visible on commit.
    pub async fn begin(&self) -> Result<GraphSession> {
        let tx = self.store.begin().await?;
        let mut rebuilder = ClosureRebuilder::new(self.config.max_rebuild_iterations);
        if let Some(metrics) = &self.metrics {
            rebuilder = rebuilder.with_metrics(metrics.clone());
        }

        let session = GraphSession::new(tx, rebuilder, AccessEvaluator::from_config(&self.config));
        Ok(match &self.metrics {
            Some(metrics) => session.with_metrics(metrics.clone()),
            None => session,
        })
    }

    /// Get-or-create a singleton role and commit it
    pub async fn singleton(&self, role: SingletonRole) -> Result<RoleId> {
        let mut session = self.begin().await?;
        let id = session.singleton_role(role).await?;
        session.commit().await?;
        Ok(id)
    }

    /// Membership check against committed state
    pub async fn is_member(&self, accessor: &Accessor, role: RoleId) -> Result<bool> {
        let mut session = self.begin().await?;
        let result = session.is_member(accessor, role).await;
        session.rollback().await?;
        result
    }

    /// Visible roles against committed state
    pub async fn visible_roles(&self, accessor: &Accessor) -> Result<RoleSet> {
        let mut session = self.begin().await?;
        let result = session.visible_roles(accessor).await;
        session.rollback().await?;
        result
    }

    /// Rebuild the whole closure and commit it
    pub async fn rebuild_all(&self) -> Result<RebuildStats> {
        let mut session = self.begin().await?;
        let stats = session.rebuild_all().await?;
        session.commit().await?;
        Ok(stats)
    }

    /// Check the committed closure against the parent edges
    pub async fn verify_closure(&self) -> Result<ClosureReport> {
        let mut session = self.begin().await?;
        let report = session.verify_closure().await;
        session.rollback().await?;
        report
    }

    pub fn config(&self) -> &RbacConfig {
        &self.config
    }

    /// Current metrics, if enabled
    pub async fn metrics(&self) -> Option<RebuildMetrics> {
        match &self.metrics {
            Some(metrics) => Some(metrics.snapshot().await),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ResourceRef, RoleIdentity, UserId};
    use std::time::Duration;

    #[tokio::test]
    async fn test_singleton_is_created_once() {
        let graph = RoleGraph::in_memory();

        let first = graph.singleton(SingletonRole::SystemAuditor).await.unwrap();
        let second = graph.singleton(SingletonRole::SystemAuditor).await.unwrap();
        let admin = graph.singleton(SingletonRole::SystemAdministrator).await.unwrap();

        assert_eq!(first, second);
        assert_ne!(first, admin);
    }

    #[tokio::test]
    async fn test_uncommitted_changes_are_invisible() {
        let graph = RoleGraph::in_memory();

        let mut session = graph.begin().await.unwrap();
        let role = session
            .create_role(RoleIdentity::object(ResourceRef::team(1), "member_role"))
            .await
            .unwrap();
        session.add_member(role, UserId(5)).await.unwrap();
        session.rollback().await.unwrap();

        let visible = graph.visible_roles(&Accessor::user(5)).await.unwrap();
        assert!(visible.is_empty());
    }

    #[tokio::test]
    async fn test_reads_complete_while_session_open() {
        let graph = RoleGraph::in_memory();
        let mut setup = graph.begin().await.unwrap();
        let role = setup
            .create_role(RoleIdentity::object(ResourceRef::team(1), "member_role"))
            .await
            .unwrap();
        setup.add_member(role, UserId(1)).await.unwrap();
        setup.commit().await.unwrap();

        let mut open = graph.begin().await.unwrap();
        open.remove_member(role, UserId(1)).await.unwrap();

        let check = tokio::time::timeout(Duration::from_secs(2), graph.is_member(&Accessor::user(1), role))
            .await
            .expect("reader blocked behind open session");
        assert!(check.unwrap());

        let visible = tokio::time::timeout(Duration::from_secs(2), graph.visible_roles(&Accessor::user(1)))
            .await
            .expect("reader blocked behind open session")
            .unwrap();
        assert_eq!(visible, RoleSet::from([role]));

        open.commit().await.unwrap();
        assert!(!graph.is_member(&Accessor::user(1), role).await.unwrap());
    }

    #[tokio::test]
    async fn test_metrics_disabled() {
        let config = RbacConfig {
            enable_metrics: false,
            ..Default::default()
        };
        let graph = RoleGraph::new(Arc::new(InMemoryRoleStore::new()), config);

        graph.singleton(SingletonRole::SystemAdministrator).await.unwrap();
        assert!(graph.metrics().await.is_none());
        assert!(graph.verify_closure().await.unwrap().is_consistent());
    }
}
