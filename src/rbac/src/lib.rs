//! # CretoAI Role Graph
//!
//! Role-based access control over a graph of roles with a materialized
//! ancestor closure.
//!
//! ## Features
//!
//! - **Incremental closure maintenance** with set-at-a-time fixed-point sweeps
//! - **Batched rebuilds** that coalesce many graph mutations into one pass
//! - **Closure-only access checks** for membership and role visibility
//! - **Singleton roles** for system administrators and auditors
//! - **PostgreSQL backend** with an in-memory backend for tests
//!
//! ## Example
//!
//! ```rust
//! use cretoai_rbac::{Accessor, ResourceRef, RoleGraph, RoleIdentity, UserId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let graph = RoleGraph::in_memory();
//!     let org = ResourceRef::organization(1);
//!
//!     let mut session = graph.begin().await?;
//!     let mut batch = session.batch();
//!     let admin = batch.create_role(RoleIdentity::object(org, "admin_role")).await?;
//!     let read = batch.create_role(RoleIdentity::object(org, "read_role")).await?;
//!     batch.add_parent(read, admin).await?;
//!     batch.finish().await?;
//!
//!     session.add_member(admin, UserId(7)).await?;
//!     session.commit().await?;
//!
//!     assert!(graph.is_member(&Accessor::user(7), read).await?);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod closure;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod metrics;
pub mod session;
pub mod singleton;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use types::{
    Accessor, AncestorEntry, ResourceKind, ResourceRef, Role, RoleId, RoleIdentity, UserId,
};
pub use batch::{BatchGuard, PendingChanges};
pub use closure::{ClosureRebuilder, ClosureReport, RebuildStats};
pub use config::{DatabaseConfig, RbacConfig};
pub use engine::RoleGraph;
pub use error::{RbacError, Result};
pub use evaluator::AccessEvaluator;
pub use metrics::{MetricsCollector, RebuildMetrics};
pub use session::GraphSession;
pub use singleton::SingletonRole;
pub use store::{GraphTransaction, InMemoryRoleStore, RoleSet, RoleStore};
#[cfg(feature = "postgres")]
pub use store::PostgresRoleStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
