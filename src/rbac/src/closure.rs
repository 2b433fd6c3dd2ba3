//! Ancestor closure rebuilding
//!
//! The rebuilder restores the closure invariant, `(d, a)` exists iff `a`
//! is reachable from `d` over zero or more parent edges, after the parent
//! sets of some roles changed. It works in sweeps over a frontier:
//!
//! 1. delete rows of `removals` that no parent still supports
//! 2. insert rows for `additions` implied by their parents' rows
//! 3. stop when a sweep changes nothing
//! 4. otherwise move both frontiers one hop down to the children
//!
//! Each step is one set operation over the whole frontier, so the cost
//! grows with the depth of the affected subgraph rather than with the
//! number of ancestor pairs.

use crate::error::{RbacError, Result};
use crate::metrics::MetricsCollector;
use crate::store::{GraphTransaction, RoleSet};
use crate::types::RoleId;
use serde::{Serialize, Serializer};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Default bound on sweeps per rebuild
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Outcome of one rebuild
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RebuildStats {
    /// Sweeps executed
    pub sweeps: usize,

    /// Closure rows inserted
    pub inserted: u64,

    /// Closure rows deleted
    pub deleted: u64,

    /// Wall time spent
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: Serializer>(elapsed: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(elapsed.as_millis() as u64)
}

impl RebuildStats {
    /// True when the closure was already consistent
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.deleted == 0
    }
}

/// Fixed-point closure rebuilder
#[derive(Debug, Clone)]
pub struct ClosureRebuilder {
    max_iterations: usize,
    metrics: Option<MetricsCollector>,
}

impl ClosureRebuilder {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Bring the closure back in line with the parent edges.
    ///
    /// `additions` are roles whose parent sets gained edges (or that were
    /// just created), `removals` roles whose parent sets lost edges. Both
    /// empty is a no-op that touches nothing.
    ///
    /// # Errors
    ///
    /// [`RbacError::Convergence`] when the sweep bound is exceeded or, once
    /// the sweeps settle, a processed role shows up as an ancestor of its
    /// own parent. The transaction holds a partial rebuild at that point and
    /// must be rolled back.
    pub async fn rebuild(
        &self,
        tx: &mut dyn GraphTransaction,
        additions: RoleSet,
        removals: RoleSet,
    ) -> Result<RebuildStats> {
        let mut stats = RebuildStats::default();
        if additions.is_empty() && removals.is_empty() {
            return Ok(stats);
        }

        let started = Instant::now();
        tx.lock_closure().await?;

        let mut additions = additions;
        let mut removals = removals;
        let mut processed = RoleSet::new();

        while !additions.is_empty() || !removals.is_empty() {
            if stats.sweeps >= self.max_iterations {
                return Err(self
                    .convergence_failure(
                        stats.sweeps,
                        format!("iteration bound of {} sweeps reached", self.max_iterations),
                    )
                    .await);
            }
            stats.sweeps += 1;

            let deleted = if removals.is_empty() {
                0
            } else {
                tx.delete_unreachable_ancestors(&removals).await?
            };
            let inserted = if additions.is_empty() {
                0
            } else {
                tx.insert_reachable_ancestors(&additions).await?
            };
            stats.deleted += deleted;
            stats.inserted += inserted;

            debug!(
                "Closure sweep {}: {} additions, {} removals, +{} -{}",
                stats.sweeps,
                additions.len(),
                removals.len(),
                inserted,
                deleted
            );

            processed.extend(additions.iter().chain(removals.iter()).copied());

            if deleted == 0 && inserted == 0 {
                break;
            }

            if !additions.is_empty() {
                additions = tx.children_of(&additions).await?;
            }
            if !removals.is_empty() {
                removals = tx.children_of(&removals).await?;
            }
        }

        // Rows left over from before the rebuild are gone only at the fixed
        // point, so cycles are checked once here.
        let cyclic = tx.self_reaching_roles(&processed).await?;
        if !cyclic.is_empty() {
            let roles: Vec<String> = cyclic.iter().map(ToString::to_string).collect();
            return Err(self
                .convergence_failure(
                    stats.sweeps,
                    format!("parent cycle through {}", roles.join(", ")),
                )
                .await);
        }

        stats.elapsed = started.elapsed();
        info!(
            "Closure rebuilt in {} sweeps (+{} -{}) in {:?}",
            stats.sweeps, stats.inserted, stats.deleted, stats.elapsed
        );

        if let Some(metrics) = &self.metrics {
            metrics.record_rebuild(&stats).await;
        }

        Ok(stats)
    }

    async fn convergence_failure(&self, iterations: usize, reason: String) -> RbacError {
        error!("Ancestry rebuilding did not converge after {} sweeps: {}", iterations, reason);
        if let Some(metrics) = &self.metrics {
            metrics.record_convergence_failure().await;
        }
        RbacError::Convergence { iterations, reason }
    }
}

impl Default for ClosureRebuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITERATIONS)
    }
}

/// Difference between the stored closure and the one implied by the edges
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClosureReport {
    /// `(descendent, ancestor)` pairs that should exist but do not
    pub missing: Vec<(RoleId, RoleId)>,

    /// Stored pairs with no supporting path
    pub extra: Vec<(RoleId, RoleId)>,
}

impl ClosureReport {
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }

    pub fn compare(
        expected: &BTreeSet<(RoleId, RoleId)>,
        actual: &BTreeSet<(RoleId, RoleId)>,
    ) -> Self {
        Self {
            missing: expected.difference(actual).copied().collect(),
            extra: actual.difference(expected).copied().collect(),
        }
    }
}

/// Reachability over `(child, parent)` edges, every role reaching itself.
///
/// Walks the graph per role, so it is only meant for verification and
/// tests, never for maintaining the table.
pub fn expected_closure(
    roles: &RoleSet,
    edges: &[(RoleId, RoleId)],
) -> BTreeSet<(RoleId, RoleId)> {
    let mut parents: HashMap<RoleId, Vec<RoleId>> = HashMap::new();
    for (child, parent) in edges {
        parents.entry(*child).or_default().push(*parent);
    }

    let mut pairs = BTreeSet::new();
    for &role in roles {
        let mut seen = HashSet::from([role]);
        let mut queue = VecDeque::from([role]);
        while let Some(current) = queue.pop_front() {
            pairs.insert((role, current));
            for &parent in parents.get(&current).into_iter().flatten() {
                if seen.insert(parent) {
                    queue.push_back(parent);
                }
            }
        }
    }
    pairs
}
