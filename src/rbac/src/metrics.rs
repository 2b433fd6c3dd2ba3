//! Rebuild metrics collection

use crate::closure::RebuildStats;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Closure maintenance counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RebuildMetrics {
    /// Rebuilds that had a non-empty starting frontier
    pub rebuild_passes: u64,

    /// Total sweeps across all passes
    pub sweeps: u64,

    /// Closure rows inserted
    pub entries_inserted: u64,

    /// Closure rows deleted
    pub entries_deleted: u64,

    /// Outermost batches that ended and flushed their queue
    pub batches_flushed: u64,

    /// Rebuilds that failed to converge
    pub convergence_failures: u64,

    /// Duration of the most recent pass
    pub last_rebuild_ms: f64,
}

impl RebuildMetrics {
    /// Average sweeps per pass
    pub fn sweeps_per_pass(&self) -> f64 {
        if self.rebuild_passes == 0 {
            0.0
        } else {
            self.sweeps as f64 / self.rebuild_passes as f64
        }
    }
}

/// Metrics collector shared by every session of one engine
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    metrics: Arc<RwLock<RebuildMetrics>>,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a converged rebuild
    pub async fn record_rebuild(&self, stats: &RebuildStats) {
        let mut metrics = self.metrics.write().await;
        metrics.rebuild_passes += 1;
        metrics.sweeps += stats.sweeps as u64;
        metrics.entries_inserted += stats.inserted;
        metrics.entries_deleted += stats.deleted;
        metrics.last_rebuild_ms = stats.elapsed.as_secs_f64() * 1000.0;
    }

    /// Record a rebuild that hit the convergence guard
    pub async fn record_convergence_failure(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.convergence_failures += 1;
    }

    /// Record the flush of an outermost batch
    pub async fn record_batch_flush(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.batches_flushed += 1;
    }

    /// Get current metrics snapshot
    pub async fn snapshot(&self) -> RebuildMetrics {
        self.metrics.read().await.clone()
    }

    /// Reset all counters
    pub async fn reset(&self) {
        *self.metrics.write().await = RebuildMetrics::default();
    }
}
