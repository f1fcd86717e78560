//! The per-invocation rollback context.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tamarack_engine::{Engine, RecoverySnapshot};
use tamarack_types::{Timestamp, TxnId};

use crate::stats::RtsStats;

/// Ephemeral state for one rollback-to-stable invocation.
///
/// The stable timestamp is copied in exactly once: re-reading it mid-walk
/// without the oracle's lock would violate protocol, and it is not supposed
/// to move while rollback runs. Nothing in the context survives the
/// invocation.
#[derive(Debug)]
pub struct RollbackContext {
    /// The timestamp every table is being rolled back to.
    pub rollback_ts: Timestamp,
    pub recovering: bool,
    pub closing: bool,
    pub in_memory: bool,
    pub tolerate_corruption: bool,
    recovery_snapshot: Option<RecoverySnapshot>,
    pub stats: RtsStats,
    started: Instant,
    progress_period: Duration,
    progress_reported: AtomicU64,
}

impl RollbackContext {
    /// Snapshot the engine state rollback decisions depend on.
    #[must_use]
    pub fn new(engine: &Engine) -> Self {
        Self {
            rollback_ts: engine.oracle.stable(),
            recovering: engine.recovering,
            closing: engine.closing,
            in_memory: engine.config.in_memory,
            tolerate_corruption: engine.config.tolerate_corruption,
            recovery_snapshot: engine.recovery_snapshot.clone(),
            stats: RtsStats::new(),
            started: Instant::now(),
            progress_period: engine.config.progress_period(),
            progress_reported: AtomicU64::new(0),
        }
    }

    /// Transaction-id visibility under the recovery checkpoint snapshot.
    ///
    /// Outside recovery everything is visible; so is everything when the
    /// recovered checkpoint recorded no snapshot (only full checkpoints do).
    #[must_use]
    pub fn txn_visible(&self, id: TxnId) -> bool {
        if !self.recovering {
            return true;
        }
        match &self.recovery_snapshot {
            Some(snap) if snap.is_populated() => snap.id_visible(id),
            _ => true,
        }
    }

    /// Whether `id` postdates the recovery checkpoint snapshot minimum.
    /// Content written by such transactions is not covered by the recovered
    /// checkpoint and must be inspected.
    #[must_use]
    pub fn txn_newer_than_recovery_snapshot(&self, id: TxnId) -> bool {
        if !self.recovering {
            return false;
        }
        match &self.recovery_snapshot {
            Some(snap) if snap.is_populated() => id >= snap.snap_min,
            _ => false,
        }
    }

    /// Emit a progress line if another period has elapsed.
    pub fn progress(&self, files_visited: u64) {
        if self.progress_period.is_zero() {
            return;
        }
        let elapsed = self.started.elapsed();
        let periods = (elapsed.as_millis() / self.progress_period.as_millis()) as u64;
        if periods > self.progress_reported.load(Ordering::Relaxed) {
            self.progress_reported.store(periods, Ordering::Relaxed);
            tracing::info!(
                elapsed_secs = elapsed.as_secs(),
                files_visited,
                "rollback to stable in progress"
            );
        }
    }
}
