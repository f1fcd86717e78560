//! Rollback statistics.
//!
//! Monotonically increasing counters are the only externally visible
//! progress signal of a rollback invocation (plus the periodic progress log
//! lines). All counters are atomic so the per-key routines can increment
//! through a shared context reference.

use std::sync::atomic::{AtomicU64, Ordering};

#[inline]
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn bump_by(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

/// Counters for one rollback-to-stable invocation.
#[derive(Debug, Default)]
pub struct RtsStats {
    /// Pages inspected by the per-page abort routine.
    pub pages_visited: AtomicU64,
    /// Pages the tree walk skipped without instantiating.
    pub pages_walk_skipped: AtomicU64,
    /// In-memory updates aborted.
    pub updates_aborted: AtomicU64,
    /// History store records removed, total.
    pub hs_removed: AtomicU64,
    /// History store records removed exactly at the stable boundary.
    pub hs_removed_stable: AtomicU64,
    /// History store records removed above the stable boundary.
    pub hs_removed_unstable: AtomicU64,
    /// Standard updates restored from the history store.
    pub hs_restored_updates: AtomicU64,
    /// Tombstones restored from the history store.
    pub hs_restored_tombstones: AtomicU64,
    /// History records whose stop durable timestamp preceded the next-newer
    /// record's durable timestamp (out-of-order commit artifacts).
    pub hs_stop_older_than_newer_start: AtomicU64,
    /// History store records removed by the recovery-only final pass.
    pub hs_sweep_removed: AtomicU64,
    /// Keys removed (no stable version anywhere).
    pub keys_removed: AtomicU64,
    /// Keys whose on-disk value was restored (deletion undone).
    pub keys_restored: AtomicU64,
    /// Trees walked by this invocation.
    pub trees_rolled_back: AtomicU64,
    /// Trees skipped from checkpoint metadata alone.
    pub trees_skipped: AtomicU64,
    /// Fast-truncated subtrees made live again.
    pub fast_truncates_rolled_back: AtomicU64,
    /// Checkpoints whose newest transaction postdates the recovery snapshot.
    pub inconsistent_checkpoints: AtomicU64,
}

impl RtsStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            pages_visited: load(&self.pages_visited),
            pages_walk_skipped: load(&self.pages_walk_skipped),
            updates_aborted: load(&self.updates_aborted),
            hs_removed: load(&self.hs_removed),
            hs_removed_stable: load(&self.hs_removed_stable),
            hs_removed_unstable: load(&self.hs_removed_unstable),
            hs_restored_updates: load(&self.hs_restored_updates),
            hs_restored_tombstones: load(&self.hs_restored_tombstones),
            hs_stop_older_than_newer_start: load(&self.hs_stop_older_than_newer_start),
            hs_sweep_removed: load(&self.hs_sweep_removed),
            keys_removed: load(&self.keys_removed),
            keys_restored: load(&self.keys_restored),
            trees_rolled_back: load(&self.trees_rolled_back),
            trees_skipped: load(&self.trees_skipped),
            fast_truncates_rolled_back: load(&self.fast_truncates_rolled_back),
            inconsistent_checkpoints: load(&self.inconsistent_checkpoints),
        }
    }
}

/// Plain-value snapshot of [`RtsStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub pages_visited: u64,
    pub pages_walk_skipped: u64,
    pub updates_aborted: u64,
    pub hs_removed: u64,
    pub hs_removed_stable: u64,
    pub hs_removed_unstable: u64,
    pub hs_restored_updates: u64,
    pub hs_restored_tombstones: u64,
    pub hs_stop_older_than_newer_start: u64,
    pub hs_sweep_removed: u64,
    pub keys_removed: u64,
    pub keys_restored: u64,
    pub trees_rolled_back: u64,
    pub trees_skipped: u64,
    pub fast_truncates_rolled_back: u64,
    pub inconsistent_checkpoints: u64,
}

impl StatsSnapshot {
    /// Whether the invocation changed anything at all.
    #[must_use]
    pub fn mutated_anything(&self) -> bool {
        self.updates_aborted != 0
            || self.hs_removed != 0
            || self.hs_sweep_removed != 0
            || self.keys_removed != 0
            || self.keys_restored != 0
            || self.fast_truncates_rolled_back != 0
    }
}
