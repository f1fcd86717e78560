//! Transaction registry and the recovery checkpoint snapshot.

use std::collections::HashSet;

use parking_lot::Mutex;
use tamarack_types::TxnId;

// ---------------------------------------------------------------------------
// TxnRegistry
// ---------------------------------------------------------------------------

/// Tracks which transactions are currently active.
///
/// Rollback-to-stable requires exclusive access to transaction state: any
/// active transaction fails the precondition check before a single table is
/// touched.
#[derive(Debug, Default)]
pub struct TxnRegistry {
    active: Mutex<HashSet<TxnId>>,
}

impl TxnRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, txn: TxnId) {
        self.active.lock().insert(txn);
    }

    pub fn end(&self, txn: TxnId) {
        self.active.lock().remove(&txn);
    }

    #[must_use]
    pub fn any_active(&self) -> bool {
        !self.active.lock().is_empty()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

// ---------------------------------------------------------------------------
// RecoverySnapshot
// ---------------------------------------------------------------------------

/// The transaction snapshot recorded by the checkpoint recovery started
/// from. Only a full checkpoint writes one; when absent, every transaction
/// id is treated as visible.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecoverySnapshot {
    pub snap_min: TxnId,
    pub snap_max: TxnId,
    /// Transaction ids in `[snap_min, snap_max)` that were running at the
    /// checkpoint and are therefore not visible.
    pub active: Vec<TxnId>,
}

impl RecoverySnapshot {
    /// Whether the snapshot carries any information at all.
    #[must_use]
    pub fn is_populated(&self) -> bool {
        !self.snap_min.is_none() || !self.snap_max.is_none()
    }

    /// Snapshot visibility for a transaction id: ids below the minimum are
    /// visible, ids at or above the maximum are not, and ids in between are
    /// visible unless they were in the active list.
    #[must_use]
    pub fn id_visible(&self, id: TxnId) -> bool {
        if id < self.snap_min {
            return true;
        }
        if id >= self.snap_max {
            return false;
        }
        !self.active.contains(&id)
    }
}
