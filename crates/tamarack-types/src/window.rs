//! Time windows and their page-level aggregates.

use std::fmt;

use crate::glossary::{Timestamp, TxnId};

// ---------------------------------------------------------------------------
// TreeKind
// ---------------------------------------------------------------------------

/// Which kind of tree a value lives in.
///
/// The history store has a different maximum-durable-timestamp rule than
/// ordinary data trees (see [`TimeAggregate::max_durable_ts`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TreeKind {
    /// An ordinary data tree.
    Data,
    /// The internal history store.
    History,
}

impl TreeKind {
    #[inline]
    #[must_use]
    pub const fn is_history(self) -> bool {
        matches!(self, Self::History)
    }
}

// ---------------------------------------------------------------------------
// TimeWindow
// ---------------------------------------------------------------------------

/// The validity interval of a single on-disk value: start and stop commit
/// and durable timestamps, the owning transaction ids, and whether any of
/// it was written by a prepared transaction.
///
/// A window with `stop_ts == Timestamp::MAX` has no stop point: the value is
/// still live.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TimeWindow {
    pub start_ts: Timestamp,
    pub durable_start_ts: Timestamp,
    pub start_txn: TxnId,
    pub stop_ts: Timestamp,
    pub durable_stop_ts: Timestamp,
    pub stop_txn: TxnId,
    pub prepared: bool,
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self {
            start_ts: Timestamp::NONE,
            durable_start_ts: Timestamp::NONE,
            start_txn: TxnId::NONE,
            stop_ts: Timestamp::MAX,
            durable_stop_ts: Timestamp::NONE,
            stop_txn: TxnId::NONE,
            prepared: false,
        }
    }
}

impl TimeWindow {
    /// A live window starting at `start_ts`, durable at `durable_start_ts`.
    #[must_use]
    pub fn with_start(start_txn: TxnId, start_ts: Timestamp, durable_start_ts: Timestamp) -> Self {
        Self {
            start_ts,
            durable_start_ts,
            start_txn,
            ..Self::default()
        }
    }

    /// Close this window: the value was superseded or deleted at `stop_ts`.
    #[must_use]
    pub fn with_stop(mut self, stop_txn: TxnId, stop_ts: Timestamp, durable_stop_ts: Timestamp) -> Self {
        self.stop_ts = stop_ts;
        self.durable_stop_ts = durable_stop_ts;
        self.stop_txn = stop_txn;
        self
    }

    /// Whether the window carries a stop point.
    #[inline]
    #[must_use]
    pub fn has_stop(&self) -> bool {
        self.stop_ts != Timestamp::MAX
    }

    /// Whether start and stop coincide in all three coordinates.
    ///
    /// Only prepared transactions produce such windows; the artifact is
    /// treated like an unstable start.
    #[must_use]
    pub fn is_single_point(&self) -> bool {
        self.start_ts == self.stop_ts
            && self.durable_start_ts == self.durable_stop_ts
            && self.start_txn == self.stop_txn
    }

    /// Structural sanity: when a stop exists it does not precede the start.
    #[must_use]
    pub fn is_ordered(&self) -> bool {
        !self.has_stop() || self.stop_ts >= self.start_ts
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{} {} -> {}/{} {}{}]",
            self.start_ts,
            self.durable_start_ts,
            self.start_txn,
            self.stop_ts,
            self.durable_stop_ts,
            self.stop_txn,
            if self.prepared { " prepared" } else { "" }
        )
    }
}

// ---------------------------------------------------------------------------
// TimeAggregate
// ---------------------------------------------------------------------------

/// The upward-propagated aggregate of the time windows beneath a page
/// address: the newest start/stop durable timestamps, the newest stop commit
/// timestamp, the newest transaction id, and whether anything beneath is
/// prepared. Stored on internal-page addresses and in checkpoint metadata.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
pub struct TimeAggregate {
    pub newest_start_durable_ts: Timestamp,
    pub newest_stop_durable_ts: Timestamp,
    pub newest_stop_ts: Timestamp,
    pub newest_txn: TxnId,
    pub prepared: bool,
}

impl TimeAggregate {
    /// The empty aggregate (nothing beneath).
    pub const EMPTY: Self = Self {
        newest_start_durable_ts: Timestamp::NONE,
        newest_stop_durable_ts: Timestamp::NONE,
        newest_stop_ts: Timestamp::NONE,
        newest_txn: TxnId::NONE,
        prepared: false,
    };

    /// Fold one value's time window into the aggregate.
    pub fn merge_window(&mut self, tw: &TimeWindow) {
        debug_assert!(!tw.start_txn.is_aborted(), "aborted window in aggregate");
        self.newest_start_durable_ts = self.newest_start_durable_ts.max(tw.durable_start_ts);
        self.newest_stop_ts = self.newest_stop_ts.max(tw.stop_ts);
        if tw.has_stop() {
            self.newest_stop_durable_ts = self.newest_stop_durable_ts.max(tw.durable_stop_ts);
            if tw.stop_txn.get() > self.newest_txn.get() {
                self.newest_txn = tw.stop_txn;
            }
        }
        if tw.start_txn.get() > self.newest_txn.get() {
            self.newest_txn = tw.start_txn;
        }
        self.prepared |= tw.prepared;
    }

    /// Fold a child aggregate into this one.
    pub fn merge(&mut self, other: &Self) {
        self.newest_start_durable_ts = self.newest_start_durable_ts.max(other.newest_start_durable_ts);
        self.newest_stop_durable_ts = self.newest_stop_durable_ts.max(other.newest_stop_durable_ts);
        self.newest_stop_ts = self.newest_stop_ts.max(other.newest_stop_ts);
        if other.newest_txn.get() > self.newest_txn.get() {
            self.newest_txn = other.newest_txn;
        }
        self.prepared |= other.prepared;
    }

    /// The maximum durable timestamp beneath this address.
    ///
    /// Ordinary trees take the larger of the start and stop durable
    /// timestamps. The history store instead takes the larger of the stop
    /// durable and stop commit timestamps: most history records have a stop
    /// at or above their start, except the ones written for prepared updates
    /// on the data store, whose open stops must still count.
    #[must_use]
    pub fn max_durable_ts(&self, kind: TreeKind) -> Timestamp {
        match kind {
            TreeKind::Data => self
                .newest_start_durable_ts
                .max(self.newest_stop_durable_ts),
            TreeKind::History => self.newest_stop_durable_ts.max(self.newest_stop_ts),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
