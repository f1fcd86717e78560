//! Update records and per-key update logs.

use smallvec::SmallVec;
use tamarack_types::{ModifyDelta, PrepareState, Timestamp, TxnId};

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

/// Payload of an update record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateValue {
    /// A full value.
    Standard(Vec<u8>),
    /// A delta against the next-newer value.
    Modify(ModifyDelta),
    /// Deletion of the key.
    Tombstone,
}

/// A single in-memory update record for a key.
///
/// Aborting a record sets its transaction id to [`TxnId::ABORTED`] and zeroes
/// both timestamps; the record body stays in its log and every reader skips
/// it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub txn: TxnId,
    pub start_ts: Timestamp,
    pub durable_ts: Timestamp,
    pub value: UpdateValue,
    pub prepare: PrepareState,
    /// Restored from the history store by rollback.
    pub restored_from_hs: bool,
    /// Restored from the data store (deletion undone) by rollback.
    pub restored_from_ds: bool,
}

impl Update {
    /// A standard (full-value) update.
    #[must_use]
    pub fn standard(txn: TxnId, start_ts: Timestamp, durable_ts: Timestamp, data: Vec<u8>) -> Self {
        Self {
            txn,
            start_ts,
            durable_ts,
            value: UpdateValue::Standard(data),
            prepare: PrepareState::Init,
            restored_from_hs: false,
            restored_from_ds: false,
        }
    }

    /// A tombstone update.
    #[must_use]
    pub fn tombstone(txn: TxnId, start_ts: Timestamp, durable_ts: Timestamp) -> Self {
        Self {
            txn,
            start_ts,
            durable_ts,
            value: UpdateValue::Tombstone,
            prepare: PrepareState::Init,
            restored_from_hs: false,
            restored_from_ds: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.txn.is_aborted()
    }

    #[inline]
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        matches!(self.value, UpdateValue::Tombstone)
    }

    /// Mark this record aborted and zero its timestamps.
    pub fn abort(&mut self) {
        self.txn = TxnId::ABORTED;
        self.start_ts = Timestamp::NONE;
        self.durable_ts = Timestamp::NONE;
    }
}

// ---------------------------------------------------------------------------
// UpdateLog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct LogEntry {
    update: Update,
    prev: Option<u32>,
}

/// Arena-owned, append-only log of the updates for one key.
///
/// New records are appended and become the head; each entry keeps an explicit
/// `prev` index to the next-older record, so traversal is newest-to-oldest
/// without pointer chasing into freed memory. Entries are never removed;
/// abort marks them dead in place. The generation counter advances on every
/// splice so concurrent readers can detect head movement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateLog {
    entries: Vec<LogEntry>,
    head: Option<u32>,
    generation: u64,
}

impl UpdateLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A log whose only record is `update`.
    #[must_use]
    pub fn with_newest(update: Update) -> Self {
        let mut log = Self::new();
        log.push_head(update);
        log
    }

    /// Append `update` as the new head; returns its index.
    pub fn push_head(&mut self, update: Update) -> u32 {
        let idx = u32::try_from(self.entries.len()).expect("update log index overflow");
        self.entries.push(LogEntry {
            update,
            prev: self.head,
        });
        self.head = Some(idx);
        self.generation += 1;
        idx
    }

    /// Splice a newest-first run of records onto the head of the log.
    ///
    /// The first element of `newest_first` ends up as the new head; this is
    /// how rollback attaches a synthesized `[tombstone, standard]` pair.
    pub fn splice(&mut self, newest_first: SmallVec<[Update; 2]>) {
        for update in newest_first.into_iter().rev() {
            self.push_head(update);
        }
    }

    /// Index of the newest record.
    #[inline]
    #[must_use]
    pub fn head_index(&self) -> Option<u32> {
        self.head
    }

    /// Index of the record older than `idx`.
    #[must_use]
    pub fn prev_index(&self, idx: u32) -> Option<u32> {
        self.entries[idx as usize].prev
    }

    #[must_use]
    pub fn get(&self, idx: u32) -> &Update {
        &self.entries[idx as usize].update
    }

    pub fn get_mut(&mut self, idx: u32) -> &mut Update {
        self.generation += 1;
        &mut self.entries[idx as usize].update
    }

    /// The newest record, aborted or not.
    #[must_use]
    pub fn head(&self) -> Option<&Update> {
        self.head.map(|i| self.get(i))
    }

    /// The newest record that has not been aborted.
    #[must_use]
    pub fn first_live(&self) -> Option<&Update> {
        self.iter().find(|u| !u.is_aborted())
    }

    /// Newest-to-oldest traversal over every record, aborted ones included.
    pub fn iter(&self) -> impl Iterator<Item = &Update> {
        let mut cur = self.head;
        std::iter::from_fn(move || {
            let idx = cur?;
            let entry = &self.entries[idx as usize];
            cur = entry.prev;
            Some(&entry.update)
        })
    }

    /// Number of records that have not been aborted.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.iter().filter(|u| !u.is_aborted()).count()
    }

    /// Total records ever appended.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the live portion keeps non-increasing `start_ts` from head to
    /// tail. Transient violations are legal only mid-repair.
    #[must_use]
    pub fn is_monotonic(&self) -> bool {
        let mut last: Option<Timestamp> = None;
        for update in self.iter().filter(|u| !u.is_aborted()) {
            if let Some(newer) = last {
                if update.start_ts > newer {
                    return false;
                }
            }
            last = Some(update.start_ts);
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use smallvec::smallvec;

    fn upd(txn: u64, ts: u64) -> Update {
        Update::standard(
            TxnId::new(txn),
            Timestamp::new(ts),
            Timestamp::new(ts),
            vec![ts as u8],
        )
    }

    #[test]
    fn push_head_orders_newest_first() {
        let mut log = UpdateLog::new();
        log.push_head(upd(1, 10));
        log.push_head(upd(2, 20));
        log.push_head(upd(3, 30));

        let starts: Vec<u64> = log.iter().map(|u| u.start_ts.get()).collect();
        assert_eq!(starts, vec![30, 20, 10]);
        assert_eq!(log.head().unwrap().start_ts, Timestamp::new(30));
        assert!(log.is_monotonic());
    }

    #[test]
    fn abort_marks_dead_without_unlinking() {
        let mut log = UpdateLog::new();
        log.push_head(upd(1, 10));
        let i = log.push_head(upd(2, 20));
        log.get_mut(i).abort();

        assert_eq!(log.len(), 2, "aborted entries stay in the log");
        assert_eq!(log.live_count(), 1);
        let live = log.first_live().unwrap();
        assert_eq!(live.start_ts, Timestamp::new(10));
        // The aborted record zeroed its timestamps.
        assert_eq!(log.get(i).start_ts, Timestamp::NONE);
        assert!(log.get(i).is_aborted());
    }

    #[test]
    fn splice_attaches_newest_first_run() {
        let mut log = UpdateLog::with_newest(upd(1, 10));
        let tomb = Update::tombstone(TxnId::new(3), Timestamp::new(30), Timestamp::new(30));
        let val = upd(2, 20);
        log.splice(smallvec![tomb.clone(), val.clone()]);

        let collected: Vec<Update> = log.iter().cloned().collect();
        assert_eq!(collected[0], tomb, "first splice element becomes head");
        assert_eq!(collected[1], val);
        assert_eq!(collected[2], upd(1, 10));
    }

    #[test]
    fn generation_advances_on_mutation() {
        let mut log = UpdateLog::new();
        let g0 = log.generation();
        log.push_head(upd(1, 10));
        assert!(log.generation() > g0);
        let g1 = log.generation();
        log.splice(smallvec![upd(2, 20)]);
        assert!(log.generation() > g1);
    }

    #[test]
    fn monotonicity_detects_out_of_order_live_records() {
        let mut log = UpdateLog::new();
        log.push_head(upd(1, 20));
        log.push_head(upd(2, 10)); // newer record with older start: broken
        assert!(!log.is_monotonic());
        // Aborting the offender restores monotonicity.
        let head = log.head_index().unwrap();
        log.get_mut(head).abort();
        assert!(log.is_monotonic());
    }

    proptest! {
        #[test]
        fn prop_iter_never_revisits(
            n in 1_usize..50,
        ) {
            let mut log = UpdateLog::new();
            for i in 0..n {
                log.push_head(upd(i as u64 + 1, (i as u64 + 1) * 10));
            }
            prop_assert_eq!(log.iter().count(), n);
            prop_assert_eq!(log.len(), n);
        }

        #[test]
        fn prop_abort_only_shrinks_live_count(
            n in 1_usize..30,
            kill in proptest::collection::vec(any::<prop::sample::Index>(), 0..10),
        ) {
            let mut log = UpdateLog::new();
            for i in 0..n {
                log.push_head(upd(i as u64 + 1, (i as u64 + 1) * 10));
            }
            let mut live = log.live_count();
            for k in kill {
                let idx = k.index(n) as u32;
                if !log.get(idx).is_aborted() {
                    log.get_mut(idx).abort();
                    live -= 1;
                }
                prop_assert_eq!(log.live_count(), live);
            }
        }
    }
}
