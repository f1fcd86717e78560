//! The history store: an internal table of superseded versions.
//!
//! Records are keyed by `(table id, user key, start timestamp, counter)` and
//! hold the superseded value (full or as a modify delta) together with its
//! full time window. Rollback reads them newest-first per key, the same
//! search-near-then-previous pattern a cursor over the physical table would
//! use, and removes what the data store reclaims.

use std::collections::BTreeMap;

use tamarack_types::{Key, ModifyDelta, TableId, TimeWindow, Timestamp, ValueType};

// ---------------------------------------------------------------------------
// HsKey / HsRecord
// ---------------------------------------------------------------------------

/// History store key: `(table, key, start_ts, counter)`.
///
/// The counter disambiguates multiple versions with the same start timestamp
/// (out-of-order commits); ordering is total per `(table, key)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HsKey {
    pub table: TableId,
    pub key: Key,
    pub start_ts: Timestamp,
    pub counter: u64,
}

/// Payload of a history store record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HsValue {
    /// A full value.
    Standard(Vec<u8>),
    /// A delta against the next-newer reconstructed value.
    Modify(ModifyDelta),
}

impl HsValue {
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Standard(_) => ValueType::Standard,
            Self::Modify(_) => ValueType::Modify,
        }
    }
}

/// One history store record: the superseded value and its time window.
///
/// The record value exposes `(durable_stop_ts, durable_start_ts, type,
/// payload)`; the full window also carries the transaction ids the
/// reconstruction visibility checks need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HsRecord {
    pub tw: TimeWindow,
    pub value: HsValue,
}

impl HsRecord {
    #[inline]
    #[must_use]
    pub fn durable_start_ts(&self) -> Timestamp {
        self.tw.durable_start_ts
    }

    #[inline]
    #[must_use]
    pub fn durable_stop_ts(&self) -> Timestamp {
        self.tw.durable_stop_ts
    }
}

// ---------------------------------------------------------------------------
// HistoryStore
// ---------------------------------------------------------------------------

/// The history store table.
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    records: BTreeMap<HsKey, HsRecord>,
    next_counter: u64,
}

impl HistoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record; the start timestamp comes from the record's window
    /// and the counter is assigned monotonically.
    pub fn insert(&mut self, table: TableId, key: Key, record: HsRecord) -> HsKey {
        let hs_key = HsKey {
            table,
            key,
            start_ts: record.tw.start_ts,
            counter: self.next_counter,
        };
        self.next_counter += 1;
        self.records.insert(hs_key.clone(), record);
        hs_key
    }

    fn key_range(table: TableId, key: &Key) -> (HsKey, HsKey) {
        (
            HsKey {
                table,
                key: key.clone(),
                start_ts: Timestamp::NONE,
                counter: 0,
            },
            HsKey {
                table,
                key: key.clone(),
                start_ts: Timestamp::MAX,
                counter: u64::MAX,
            },
        )
    }

    /// The newest record for `(table, key)`: position at the maximum start
    /// timestamp and step back to the last real record.
    #[must_use]
    pub fn newest(&self, table: TableId, key: &Key) -> Option<(HsKey, &HsRecord)> {
        let (lo, hi) = Self::key_range(table, key);
        self.records
            .range(lo..=hi)
            .next_back()
            .map(|(k, v)| (k.clone(), v))
    }

    /// The next-older record for the same `(table, key)`, strictly before
    /// `before`.
    #[must_use]
    pub fn prev(&self, before: &HsKey) -> Option<(HsKey, &HsRecord)> {
        let (lo, _) = Self::key_range(before.table, &before.key);
        self.records
            .range(lo..before.clone())
            .next_back()
            .map(|(k, v)| (k.clone(), v))
    }

    pub fn remove(&mut self, key: &HsKey) -> Option<HsRecord> {
        self.records.remove(key)
    }

    /// Remove every record belonging to `table`; returns how many.
    pub fn truncate_table(&mut self, table: TableId) -> u64 {
        let before = self.records.len();
        self.records.retain(|k, _| k.table != table);
        let removed = (before - self.records.len()) as u64;
        if removed > 0 {
            tracing::debug!(%table, removed, "history store truncated for table");
        }
        removed
    }

    /// Keep only records for which `keep` returns true.
    pub fn retain<F>(&mut self, keep: F)
    where
        F: FnMut(&HsKey, &mut HsRecord) -> bool,
    {
        self.records.retain(keep);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HsKey, &HsRecord)> {
        self.records.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tamarack_types::TxnId;

    fn record(start: u64, stop: u64, value: &[u8]) -> HsRecord {
        let tw = TimeWindow::with_start(TxnId::new(1), Timestamp::new(start), Timestamp::new(start))
            .with_stop(TxnId::new(2), Timestamp::new(stop), Timestamp::new(stop));
        HsRecord {
            tw,
            value: HsValue::Standard(value.to_vec()),
        }
    }

    #[test]
    fn newest_and_prev_walk_descending() {
        let mut hs = HistoryStore::new();
        let table = TableId::new(3);
        let key = Key::from("k");
        hs.insert(table, key.clone(), record(10, 20, b"a"));
        hs.insert(table, key.clone(), record(20, 30, b"b"));

        let (k1, r1) = hs.newest(table, &key).unwrap();
        assert_eq!(k1.start_ts, Timestamp::new(20));
        assert_eq!(r1.value, HsValue::Standard(b"b".to_vec()));

        let (k2, r2) = hs.prev(&k1).unwrap();
        assert_eq!(k2.start_ts, Timestamp::new(10));
        assert_eq!(r2.value, HsValue::Standard(b"a".to_vec()));

        assert!(hs.prev(&k2).is_none());
    }

    #[test]
    fn per_key_scans_do_not_cross_keys_or_tables() {
        let mut hs = HistoryStore::new();
        hs.insert(TableId::new(1), Key::from("a"), record(10, 20, b"x"));
        hs.insert(TableId::new(1), Key::from("b"), record(50, 60, b"y"));
        hs.insert(TableId::new(2), Key::from("a"), record(70, 80, b"z"));

        let (k, _) = hs.newest(TableId::new(1), &Key::from("a")).unwrap();
        assert_eq!(k.start_ts, Timestamp::new(10));
        assert!(hs.prev(&k).is_none());
    }

    #[test]
    fn counter_orders_same_start_timestamp() {
        let mut hs = HistoryStore::new();
        let table = TableId::new(1);
        let key = Key::from("k");
        let first = hs.insert(table, key.clone(), record(10, 20, b"old"));
        let second = hs.insert(table, key.clone(), record(10, 20, b"new"));
        assert!(first.counter < second.counter);

        // Newest-first sees the later insert first.
        let (k, r) = hs.newest(table, &key).unwrap();
        assert_eq!(k, second);
        assert_eq!(r.value, HsValue::Standard(b"new".to_vec()));
    }

    #[test]
    fn truncate_table_is_scoped() {
        let mut hs = HistoryStore::new();
        hs.insert(TableId::new(1), Key::from("a"), record(10, 20, b"x"));
        hs.insert(TableId::new(1), Key::from("b"), record(10, 20, b"y"));
        hs.insert(TableId::new(2), Key::from("a"), record(10, 20, b"z"));

        assert_eq!(hs.truncate_table(TableId::new(1)), 2);
        assert_eq!(hs.len(), 1);
        assert_eq!(hs.truncate_table(TableId::new(1)), 0);
    }

    #[test]
    fn remove_round_trip() {
        let mut hs = HistoryStore::new();
        let k = hs.insert(TableId::new(1), Key::from("a"), record(10, 20, b"x"));
        assert!(hs.remove(&k).is_some());
        assert!(hs.remove(&k).is_none());
        assert!(hs.is_empty());
    }
}
