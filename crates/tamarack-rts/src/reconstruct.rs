//! History-store reconstruction of a stable version.

use smallvec::{smallvec, SmallVec};
use tamarack_btree::Update;
use tamarack_error::Result;
use tamarack_history::{HistoryStore, HsKey, HsValue};
use tamarack_types::{Key, TableId, TimeWindow, Timestamp, TxnId};

use crate::context::RollbackContext;
use crate::stats::bump;

/// What reconstruction decided for one key.
pub struct Restored {
    /// Newest-first run of updates to splice onto the key's log: either
    /// `[standard]`, `[tombstone, standard]`, or a bare `[tombstone]` when
    /// no stable version exists anywhere.
    pub updates: SmallVec<[Update; 2]>,
    /// The history record the standard update was built from, to be removed
    /// once the splice lands (it is represented on the data page again).
    pub consumed: Option<HsKey>,
}

/// Scan the history store for `(table, key)` in descending start-timestamp
/// order and rebuild the newest version that satisfies the rollback
/// timestamp.
///
/// Records whose start does not exceed the on-disk start (or any record when
/// the on-disk value is prepared) fold into the full-value accumulator:
/// modify deltas apply against the previous reconstruction, standard records
/// replace it wholesale. The first record with a visible start transaction
/// and a durable timestamp at or below the rollback point is the answer;
/// every record visited before it is deleted, because it is newer than the
/// rollback point and becomes invalid once the data store is rewritten.
pub fn restore_from_history(
    ctx: &RollbackContext,
    hs: &mut HistoryStore,
    table: TableId,
    key: &Key,
    disk_tw: &TimeWindow,
    disk_value: &[u8],
) -> Result<Restored> {
    let mut full_value = disk_value.to_vec();
    let mut newer_hs_durable_ts = disk_tw.durable_start_ts;
    let mut first_record = true;
    let mut valid: Option<(HsKey, TimeWindow)> = None;

    loop {
        let Some((hs_key, record)) = hs.newest(table, key) else {
            break;
        };
        let record = record.clone();

        // Records newer than the on-disk version would only make the
        // reconstruction slower (the on-disk version in history is always a
        // full update), except when the on-disk value is prepared.
        if hs_key.start_ts <= disk_tw.start_ts || disk_tw.prepared {
            match &record.value {
                HsValue::Standard(value) => full_value = value.clone(),
                HsValue::Modify(delta) => delta.apply(&mut full_value),
            }
        } else {
            tracing::debug!(
                start_ts = %hs_key.start_ts,
                durable_ts = %record.durable_start_ts(),
                stop_durable_ts = %record.durable_stop_ts(),
                "history store update more recent than on-disk update"
            );
        }

        // Consecutive records' stop/start boundaries must stay consistent.
        // The start may equal the stop when the original commit was out of
        // order, and the first record scanned may postdate the on-page value
        // if eviction raced a checkpoint. Violations mean corruption: fail
        // loudly in diagnostic builds, tolerate in release.
        debug_assert!(
            record.durable_stop_ts() <= newer_hs_durable_ts
                || hs_key.start_ts == record.durable_stop_ts()
                || hs_key.start_ts == newer_hs_durable_ts
                || first_record,
            "history store records out of order"
        );
        if record.durable_stop_ts() < newer_hs_durable_ts {
            bump(&ctx.stats.hs_stop_older_than_newer_start);
        }

        if ctx.txn_visible(record.tw.start_txn) && record.durable_start_ts() <= ctx.rollback_ts {
            tracing::debug!(
                start_ts = %hs_key.start_ts,
                durable_ts = %record.durable_start_ts(),
                stable_ts = %ctx.rollback_ts,
                txn = %record.tw.start_txn,
                "history store update valid"
            );
            debug_assert!(
                disk_tw.prepared || record.tw.start_ts <= disk_tw.start_ts,
                "stable history record newer than the on-disk start"
            );
            valid = Some((hs_key, record.tw.clone()));
            break;
        }

        tracing::debug!(
            start_ts = %hs_key.start_ts,
            durable_ts = %record.durable_start_ts(),
            stable_ts = %ctx.rollback_ts,
            start_txn = %record.tw.start_txn,
            stop_txn = %record.tw.stop_txn,
            "history store update aborted"
        );
        newer_hs_durable_ts = record.durable_start_ts();
        first_record = false;
        hs.remove(&hs_key);
        bump(&ctx.stats.hs_removed);
        bump(&ctx.stats.hs_removed_unstable);
    }

    let Some((hs_key, hs_tw)) = valid else {
        // Nothing in history satisfies the rollback point: the key is gone.
        bump(&ctx.stats.keys_removed);
        tracing::debug!(key = %key, "key removed");
        return Ok(Restored {
            updates: smallvec![Update::tombstone(
                TxnId::NONE,
                Timestamp::NONE,
                Timestamp::NONE
            )],
            consumed: None,
        });
    };

    // Updates restored during recovery get no transaction id: write
    // generations are re-initialized after rollback and cached ids would be
    // wrong. On-disk pages get theirs reset when unpacked into cache.
    let restored_txn = |txn: TxnId| if ctx.recovering { TxnId::NONE } else { txn };

    let mut standard = Update::standard(
        restored_txn(hs_tw.start_txn),
        hs_tw.start_ts,
        hs_tw.durable_start_ts,
        full_value,
    );
    standard.restored_from_hs = true;
    bump(&ctx.stats.hs_restored_updates);
    tracing::debug!(
        txn = %standard.txn,
        start_ts = %standard.start_ts,
        durable_ts = %standard.durable_ts,
        "update restored from history store"
    );

    let mut updates: SmallVec<[Update; 2]> = SmallVec::new();
    // The record's own stop may also be stable: the original chain carried a
    // tombstone at that point, so restore the deletion too.
    if hs_tw.has_stop()
        && ctx.txn_visible(hs_tw.stop_txn)
        && hs_tw.durable_stop_ts <= ctx.rollback_ts
    {
        debug_assert!(
            hs_tw.durable_stop_ts.is_none()
                || hs_tw.durable_stop_ts < newer_hs_durable_ts
                || disk_tw.prepared,
            "restored tombstone timestamp out of order"
        );
        let mut tombstone = Update::tombstone(
            restored_txn(hs_tw.stop_txn),
            hs_tw.stop_ts,
            hs_tw.durable_stop_ts,
        );
        tombstone.restored_from_hs = true;
        bump(&ctx.stats.hs_restored_tombstones);
        tracing::debug!(
            txn = %tombstone.txn,
            start_ts = %tombstone.start_ts,
            durable_ts = %tombstone.durable_ts,
            "tombstone restored from history store"
        );
        updates.push(tombstone);
    }
    updates.push(standard);

    Ok(Restored {
        updates,
        consumed: Some(hs_key),
    })
}
