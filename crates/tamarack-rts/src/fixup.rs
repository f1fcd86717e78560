//! On-disk value fixup.
//!
//! When no stable in-memory update exists for a key, the on-disk time window
//! itself may be unstable. Every mutating outcome is applied by splicing a
//! synthesized update onto the key's log through the page guard, never by
//! rewriting the page image, which keeps the abort step itself
//! crash-atomic.

use smallvec::{smallvec, SmallVec};
use tamarack_btree::{PageGuard, Update};
use tamarack_error::Result;
use tamarack_history::HistoryStore;
use tamarack_types::{Key, TableId, TimeWindow, Timestamp, TxnId};

use crate::context::RollbackContext;
use crate::reconstruct::restore_from_history;
use crate::stats::bump;

/// Fix the on-disk version of one key against the rollback timestamp.
///
/// Returns whether the on-disk value is stable (no action was needed), so a
/// caller iterating a repeat group can short-circuit.
///
/// Decision table, evaluated on the unpacked on-disk time window:
/// 1. Unstable start (durable start above the rollback point, start
///    transaction invisible under the recovery snapshot, or no stop while
///    prepared): reconstruct from history when a history store exists,
///    otherwise the key is simply removed.
/// 2. Stable start but unstable or prepared stop: a single-point prepared
///    artifact behaves like an unstable start; otherwise the deletion is
///    undone by restoring the original on-disk value as a fresh standard
///    update.
/// 3. Otherwise the value is stable.
pub fn abort_ondisk_kv(
    ctx: &RollbackContext,
    hs: &mut HistoryStore,
    guard: &mut PageGuard<'_>,
    table: TableId,
    key: &Key,
) -> Result<bool> {
    let Some(cell) = guard.disk_cell(key) else {
        // No on-disk version for this key (insert-list only).
        return Ok(true);
    };
    let tw = cell.tw.clone();
    let disk_value = cell.value.clone();
    let prepared = tw.prepared;

    if tw.durable_start_ts > ctx.rollback_ts
        || !ctx.txn_visible(tw.start_txn)
        || (!tw.has_stop() && prepared)
    {
        tracing::debug!(
            durable_start_ts = %tw.durable_start_ts,
            start_ts = %tw.start_ts,
            prepared,
            stable_ts = %ctx.rollback_ts,
            txn = %tw.start_txn,
            "on-disk update aborted"
        );
        replace_unstable_start(ctx, hs, guard, table, key, &tw, &disk_value)?;
        Ok(false)
    } else if tw.has_stop()
        && (tw.durable_stop_ts > ctx.rollback_ts || !ctx.txn_visible(tw.stop_txn) || prepared)
    {
        if tw.is_single_point() {
            // Prepared transactions can leave identical start and stop
            // windows on disk; treat it like an unstable start.
            debug_assert!(prepared, "single-point window without prepare");
            replace_unstable_start(ctx, hs, guard, table, key, &tw, &disk_value)?;
        } else {
            // The value is stable but its deletion is not: undo the remove
            // by restoring the original on-disk value as a fresh update.
            let txn = if ctx.recovering {
                TxnId::NONE
            } else {
                tw.start_txn
            };
            let mut update = Update::standard(txn, tw.start_ts, tw.durable_start_ts, disk_value);
            update.restored_from_ds = true;
            bump(&ctx.stats.keys_restored);
            tracing::debug!(
                start_ts = %tw.start_ts,
                durable_ts = %tw.durable_start_ts,
                stable_ts = %ctx.rollback_ts,
                removed_stop_ts = %tw.stop_ts,
                removed_durable_stop_ts = %tw.durable_stop_ts,
                prepared,
                "key restored"
            );
            guard.splice(key, smallvec![update])?;
        }
        Ok(false)
    } else {
        // Stable version according to the timestamp.
        Ok(true)
    }
}

/// The on-disk start is unstable: find a replacement in the history store,
/// or remove the key when there is none to consult.
fn replace_unstable_start(
    ctx: &RollbackContext,
    hs: &mut HistoryStore,
    guard: &mut PageGuard<'_>,
    table: TableId,
    key: &Key,
    tw: &TimeWindow,
    disk_value: &[u8],
) -> Result<()> {
    if ctx.in_memory {
        // In-memory databases have no history store to fall back on.
        bump(&ctx.stats.keys_removed);
        tracing::debug!(key = %key, "key removed");
        let tombstone: SmallVec<[Update; 2]> = smallvec![Update::tombstone(
            TxnId::NONE,
            Timestamp::NONE,
            Timestamp::NONE
        )];
        guard.splice(key, tombstone)?;
        return Ok(());
    }
    let restored = restore_from_history(ctx, hs, table, key, tw, disk_value)?;
    guard.splice(key, restored.updates)?;
    // Only after the splice lands is the consumed record gone: the stable
    // version is represented on the data page again.
    if let Some(hs_key) = restored.consumed {
        hs.remove(&hs_key);
        bump(&ctx.stats.hs_removed);
        bump(&ctx.stats.hs_removed_stable);
    }
    Ok(())
}
