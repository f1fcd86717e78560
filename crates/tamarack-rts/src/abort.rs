//! The update-chain abort engine.

use tamarack_btree::UpdateLog;
use tamarack_history::HistoryStore;
use tamarack_types::{Key, TableId, Timestamp};

use crate::context::RollbackContext;
use crate::stats::bump;

/// Delete history store records for `key` until the first record whose start
/// timestamp falls below `ts`.
///
/// Walks newest-first; removals at exactly `ts` and removals above it are
/// counted separately.
pub fn delete_hs_newer(
    ctx: &RollbackContext,
    hs: &mut HistoryStore,
    table: TableId,
    key: &Key,
    ts: Timestamp,
) {
    while let Some((hs_key, _)) = hs.newest(table, key) {
        if hs_key.start_ts < ts {
            break;
        }
        let at_boundary = hs_key.start_ts == ts;
        hs.remove(&hs_key);
        bump(&ctx.stats.hs_removed);
        if at_boundary {
            bump(&ctx.stats.hs_removed_stable);
        } else {
            bump(&ctx.stats.hs_removed_unstable);
        }
        tracing::debug!(
            %table,
            key = %key,
            start_ts = %hs_key.start_ts,
            "history store update removed"
        );
    }
}

/// Abort every update in `log` newer than the rollback timestamp, newest to
/// oldest. Returns whether a stable update was found; the caller uses that to
/// decide if the on-disk base value needs inspection too.
///
/// Aborting marks a record dead in place (transaction id set to the aborted
/// sentinel, timestamps zeroed); already-aborted records are passed over.
/// Processing stops at the first surviving record; everything older is
/// covered by a previous stable point and left untouched.
///
/// When the stable update (or a stable tombstone covering it) was itself
/// restored from the history store, the history records at or above its start
/// timestamp are reachable again from the chain and are deleted; the flag is
/// cleared so a future write re-populates history with a fresh stop point.
pub fn abort_update_log(
    ctx: &RollbackContext,
    hs: &mut HistoryStore,
    table: TableId,
    key: &Key,
    log: &mut UpdateLog,
) -> bool {
    let mut stable_idx: Option<u32> = None;
    let mut cur = log.head_index();
    while let Some(idx) = cur {
        let next = log.prev_index(idx);
        let update = log.get(idx);
        if update.is_aborted() {
            cur = next;
            continue;
        }
        if ctx.rollback_ts < update.durable_ts || update.prepare.is_in_progress() {
            tracing::debug!(
                txn = %update.txn,
                durable_ts = %update.durable_ts,
                stable_ts = %ctx.rollback_ts,
                prepared = update.prepare.is_in_progress(),
                "rollback to stable update aborted"
            );
            log.get_mut(idx).abort();
            bump(&ctx.stats.updates_aborted);
            cur = next;
        } else {
            stable_idx = Some(idx);
            break;
        }
    }

    let Some(stable) = stable_idx else {
        return false;
    };

    if log.get(stable).restored_from_hs {
        // A stable tombstone restored from history covers the standard
        // update restored just below it; find that update so the deletion
        // boundary and the flag cleanup reach both.
        let mut tombstone_idx = None;
        let mut value_idx = Some(stable);
        if log.get(stable).is_tombstone() {
            tombstone_idx = Some(stable);
            value_idx = None;
            let mut cur = log.prev_index(stable);
            while let Some(idx) = cur {
                if !log.get(idx).is_aborted() {
                    debug_assert!(
                        !log.get(idx).is_tombstone() && log.get(idx).restored_from_hs,
                        "record under a restored tombstone must be a restored value"
                    );
                    value_idx = Some(idx);
                    break;
                }
                cur = log.prev_index(idx);
            }
        }

        // If the value under the tombstone was reclaimed as obsolete, the
        // tombstone's own timestamp bounds the deletion instead.
        let boundary = match value_idx {
            Some(idx) => log.get(idx).start_ts,
            None => log.get(tombstone_idx.expect("tombstone present")).start_ts,
        };
        delete_hs_newer(ctx, hs, table, key, boundary);

        if let Some(idx) = value_idx {
            log.get_mut(idx).restored_from_hs = false;
        }
        if let Some(idx) = tombstone_idx {
            log.get_mut(idx).restored_from_hs = false;
        }
    }

    true
}
