//! Per-page abort processing and fast-truncate reversal.

use tamarack_btree::{BTree, RefId, RefState};
use tamarack_error::Result;
use tamarack_history::HistoryStore;

use crate::abort::abort_update_log;
use crate::context::RollbackContext;
use crate::fixup::abort_ondisk_kv;
use crate::skip::page_needs_abort;
use crate::stats::bump;

/// Abort everything on one leaf page that is newer than the rollback
/// timestamp.
///
/// Even a clean page may carry modifications needing rollback, because
/// eviction writes the newest versions to the page; a clean page is re-checked
/// against its aggregate before being passed over.
///
/// Keys on the disk image get their update logs aborted first; only when no
/// stable in-memory update survives is the on-disk value itself inspected.
/// Insert-list keys (absent from the image) have no on-disk value to fix.
pub fn abort_page_updates(
    ctx: &RollbackContext,
    hs: &mut HistoryStore,
    tree: &mut BTree,
    ref_id: RefId,
) -> Result<()> {
    {
        let slot = tree.slot(ref_id);
        if !slot.dirty && !page_needs_abort(ctx, slot, tree.kind) {
            tracing::debug!(r = ref_id.get(), "page skipped");
            return Ok(());
        }
    }
    bump(&ctx.stats.pages_visited);
    tracing::debug!(
        r = ref_id.get(),
        modified = tree.slot(ref_id).dirty,
        "page rolled back"
    );

    let table = tree.id;
    let mut guard = tree.page_guard(ref_id);

    for key in guard.disk_keys() {
        let stable_update_found = match guard.log_mut(&key) {
            Some(log) => abort_update_log(ctx, hs, table, &key, log),
            None => false,
        };
        if !stable_update_found {
            abort_ondisk_kv(ctx, hs, &mut guard, table, &key)?;
        }
    }

    for key in guard.insert_keys() {
        if let Some(log) = guard.log_mut(&key) {
            abort_update_log(ctx, hs, table, &key, log);
        }
    }

    Ok(())
}

/// Review an internal page's children for fast-truncates to reverse.
///
/// A fast-truncated subtree is either still in the `Deleted` state, where
/// the truncate record carries the timestamps, or was instantiated since,
/// in which case the timestamps moved onto individual updates and the leaf
/// path handles it. Only the first kind is reversed here, which also avoids
/// double-processing.
pub fn abort_fast_truncate(ctx: &RollbackContext, tree: &mut BTree, internal_id: RefId) {
    for child in tree.children(internal_id) {
        let slot = tree.slot(child);
        if slot.state != RefState::Deleted {
            continue;
        }
        if let Some(del) = slot.del {
            if ctx.rollback_ts < del.durable_ts {
                tree.rollback_fast_truncate(child);
                bump(&ctx.stats.fast_truncates_rolled_back);
            }
        }
    }
}
