//! Per-file applicability and the history store passes.

use std::collections::BTreeMap;

use tamarack_btree::BTree;
use tamarack_engine::{Catalog, CheckpointMeta, TableMeta, HS_URI, METADATA_URI};
use tamarack_error::{Result, TamarackError};
use tamarack_history::HistoryStore;
use tamarack_types::{TableId, Timestamp};

use crate::context::RollbackContext;
use crate::stats::{bump, bump_by};
use crate::tree::rollback_to_stable_tree;

/// Decide from checkpoint metadata alone whether one file needs rollback,
/// and run it when it does.
///
/// The catalog file and the history store are never handled here (the
/// history store gets its own final pass during recovery); neither are
/// non-file objects. A file is rolled back when any of these hold: the tree
/// is already modified in cache, its checkpoint's maximum durable timestamp
/// exceeds the rollback timestamp, the checkpoint carried prepared updates,
/// no checkpoint carried a durable timestamp at all, or the checkpoint's
/// newest transaction postdates the recovery snapshot.
pub fn rollback_to_stable_btree_apply(
    ctx: &RollbackContext,
    trees: &mut BTreeMap<TableId, BTree>,
    hs: &mut HistoryStore,
    uri: &str,
    meta: &TableMeta,
) -> Result<()> {
    if uri == METADATA_URI || uri == HS_URI || !uri.starts_with("file:") {
        return Ok(());
    }

    let ckpt = match &meta.checkpoint {
        Some(json) => CheckpointMeta::parse(json)?,
        None => CheckpointMeta::default(),
    };
    let max_durable_ts = ckpt.max_durable_ts();

    let inconsistent_ckpt = ctx.txn_newer_than_recovery_snapshot(ckpt.newest_txn);
    if inconsistent_ckpt {
        bump(&ctx.stats.inconsistent_checkpoints);
    }

    // During recovery and shutdown, skip tables that were never
    // checkpointed, and timestamped tables when there is no stable
    // timestamp to roll them back to.
    if (ctx.recovering || ctx.closing)
        && (ckpt.addr_size == 0 || (ctx.rollback_ts.is_none() && !max_durable_ts.is_none()))
    {
        tracing::debug!(
            uri,
            addr_size = ckpt.addr_size,
            %max_durable_ts,
            "skip rollback to stable"
        );
        return Ok(());
    }

    let tree_modified = trees.get(&meta.id).is_some_and(|t| t.modified);
    let perform_rts = tree_modified
        || max_durable_ts > ctx.rollback_ts
        || ckpt.prepared
        || !ckpt.durable_ts_found
        || inconsistent_ckpt;

    if perform_rts {
        let tree = trees
            .get_mut(&meta.id)
            .ok_or_else(|| TamarackError::not_found(uri))?;
        tracing::debug!(
            uri,
            %max_durable_ts,
            modified = tree_modified,
            prepared = ckpt.prepared,
            durable_ts_found = ckpt.durable_ts_found,
            newest_txn = %ckpt.newest_txn,
            inconsistent_ckpt,
            "tree rolled back"
        );
        rollback_to_stable_tree(ctx, tree, hs)?;
    } else {
        bump(&ctx.stats.trees_skipped);
        tracing::debug!(
            uri,
            %max_durable_ts,
            stable_ts = %ctx.rollback_ts,
            newest_txn = %ckpt.newest_txn,
            "tree skipped"
        );
    }

    // A table whose checkpoints never carried a durable timestamp is not
    // timestamped and never needed versioning: drop its whole history store
    // footprint. A tree still modified in cache may simply never have been
    // checkpointed, so it keeps its history until it has been.
    let modified_now = trees.get(&meta.id).is_some_and(|t| t.modified);
    if (!perform_rts || !modified_now) && max_durable_ts.is_none() && !ctx.in_memory {
        let removed = hs.truncate_table(meta.id);
        if removed > 0 {
            bump_by(&ctx.stats.hs_removed, removed);
            bump_by(&ctx.stats.hs_removed_stable, removed);
        }
    }

    Ok(())
}

/// The recovery-only final pass over the history store itself.
///
/// Gated by the history store's own checkpoint aggregate: most history
/// records have a stop at or above their start, so the bound takes the
/// newest stop commit timestamp as well as the newest stop durable one.
/// Residual entries whose stop is newer than the rollback timestamp, or
/// still open (the mark of a prepared artifact), are removed.
pub fn hs_final_pass(ctx: &RollbackContext, catalog: &Catalog, hs: &mut HistoryStore) -> Result<()> {
    let meta = catalog
        .get(HS_URI)
        .ok_or_else(|| TamarackError::not_found(HS_URI))?;
    let ckpt = match &meta.checkpoint {
        Some(json) => CheckpointMeta::parse(json)?,
        None => CheckpointMeta::default(),
    };
    let max_durable_ts = ckpt.max_durable_ts_history();
    if max_durable_ts <= ctx.rollback_ts {
        tracing::debug!(
            %max_durable_ts,
            stable_ts = %ctx.rollback_ts,
            "history store skipped"
        );
        return Ok(());
    }
    tracing::debug!(%max_durable_ts, "history store rolled back");

    let stats = &ctx.stats;
    let rollback_ts = ctx.rollback_ts;
    hs.retain(|hs_key, record| {
        let unstable =
            record.tw.durable_stop_ts > rollback_ts || record.tw.stop_ts == Timestamp::MAX;
        if unstable {
            bump(&stats.hs_sweep_removed);
            tracing::debug!(
                table = %hs_key.table,
                start_ts = %hs_key.start_ts,
                durable_stop_ts = %record.tw.durable_stop_ts,
                "history store update aborted"
            );
        }
        !unstable
    });
    Ok(())
}
