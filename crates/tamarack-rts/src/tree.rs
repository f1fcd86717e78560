//! Whole-tree rollback: the walk with the custom skip predicate.

use tamarack_btree::{BTree, RefState};
use tamarack_error::Result;
use tamarack_history::HistoryStore;

use crate::context::RollbackContext;
use crate::page::{abort_fast_truncate, abort_page_updates};
use crate::skip::walk_page_skip;
use crate::stats::bump;

/// Roll one tree back to the rollback timestamp.
///
/// Immediately-durable trees never get their commits wiped (their records
/// would be recovered after a crash and become inconsistent); checkpoint
/// handles and empty trees have nothing to do. Otherwise walk every ref:
/// internal pages get their fast-truncated children reviewed, on-disk leaves
/// go through the skip predicate before being instantiated, and every leaf
/// visited runs the per-page abort.
pub fn rollback_to_stable_tree(
    ctx: &RollbackContext,
    tree: &mut BTree,
    hs: &mut HistoryStore,
) -> Result<()> {
    if tree.immediately_durable {
        tracing::debug!(uri = %tree.uri, "immediately durable tree skipped");
        return Ok(());
    }
    if tree.checkpoint_only {
        return Ok(());
    }
    if tree.is_empty() {
        return Ok(());
    }

    bump(&ctx.stats.trees_rolled_back);
    for ref_id in tree.walk_order() {
        if tree.slot(ref_id).is_internal() {
            // Nothing else to do for internal pages: the rollback never goes
            // far enough back to undo reconciled structure changes.
            abort_fast_truncate(ctx, tree, ref_id);
            continue;
        }
        match tree.slot(ref_id).state {
            // Deleted refs are reviewed through their parent; locked refs
            // belong to someone else.
            RefState::Deleted | RefState::Locked => continue,
            RefState::OnDisk => {
                if walk_page_skip(ctx, tree.slot(ref_id), tree.kind) {
                    continue;
                }
                tree.materialize(ref_id)?;
            }
            RefState::InMemory => {}
        }
        abort_page_updates(ctx, hs, tree, ref_id)?;
    }
    Ok(())
}
