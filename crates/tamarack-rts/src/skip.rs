//! The page skip predicate.

use tamarack_btree::{RefSlot, RefState};
use tamarack_types::TreeKind;

use crate::context::RollbackContext;
use crate::stats::bump;

/// Whether a page has (or may have) modifications newer than the rollback
/// timestamp and therefore needs abort processing.
///
/// A dirty in-memory page always does: eviction writes the newest versions
/// to the page, so even a page that looks clean on disk can carry unstable
/// content once modified. Otherwise the decision comes entirely from the
/// address aggregate: maximum durable timestamp above the rollback point,
/// prepared content anywhere beneath, or (during recovery) a newest
/// transaction id the recovered checkpoint snapshot does not cover.
#[must_use]
pub fn page_needs_abort(ctx: &RollbackContext, slot: &RefSlot, kind: TreeKind) -> bool {
    if slot.dirty {
        return true;
    }
    let Some(addr) = &slot.addr else {
        return false;
    };
    let agg = &addr.aggregate;
    let durable_ts = agg.max_durable_ts(kind);
    let result = durable_ts > ctx.rollback_ts
        || agg.prepared
        || ctx.txn_newer_than_recovery_snapshot(agg.newest_txn);
    tracing::debug!(
        %durable_ts,
        newest_txn = %agg.newest_txn,
        prepared = agg.prepared,
        needs_abort = result,
        "page aggregate reviewed"
    );
    result
}

/// The custom skip predicate handed to the tree walk: a page still on disk
/// whose aggregate proves it stable is never instantiated. Advisory
/// statistics are the only side effect.
#[must_use]
pub fn walk_page_skip(ctx: &RollbackContext, slot: &RefSlot, kind: TreeKind) -> bool {
    // Any state other than on-disk must be looked at.
    if slot.state != RefState::OnDisk {
        return false;
    }
    if page_needs_abort(ctx, slot, kind) {
        return false;
    }
    bump(&ctx.stats.pages_walk_skipped);
    tracing::debug!("page walk skipped");
    true
}
