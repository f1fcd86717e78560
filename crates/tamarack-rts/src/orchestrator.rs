//! Top-level rollback-to-stable orchestration.
//!
//! One invocation runs the strictly sequential sequence: quiesce the
//! history-store-writing eviction categories, validate that no transaction
//! is active, walk every file in the catalog, finalize the history store
//! (recovery only), force a checkpoint, and roll the global durable
//! timestamp back to the stable timestamp. The schema and checkpoint locks
//! are held for the whole sequence, so neither a second invocation nor
//! concurrent DDL or checkpointing can interleave.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};
use tamarack_engine::{Engine, TableMeta};
use tamarack_error::{Result, TamarackError};
use tamarack_types::Timestamp;

use crate::apply::{hs_final_pass, rollback_to_stable_btree_apply};
use crate::context::RollbackContext;
use crate::stats::StatsSnapshot;

/// Outcome of one rollback-to-stable invocation.
#[derive(Debug, Clone, Copy)]
pub struct RtsReport {
    /// The stable timestamp the engine was rolled back to.
    pub rollback_ts: Timestamp,
    pub stats: StatsSnapshot,
}

/// Roll every table back to the stable timestamp.
///
/// Fails with an illegal-state error if any transaction is active; nothing
/// is touched in that case. When `force_checkpoint` is set (and the engine
/// is not in-memory), a checkpoint is forced at the end so the on-disk and
/// in-memory states converge.
pub fn rollback_to_stable(engine: &mut Engine, force_checkpoint: bool) -> Result<RtsReport> {
    // Exclusive for the whole sequence: no concurrent DDL, no concurrent
    // checkpoint, no second invocation.
    let schema_lock = Arc::clone(&engine.schema_lock);
    let _schema_guard = schema_lock.lock();
    let checkpoint_lock = Arc::clone(&engine.checkpoint_lock);
    let _checkpoint_guard = checkpoint_lock.lock();

    engine.rts_running.store(true, Ordering::Release);
    let result = rollback_to_stable_locked(engine, force_checkpoint);
    engine.rts_running.store(false, Ordering::Release);
    result
}

fn rollback_to_stable_locked(engine: &mut Engine, force_checkpoint: bool) -> Result<RtsReport> {
    // Eviction threads writing into the history store would interfere with
    // the active-transaction check; hold the pass lock across it. The guard
    // releases on every exit path of this scope.
    let pass_lock = Arc::clone(&engine.eviction.pass_lock);
    {
        let _pass_guard = quiesce_eviction(engine, &pass_lock);
        if engine.txns.any_active() {
            return Err(TamarackError::illegal_state(
                "rollback_to_stable illegal with active transactions",
            ));
        }
    }

    // Copy the stable timestamp once: re-reading it without the oracle's
    // lock mid-walk would violate protocol, even though it is not supposed
    // to move while rollback runs.
    let ctx = RollbackContext::new(engine);
    tracing::info!(
        stable_ts = %ctx.rollback_ts,
        oldest_ts = %engine.oracle.oldest(),
        "performing rollback to stable"
    );
    if engine.recovering {
        if let Some(snap) = &engine.recovery_snapshot {
            tracing::info!(
                snap_min = %snap.snap_min,
                snap_max = %snap.snap_max,
                snapshot_count = snap.active.len(),
                "recovered checkpoint snapshot"
            );
        }
    }

    apply_all(&ctx, engine)?;

    // Converge the on-disk state, then roll the global durable timestamp
    // back to the stable timestamp.
    if !ctx.in_memory && force_checkpoint {
        engine.force_checkpoint()?;
    }
    engine.oracle.set_durable_to_stable();

    Ok(RtsReport {
        rollback_ts: ctx.rollback_ts,
        stats: ctx.stats.snapshot(),
    })
}

/// Apply rollback to every file in the catalog, skipping per-file failures
/// the sweep can survive, then run the history store final pass during
/// recovery.
fn apply_all(ctx: &RollbackContext, engine: &mut Engine) -> Result<()> {
    let entries: Vec<(String, TableMeta)> = engine
        .catalog
        .iter()
        .map(|(uri, meta)| (uri.clone(), meta.clone()))
        .collect();

    let mut files_visited = 0u64;
    for (uri, meta) in entries {
        ctx.progress(files_visited);
        files_visited += 1;

        match rollback_to_stable_btree_apply(ctx, &mut engine.trees, &mut engine.history, &uri, &meta)
        {
            Err(err) if err.is_sweep_skippable(ctx.tolerate_corruption) => {
                tracing::debug!(uri, error = %err, "skipped performing rollback to stable");
            }
            other => other?,
        }
    }

    if ctx.recovering {
        hs_final_pass(ctx, &engine.catalog, &mut engine.history)?;
    }
    Ok(())
}

/// Wait for the history-store-writing eviction categories to quiesce and
/// take the eviction pass lock so they stay quiesced across the
/// active-transaction check.
///
/// Bounded: past the ceiling the operation proceeds without the lock rather
/// than deadlocking, a deliberate availability-over-strictness tradeoff;
/// concurrent history store writes can still slip through after the warning.
fn quiesce_eviction<'a>(
    engine: &Engine,
    pass_lock: &'a Arc<Mutex<()>>,
) -> Option<MutexGuard<'a, ()>> {
    // Shutdown and in-memory configurations cannot race with history store
    // transactions.
    if engine.closing || engine.config.in_memory {
        return None;
    }
    let ceiling = engine.config.quiesce_ceiling();
    let poll = engine.config.quiesce_poll();
    let start = Instant::now();
    loop {
        if !engine.eviction.hs_eviction_active() {
            // Interrupt the server and take the pass lock so the flags
            // cannot be set after this point; then re-check for the race in
            // between.
            engine.eviction.interrupt();
            let guard = pass_lock.lock();
            engine.eviction.clear_interrupt();
            if !engine.eviction.hs_eviction_active() {
                return Some(guard);
            }
            drop(guard);
        }
        if start.elapsed() >= ceiling {
            break;
        }
        std::thread::sleep(poll);
    }
    tracing::warn!("timed out waiting for eviction to quiesce, running rollback to stable");
    None
}

/// Roll a single object back to the stable timestamp.
///
/// Used by schema-drop-style maintenance. Returns `true` when the object was
/// file-backed and handled; `false` tells the schema sweep to continue its
/// descent; there is nothing to do at this level.
pub fn rollback_to_stable_one(engine: &mut Engine, uri: &str) -> Result<bool> {
    if !uri.starts_with("file:") {
        return Ok(false);
    }
    let meta = engine
        .catalog
        .get(uri)
        .cloned()
        .ok_or_else(|| TamarackError::not_found(uri))?;

    // Read the stable timestamp once, as the full sweep does.
    let ctx = RollbackContext::new(engine);
    rollback_to_stable_btree_apply(&ctx, &mut engine.trees, &mut engine.history, uri, &meta)?;
    Ok(true)
}
