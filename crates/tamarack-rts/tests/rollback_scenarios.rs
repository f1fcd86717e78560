//! End-to-end rollback-to-stable scenarios against a live engine.

use smallvec::smallvec;
use tamarack_btree::{DiskCell, DiskImage, FastTruncate, RefId, Update, UpdateValue};
use tamarack_engine::{Engine, EngineConfig, RecoverySnapshot, EVICT_DIRTY};
use tamarack_error::TamarackError;
use tamarack_history::{HsRecord, HsValue};
use tamarack_rts::{rollback_to_stable, rollback_to_stable_one};
use tamarack_types::{Key, PrepareState, TableId, TimeWindow, Timestamp, TxnId};

const ORDERS: TableId = TableId::new(7);
const ORDERS_URI: &str = "file:orders";

fn ts(raw: u64) -> Timestamp {
    Timestamp::new(raw)
}

fn cell(key: &str, value: &[u8], txn: u64, start: u64) -> DiskCell {
    DiskCell {
        key: Key::from(key),
        value: value.to_vec(),
        tw: TimeWindow::with_start(TxnId::new(txn), ts(start), ts(start)),
    }
}

fn hs_record(start_txn: u64, start: u64, stop_txn: u64, stop: u64, value: &[u8]) -> HsRecord {
    let tw = TimeWindow::with_start(TxnId::new(start_txn), ts(start), ts(start)).with_stop(
        TxnId::new(stop_txn),
        ts(stop),
        ts(stop),
    );
    HsRecord {
        tw,
        value: HsValue::Standard(value.to_vec()),
    }
}

/// An engine with one checkpointed table holding the given leaf cells.
fn engine_with_orders(cells: Vec<DiskCell>) -> (Engine, RefId) {
    let mut engine = Engine::new(EngineConfig::default());
    let tree = engine.create_table(ORDERS_URI, ORDERS);
    let root = tree.ensure_root();
    let leaf = tree.add_leaf(root, DiskImage::new(cells));
    engine.force_checkpoint().unwrap();
    (engine, leaf)
}

fn splice_update(engine: &mut Engine, leaf: RefId, key: &str, update: Update) {
    let tree = engine.tree_mut(ORDERS).unwrap();
    tree.materialize(leaf).unwrap();
    let mut guard = tree.page_guard(leaf);
    guard.splice(&Key::from(key), smallvec![update]).unwrap();
}

/// The value a reader would see for `key`: the newest live update, falling
/// back to the disk image when the key has no live in-memory update at all.
fn visible_value(engine: &Engine, leaf: RefId, key: &str) -> Option<Vec<u8>> {
    let tree = engine.tree(ORDERS).unwrap();
    let slot = tree.slot(leaf);
    let key = Key::from(key);
    let log = slot
        .page
        .as_ref()
        .and_then(|p| p.as_leaf())
        .and_then(|l| l.log(&key));
    if let Some(live) = log.and_then(|l| l.first_live()) {
        return match &live.value {
            UpdateValue::Standard(v) => Some(v.clone()),
            UpdateValue::Modify(_) => panic!("modify at chain head"),
            UpdateValue::Tombstone => None,
        };
    }
    // No live in-memory update (or a fully-aborted chain): the disk image
    // is what remains visible.
    slot.disk
        .as_ref()
        .and_then(|img| img.cell(&key))
        .map(|c| c.value.clone())
}

// ---------------------------------------------------------------------------
// Preconditions
// ---------------------------------------------------------------------------

#[test]
fn active_transactions_are_rejected_before_any_work() {
    let (mut engine, _leaf) = engine_with_orders(vec![cell("a", b"1", 2, 10)]);
    engine.oracle.set_stable(ts(15)).unwrap();
    engine.txns.begin(TxnId::new(99));

    let err = rollback_to_stable(&mut engine, true).unwrap_err();
    assert!(matches!(err, TamarackError::IllegalState(_)));
    // Nothing was touched: no extra checkpoint, durable untouched.
    assert_eq!(engine.checkpoints_forced(), 1);
    assert!(!engine.oracle.has_durable());
    assert!(!engine.tree(ORDERS).unwrap().modified);

    // With the transaction gone the same call goes through.
    engine.txns.end(TxnId::new(99));
    rollback_to_stable(&mut engine, true).unwrap();
}

// ---------------------------------------------------------------------------
// Aborting unstable in-memory updates
// ---------------------------------------------------------------------------

#[test]
fn committed_but_unstable_updates_are_discarded() {
    let (mut engine, leaf) = engine_with_orders(vec![cell("a", b"base", 2, 10)]);
    splice_update(
        &mut engine,
        leaf,
        "a",
        Update::standard(TxnId::new(5), ts(20), ts(20), b"new".to_vec()),
    );
    engine.oracle.set_stable(ts(15)).unwrap();

    let report = rollback_to_stable(&mut engine, true).unwrap();
    assert_eq!(report.rollback_ts, ts(15));
    assert_eq!(report.stats.updates_aborted, 1);
    assert_eq!(visible_value(&engine, leaf, "a"), Some(b"base".to_vec()));
    // Durable rolled back to stable and a fresh checkpoint taken.
    assert_eq!(engine.oracle.durable(), ts(15));
    assert_eq!(engine.checkpoints_forced(), 2);
}

#[test]
fn prepared_updates_are_aborted_regardless_of_timestamps() {
    let (mut engine, leaf) = engine_with_orders(vec![cell("a", b"base", 2, 3)]);
    let mut prepared = Update::standard(TxnId::new(5), ts(5), ts(5), b"prep".to_vec());
    prepared.prepare = PrepareState::InProgress;
    splice_update(&mut engine, leaf, "a", prepared);
    // The prepared update's timestamps are well below stable; it still goes.
    engine.oracle.set_stable(ts(100)).unwrap();

    let report = rollback_to_stable(&mut engine, false).unwrap();
    assert_eq!(report.stats.updates_aborted, 1);
    assert_eq!(visible_value(&engine, leaf, "a"), Some(b"base".to_vec()));
}

#[test]
fn surviving_chain_stays_monotonic() {
    let (mut engine, leaf) = engine_with_orders(vec![cell("a", b"base", 2, 1)]);
    for (txn, start) in [(3, 10), (4, 20), (5, 30)] {
        splice_update(
            &mut engine,
            leaf,
            "a",
            Update::standard(TxnId::new(txn), ts(start), ts(start), vec![start as u8]),
        );
    }
    engine.oracle.set_stable(ts(25)).unwrap();

    let report = rollback_to_stable(&mut engine, false).unwrap();
    assert_eq!(report.stats.updates_aborted, 1);

    let tree = engine.tree(ORDERS).unwrap();
    let log = tree
        .slot(leaf)
        .page
        .as_ref()
        .unwrap()
        .as_leaf()
        .unwrap()
        .log(&Key::from("a"))
        .unwrap();
    assert!(log.is_monotonic());
    let live: Vec<u64> = log
        .iter()
        .filter(|u| !u.is_aborted())
        .map(|u| u.start_ts.get())
        .collect();
    assert_eq!(live, vec![20, 10]);
}

// ---------------------------------------------------------------------------
// History round trip
// ---------------------------------------------------------------------------

fn history_round_trip_at(stable: u64) -> (Engine, RefId) {
    let mut engine = Engine::new(EngineConfig::default());
    let tree = engine.create_table(ORDERS_URI, ORDERS);
    let root = tree.ensure_root();
    let leaf = tree.add_leaf(root, DiskImage::new(vec![cell("k", b"c", 3, 30)]));
    engine
        .history
        .insert(ORDERS, Key::from("k"), hs_record(1, 10, 2, 20, b"a"));
    engine
        .history
        .insert(ORDERS, Key::from("k"), hs_record(2, 20, 3, 30, b"b"));
    engine.force_checkpoint().unwrap();
    engine.oracle.set_stable(ts(stable)).unwrap();
    rollback_to_stable(&mut engine, false).unwrap();
    (engine, leaf)
}

#[test]
fn history_round_trip_to_the_older_version() {
    let (engine, leaf) = history_round_trip_at(15);
    assert_eq!(visible_value(&engine, leaf, "k"), Some(b"a".to_vec()));
    // Both history records are gone: one consumed, one unstable.
    assert!(engine.history.is_empty());
}

#[test]
fn history_round_trip_to_the_newer_version() {
    let (engine, leaf) = history_round_trip_at(25);
    assert_eq!(visible_value(&engine, leaf, "k"), Some(b"b".to_vec()));
    // The older record is still there for still-valid readers.
    assert_eq!(engine.history.len(), 1);
    assert!(engine.history.newest(ORDERS, &Key::from("k")).is_some());
}

#[test]
fn history_round_trip_to_before_everything() {
    let (engine, leaf) = history_round_trip_at(5);
    assert_eq!(visible_value(&engine, leaf, "k"), None);
    assert!(engine.history.is_empty());
}

// ---------------------------------------------------------------------------
// On-disk fixup
// ---------------------------------------------------------------------------

#[test]
fn unstable_deletion_is_undone_not_tombstoned() {
    let mut engine = Engine::new(EngineConfig::default());
    let tree = engine.create_table(ORDERS_URI, ORDERS);
    let root = tree.ensure_root();
    let tw = TimeWindow::with_start(TxnId::new(2), ts(10), ts(10)).with_stop(
        TxnId::new(3),
        ts(20),
        ts(20),
    );
    let leaf = tree.add_leaf(
        root,
        DiskImage::new(vec![DiskCell {
            key: Key::from("k"),
            value: b"v".to_vec(),
            tw,
        }]),
    );
    engine.force_checkpoint().unwrap();
    engine.oracle.set_stable(ts(15)).unwrap();

    let report = rollback_to_stable(&mut engine, false).unwrap();
    assert_eq!(report.stats.keys_restored, 1);
    assert_eq!(report.stats.keys_removed, 0);
    assert_eq!(visible_value(&engine, leaf, "k"), Some(b"v".to_vec()));
    let tree = engine.tree(ORDERS).unwrap();
    let live = tree
        .slot(leaf)
        .page
        .as_ref()
        .unwrap()
        .as_leaf()
        .unwrap()
        .log(&Key::from("k"))
        .unwrap()
        .first_live()
        .unwrap()
        .clone();
    assert!(live.restored_from_ds);
    assert_eq!(live.start_ts, ts(10));
}

#[test]
fn in_memory_engine_removes_keys_instead_of_consulting_history() {
    let mut engine = Engine::new(EngineConfig {
        in_memory: true,
        ..EngineConfig::default()
    });
    let tree = engine.create_table(ORDERS_URI, ORDERS);
    let root = tree.ensure_root();
    let leaf = tree.add_leaf(root, DiskImage::new(vec![cell("k", b"v", 3, 30)]));
    engine.oracle.set_stable(ts(15)).unwrap();

    let report = rollback_to_stable(&mut engine, true).unwrap();
    assert_eq!(report.stats.keys_removed, 1);
    assert_eq!(visible_value(&engine, leaf, "k"), None);
    // In-memory engines never checkpoint, even when asked to.
    assert_eq!(engine.checkpoints_forced(), 0);
    assert_eq!(engine.oracle.durable(), ts(15));
}

// ---------------------------------------------------------------------------
// Idempotence
// ---------------------------------------------------------------------------

#[test]
fn second_rollback_at_the_same_timestamp_is_a_no_op() {
    let (mut engine, leaf) = engine_with_orders(vec![cell("a", b"base", 2, 10)]);
    splice_update(
        &mut engine,
        leaf,
        "a",
        Update::standard(TxnId::new(5), ts(20), ts(20), b"new".to_vec()),
    );
    engine
        .history
        .insert(ORDERS, Key::from("a"), hs_record(1, 5, 2, 10, b"ancient"));
    engine.oracle.set_stable(ts(15)).unwrap();

    let first = rollback_to_stable(&mut engine, false).unwrap();
    assert!(first.stats.mutated_anything());

    let second = rollback_to_stable(&mut engine, false).unwrap();
    assert_eq!(second.stats.updates_aborted, 0);
    assert_eq!(second.stats.hs_removed, 0);
    assert_eq!(second.stats.keys_removed, 0);
    assert_eq!(second.stats.keys_restored, 0);
    assert!(!second.stats.mutated_anything());
}

// ---------------------------------------------------------------------------
// Empty tables and skips
// ---------------------------------------------------------------------------

#[test]
fn empty_table_produces_no_work_at_all() {
    let mut engine = Engine::new(EngineConfig::default());
    engine.create_table("file:empty", TableId::new(3));
    engine.oracle.set_stable(ts(15)).unwrap();

    let report = rollback_to_stable(&mut engine, false).unwrap();
    assert_eq!(report.stats, Default::default());
}

#[test]
fn fully_stable_table_is_skipped_from_metadata_alone() {
    let (mut engine, leaf) = engine_with_orders(vec![cell("a", b"1", 2, 10)]);
    engine.oracle.set_stable(ts(50)).unwrap();

    let report = rollback_to_stable(&mut engine, false).unwrap();
    assert_eq!(report.stats.trees_skipped, 1);
    assert_eq!(report.stats.trees_rolled_back, 0);
    assert_eq!(report.stats.pages_visited, 0);
    // Never even instantiated.
    assert_eq!(
        engine.tree(ORDERS).unwrap().slot(leaf).state,
        tamarack_btree::RefState::OnDisk
    );
}

// ---------------------------------------------------------------------------
// Fast truncate
// ---------------------------------------------------------------------------

#[test]
fn unstable_fast_truncate_is_reversed() {
    let (mut engine, _leaf) = engine_with_orders(vec![cell("a", b"1", 2, 10)]);
    let tree = engine.tree_mut(ORDERS).unwrap();
    let root = tree.root().unwrap();
    let second = tree.add_leaf(root, DiskImage::new(vec![cell("m", b"2", 2, 10)]));
    tree.fast_truncate(
        second,
        FastTruncate {
            txn: TxnId::new(9),
            commit_ts: ts(40),
            durable_ts: ts(40),
        },
    );
    engine.oracle.set_stable(ts(15)).unwrap();

    let report = rollback_to_stable(&mut engine, false).unwrap();
    assert_eq!(report.stats.fast_truncates_rolled_back, 1);
    let tree = engine.tree(ORDERS).unwrap();
    assert_eq!(tree.slot(second).state, tamarack_btree::RefState::OnDisk);
    assert!(tree.slot(second).del.is_none());
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

#[test]
fn recovery_final_pass_sweeps_residual_history() {
    let mut engine = Engine::new(EngineConfig::default());
    let tree = engine.create_table(ORDERS_URI, ORDERS);
    let root = tree.ensure_root();
    tree.add_leaf(root, DiskImage::new(vec![cell("a", b"1", 2, 10)]));
    engine
        .history
        .insert(ORDERS, Key::from("stable"), hs_record(1, 5, 2, 10, b"x"));
    engine
        .history
        .insert(ORDERS, Key::from("unstable"), hs_record(1, 5, 2, 40, b"y"));
    engine.force_checkpoint().unwrap();

    engine.recovering = true;
    engine.oracle.set_stable(ts(15)).unwrap();
    let report = rollback_to_stable(&mut engine, false).unwrap();

    assert_eq!(report.stats.hs_sweep_removed, 1);
    assert_eq!(engine.history.len(), 1);
    assert!(engine
        .history
        .newest(ORDERS, &Key::from("stable"))
        .is_some());
}

#[test]
fn inconsistent_checkpoint_forces_the_walk() {
    let (mut engine, _leaf) = engine_with_orders(vec![cell("a", b"1", 7, 10)]);
    engine.recovering = true;
    engine.recovery_snapshot = Some(RecoverySnapshot {
        snap_min: TxnId::new(5),
        snap_max: TxnId::new(10),
        active: vec![],
    });
    // Everything is timestamp-stable, but the checkpoint's newest txn (7)
    // is at or above the snapshot minimum.
    engine.oracle.set_stable(ts(50)).unwrap();

    let report = rollback_to_stable(&mut engine, false).unwrap();
    assert_eq!(report.stats.inconsistent_checkpoints, 1);
    assert_eq!(report.stats.trees_rolled_back, 1);
    assert_eq!(report.stats.pages_visited, 1);
    // The writing transaction is visible under the snapshot, so the value
    // itself survives.
    assert_eq!(report.stats.keys_removed, 0);
}

#[test]
fn snapshot_invisible_transaction_loses_its_on_disk_value() {
    let (mut engine, leaf) = engine_with_orders(vec![cell("a", b"1", 7, 10)]);
    engine.recovering = true;
    engine.recovery_snapshot = Some(RecoverySnapshot {
        snap_min: TxnId::new(2),
        snap_max: TxnId::new(5),
        active: vec![],
    });
    engine.oracle.set_stable(ts(50)).unwrap();

    let report = rollback_to_stable(&mut engine, false).unwrap();
    // txn 7 >= snap_max: invisible, and with no history the key is gone.
    assert_eq!(report.stats.keys_removed, 1);
    assert_eq!(visible_value(&engine, leaf, "a"), None);
}

// ---------------------------------------------------------------------------
// Quiescence
// ---------------------------------------------------------------------------

#[test]
fn quiescence_timeout_proceeds_instead_of_deadlocking() {
    let mut engine = Engine::new(EngineConfig {
        evict_quiesce_ceiling_ms: 5,
        evict_quiesce_poll_ms: 1,
        ..EngineConfig::default()
    });
    let tree = engine.create_table(ORDERS_URI, ORDERS);
    let root = tree.ensure_root();
    tree.add_leaf(root, DiskImage::new(vec![cell("a", b"1", 2, 10)]));
    engine.force_checkpoint().unwrap();
    engine.oracle.set_stable(ts(50)).unwrap();
    // History-store-writing eviction never quiesces.
    engine.eviction.set_flags(EVICT_DIRTY);

    // The call still completes (with a warning) rather than hanging.
    rollback_to_stable(&mut engine, false).unwrap();
}

// ---------------------------------------------------------------------------
// Single-object entry point
// ---------------------------------------------------------------------------

#[test]
fn single_object_rollback_handles_files_only() {
    let (mut engine, leaf) = engine_with_orders(vec![cell("a", b"base", 2, 10)]);
    splice_update(
        &mut engine,
        leaf,
        "a",
        Update::standard(TxnId::new(5), ts(20), ts(20), b"new".to_vec()),
    );
    engine.oracle.set_stable(ts(15)).unwrap();

    // Non-file objects: continue descent, nothing to do here.
    assert!(!rollback_to_stable_one(&mut engine, "table:orders").unwrap());

    assert!(rollback_to_stable_one(&mut engine, ORDERS_URI).unwrap());
    assert_eq!(visible_value(&engine, leaf, "a"), Some(b"base".to_vec()));

    let err = rollback_to_stable_one(&mut engine, "file:missing").unwrap_err();
    assert!(matches!(err, TamarackError::ObjectNotFound { .. }));
}
