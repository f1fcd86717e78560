//! The engine context.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tamarack_btree::{Addr, BTree, DiskImage, Page, RefId, RefState, Update};
use tamarack_error::Result;
use tamarack_history::HistoryStore;
use tamarack_types::{TableId, TimeAggregate, TimeWindow, TreeKind, TxnId};

use crate::catalog::{Catalog, TableMeta, HS_URI, METADATA_URI};
use crate::config::EngineConfig;
use crate::eviction::EvictionServer;
use crate::oracle::TimestampOracle;
use crate::txn::{RecoverySnapshot, TxnRegistry};

/// Table id reserved for the catalog.
pub const METADATA_TABLE_ID: TableId = TableId::new(0);
/// Table id reserved for the history store.
pub const HS_TABLE_ID: TableId = TableId::new(1);

/// The engine context rollback-to-stable operates on.
///
/// Exclusive access during rollback is type-enforced: the orchestrator takes
/// `&mut Engine` for the whole invocation, the Rust rendering of the
/// dedicated internal session the original engine opens for this call.
#[derive(Debug)]
pub struct Engine {
    pub config: EngineConfig,
    pub oracle: TimestampOracle,
    pub txns: TxnRegistry,
    pub eviction: EvictionServer,
    pub catalog: Catalog,
    pub trees: BTreeMap<TableId, BTree>,
    pub history: HistoryStore,
    /// Crash recovery is replaying into this engine.
    pub recovering: bool,
    /// Shutdown-with-timestamp is in progress.
    pub closing: bool,
    /// Snapshot recorded by the checkpoint recovery started from.
    pub recovery_snapshot: Option<RecoverySnapshot>,
    /// Held for the duration of a rollback: no concurrent DDL.
    pub schema_lock: Arc<Mutex<()>>,
    /// Held for the duration of a rollback: no concurrent checkpoint.
    pub checkpoint_lock: Arc<Mutex<()>>,
    /// Set while a rollback-to-stable invocation is in flight.
    pub rts_running: AtomicBool,
    checkpoints_forced: AtomicU64,
}

impl Engine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let mut catalog = Catalog::new();
        catalog.insert(
            METADATA_URI,
            TableMeta {
                id: METADATA_TABLE_ID,
                checkpoint: None,
            },
        );
        catalog.insert(
            HS_URI,
            TableMeta {
                id: HS_TABLE_ID,
                checkpoint: None,
            },
        );
        Self {
            config,
            oracle: TimestampOracle::new(),
            txns: TxnRegistry::new(),
            eviction: EvictionServer::new(),
            catalog,
            trees: BTreeMap::new(),
            history: HistoryStore::new(),
            recovering: false,
            closing: false,
            recovery_snapshot: None,
            schema_lock: Arc::new(Mutex::new(())),
            checkpoint_lock: Arc::new(Mutex::new(())),
            rts_running: AtomicBool::new(false),
            checkpoints_forced: AtomicU64::new(0),
        }
    }

    /// Register a data table: a tree plus its catalog entry.
    pub fn create_table(&mut self, uri: impl Into<String>, id: TableId) -> &mut BTree {
        let uri = uri.into();
        self.catalog.insert(
            uri.clone(),
            TableMeta {
                id,
                checkpoint: None,
            },
        );
        self.trees
            .entry(id)
            .or_insert_with(|| BTree::new(id, uri, TreeKind::Data))
    }

    #[must_use]
    pub fn tree(&self, id: TableId) -> Option<&BTree> {
        self.trees.get(&id)
    }

    pub fn tree_mut(&mut self, id: TableId) -> Option<&mut BTree> {
        self.trees.get_mut(&id)
    }

    /// Transaction-id visibility under the recovery checkpoint snapshot.
    ///
    /// Outside recovery all ids are visible. Only a full checkpoint records
    /// a snapshot; an unpopulated snapshot also means everything is visible.
    #[must_use]
    pub fn txn_visible_for_rollback(&self, id: TxnId) -> bool {
        if !self.recovering {
            return true;
        }
        match &self.recovery_snapshot {
            Some(snap) if snap.is_populated() => snap.id_visible(id),
            _ => true,
        }
    }

    /// Number of forced checkpoints taken so far.
    #[must_use]
    pub fn checkpoints_forced(&self) -> u64 {
        self.checkpoints_forced.load(Ordering::Acquire)
    }

    /// Force a checkpoint: recompute every tree's address aggregates from
    /// its current content, clear the dirty bits, and rewrite the catalog's
    /// checkpoint metadata so the on-disk description converges with memory.
    ///
    /// Block reconciliation and layout belong to the checkpoint writer
    /// proper; this collaborator maintains the metadata contract rollback
    /// and applicability checks consume.
    pub fn force_checkpoint(&mut self) -> Result<()> {
        let seq = self.checkpoints_forced.fetch_add(1, Ordering::AcqRel) + 1;
        let mut descriptions: Vec<(String, String)> = Vec::with_capacity(self.trees.len() + 1);

        for tree in self.trees.values_mut() {
            let mut tree_agg = TimeAggregate::EMPTY;
            for i in 0..tree.ref_count() {
                let id = RefId::new(i as u32);
                let slot = tree.slot_mut(id);
                if slot.state == RefState::Deleted {
                    continue;
                }
                let mut agg = slot
                    .disk
                    .as_ref()
                    .map_or(TimeAggregate::EMPTY, DiskImage::aggregate);
                if let Some(Page::Leaf(leaf)) = &slot.page {
                    for log in leaf.updates.values().chain(leaf.inserts.values()) {
                        for update in log.iter().filter(|u| !u.is_aborted()) {
                            agg.merge_window(&update_window(update));
                        }
                    }
                }
                if slot.disk.is_some() || slot.page.as_ref().is_some_and(Page::is_leaf) {
                    slot.addr = Some(Addr { aggregate: agg });
                    tree_agg.merge(&agg);
                }
                slot.dirty = false;
            }
            tree.modified = false;
            descriptions.push((
                tree.uri.clone(),
                checkpoint_description(&tree_agg, seq, tree.is_empty()),
            ));
        }

        // The history store checkpoints like any other table; its aggregate
        // gates the recovery-only final pass.
        let mut hs_agg = TimeAggregate::EMPTY;
        for (_, record) in self.history.iter() {
            hs_agg.merge_window(&record.tw);
        }
        descriptions.push((
            HS_URI.to_owned(),
            checkpoint_description(&hs_agg, seq, self.history.is_empty()),
        ));

        for (uri, description) in descriptions {
            if let Some(meta) = self.catalog.get_mut(&uri) {
                meta.checkpoint = Some(description);
            }
        }
        tracing::info!(seq, "forced checkpoint complete");
        Ok(())
    }
}

/// Render one checkpoint's metadata. Durable timestamp fields are written
/// only when set, since their absence is what marks a non-timestamped table,
/// and empty trees get no address.
fn checkpoint_description(agg: &TimeAggregate, seq: u64, empty: bool) -> String {
    let mut obj = serde_json::Map::new();
    if !agg.newest_start_durable_ts.is_none() {
        obj.insert(
            "newest_start_durable_ts".to_owned(),
            agg.newest_start_durable_ts.get().into(),
        );
    }
    if !agg.newest_stop_durable_ts.is_none() {
        obj.insert(
            "newest_stop_durable_ts".to_owned(),
            agg.newest_stop_durable_ts.get().into(),
        );
    }
    if !agg.newest_stop_ts.is_none() {
        obj.insert("newest_stop_ts".to_owned(), agg.newest_stop_ts.get().into());
    }
    obj.insert("prepare".to_owned(), agg.prepared.into());
    obj.insert("newest_txn".to_owned(), agg.newest_txn.get().into());
    if !empty {
        obj.insert("addr".to_owned(), format!("ckpt-{seq:08x}").into());
    }
    serde_json::Value::Object(obj).to_string()
}

/// The window an in-memory update contributes to a checkpoint aggregate: a
/// tombstone closes its key, anything else opens it.
fn update_window(update: &Update) -> TimeWindow {
    if update.is_tombstone() {
        TimeWindow::default().with_stop(update.txn, update.start_ts, update.durable_ts)
    } else {
        let mut tw = TimeWindow::with_start(update.txn, update.start_ts, update.durable_ts);
        tw.prepared = update.prepare.is_in_progress();
        tw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tamarack_btree::{DiskCell, DiskImage, Update};
    use tamarack_types::{Key, Timestamp};

    use crate::catalog::CheckpointMeta;

    fn engine_with_table() -> Engine {
        let mut engine = Engine::new(EngineConfig::default());
        let tree = engine.create_table("file:orders", TableId::new(7));
        let root = tree.ensure_root();
        tree.add_leaf(
            root,
            DiskImage::new(vec![DiskCell {
                key: Key::from("a"),
                value: b"1".to_vec(),
                tw: TimeWindow::with_start(TxnId::new(2), Timestamp::new(10), Timestamp::new(10)),
            }]),
        );
        engine
    }

    #[test]
    fn new_engine_registers_internal_tables() {
        let engine = Engine::new(EngineConfig::default());
        assert!(engine.catalog.get(HS_URI).is_some());
        assert!(engine.catalog.get(METADATA_URI).is_some());
        assert_eq!(engine.catalog.len(), 2);
    }

    #[test]
    fn txn_visibility_outside_recovery_is_total() {
        let engine = Engine::new(EngineConfig::default());
        assert!(engine.txn_visible_for_rollback(TxnId::new(u64::MAX - 1)));
    }

    #[test]
    fn txn_visibility_uses_recovery_snapshot() {
        let mut engine = Engine::new(EngineConfig::default());
        engine.recovering = true;
        // No snapshot recorded: everything visible.
        assert!(engine.txn_visible_for_rollback(TxnId::new(50)));
        engine.recovery_snapshot = Some(RecoverySnapshot {
            snap_min: TxnId::new(10),
            snap_max: TxnId::new(20),
            active: vec![],
        });
        assert!(engine.txn_visible_for_rollback(TxnId::new(9)));
        assert!(!engine.txn_visible_for_rollback(TxnId::new(20)));
    }

    #[test]
    fn force_checkpoint_rewrites_metadata_and_clears_dirty() {
        let mut engine = engine_with_table();
        let tree = engine.tree_mut(TableId::new(7)).unwrap();
        let leaf = tree.children(tree.root().unwrap())[0];
        tree.materialize(leaf).unwrap();
        let mut guard = tree.page_guard(leaf);
        guard
            .splice(
                &Key::from("a"),
                smallvec::smallvec![Update::standard(
                    TxnId::new(5),
                    Timestamp::new(30),
                    Timestamp::new(30),
                    b"2".to_vec(),
                )],
            )
            .unwrap();
        assert!(engine.tree(TableId::new(7)).unwrap().modified);

        engine.force_checkpoint().unwrap();
        assert_eq!(engine.checkpoints_forced(), 1);

        let tree = engine.tree(TableId::new(7)).unwrap();
        assert!(!tree.modified);
        let meta = engine.catalog.get("file:orders").unwrap();
        let parsed = CheckpointMeta::parse(meta.checkpoint.as_ref().unwrap()).unwrap();
        assert_eq!(parsed.newest_start_durable_ts, Timestamp::new(30));
        assert_eq!(parsed.newest_txn, TxnId::new(5));
        assert!(parsed.durable_ts_found);
        assert!(parsed.addr_size > 0);
    }
}
