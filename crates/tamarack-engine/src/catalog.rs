//! Catalog and checkpoint metadata.
//!
//! The catalog maps object URIs to table metadata, including the checkpoint
//! description the checkpoint writer produced for each object. Rollback
//! parses that description (it never writes it) to decide whether a file
//! can be skipped without opening it.

use std::collections::BTreeMap;

use tamarack_error::{Result, TamarackError};
use tamarack_types::{TableId, Timestamp, TxnId};

/// URI of the history store table.
pub const HS_URI: &str = "file:tamarack.hs";
/// URI of the catalog itself.
pub const METADATA_URI: &str = "file:tamarack.meta";

// ---------------------------------------------------------------------------
// TableMeta
// ---------------------------------------------------------------------------

/// Catalog entry for one object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableMeta {
    pub id: TableId,
    /// Checkpoint description (JSON: one object per checkpoint, or a single
    /// object). `None` if the object has never been checkpointed.
    pub checkpoint: Option<String>,
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// The object catalog, ordered by URI.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: BTreeMap<String, TableMeta>,
}

impl Catalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, uri: impl Into<String>, meta: TableMeta) {
        self.entries.insert(uri.into(), meta);
    }

    #[must_use]
    pub fn get(&self, uri: &str) -> Option<&TableMeta> {
        self.entries.get(uri)
    }

    pub fn get_mut(&mut self, uri: &str) -> Option<&mut TableMeta> {
        self.entries.get_mut(uri)
    }

    pub fn remove(&mut self, uri: &str) -> Option<TableMeta> {
        self.entries.remove(uri)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TableMeta)> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// CheckpointMeta
// ---------------------------------------------------------------------------

/// One checkpoint object as it appears in the metadata.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct CheckpointInfo {
    newest_start_durable_ts: Option<u64>,
    newest_stop_durable_ts: Option<u64>,
    newest_stop_ts: Option<u64>,
    prepare: Option<bool>,
    newest_txn: Option<u64>,
    addr: Option<String>,
}

/// Checkpoint metadata for one object, folded across all of its checkpoints
/// (maxima of the timestamp fields, sticky prepare flag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckpointMeta {
    pub newest_start_durable_ts: Timestamp,
    pub newest_stop_durable_ts: Timestamp,
    pub newest_stop_ts: Timestamp,
    pub prepared: bool,
    pub newest_txn: TxnId,
    pub addr_size: usize,
    /// Whether any checkpoint carried a durable timestamp at all. Tables
    /// that never did are non-timestamped: their whole history store
    /// footprint is reclaimable.
    pub durable_ts_found: bool,
}

impl CheckpointMeta {
    /// Parse the JSON checkpoint description: a single checkpoint object or
    /// an array of them.
    pub fn parse(json: &str) -> Result<Self> {
        let infos: Vec<CheckpointInfo> = if json.trim_start().starts_with('[') {
            serde_json::from_str(json)
        } else {
            serde_json::from_str::<CheckpointInfo>(json).map(|one| vec![one])
        }
        .map_err(|e| TamarackError::corruption(format!("checkpoint metadata unreadable: {e}")))?;

        let mut meta = Self::default();
        for info in infos {
            if let Some(ts) = info.newest_start_durable_ts {
                meta.newest_start_durable_ts =
                    meta.newest_start_durable_ts.max(Timestamp::new(ts));
                meta.durable_ts_found = true;
            }
            if let Some(ts) = info.newest_stop_durable_ts {
                meta.newest_stop_durable_ts = meta.newest_stop_durable_ts.max(Timestamp::new(ts));
                meta.durable_ts_found = true;
            }
            if let Some(ts) = info.newest_stop_ts {
                meta.newest_stop_ts = meta.newest_stop_ts.max(Timestamp::new(ts));
            }
            if info.prepare == Some(true) {
                meta.prepared = true;
            }
            if let Some(txn) = info.newest_txn {
                if txn > meta.newest_txn.get() {
                    meta.newest_txn = TxnId::new(txn);
                }
            }
            if let Some(addr) = &info.addr {
                meta.addr_size = meta.addr_size.max(addr.len());
            }
        }
        Ok(meta)
    }

    /// Maximum durable timestamp across the start and stop fields, the
    /// applicability bound for ordinary tables.
    #[must_use]
    pub fn max_durable_ts(&self) -> Timestamp {
        self.newest_start_durable_ts.max(self.newest_stop_durable_ts)
    }

    /// The history store's own applicability bound: its stop commit
    /// timestamps can exceed the stop durable ones (prepared artifacts), so
    /// both count.
    #[must_use]
    pub fn max_durable_ts_history(&self) -> Timestamp {
        self.newest_stop_ts.max(self.newest_stop_durable_ts)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
