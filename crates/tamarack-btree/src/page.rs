//! Page variants and disk images.
//!
//! A page is a tagged variant selected once per visit: leaf pages carry the
//! per-key update logs (split between keys present on the disk image and
//! keys inserted since), internal pages carry child refs. The disk image
//! itself lives on the owning ref slot, not the page, so it survives
//! materialization without copying.

use std::collections::BTreeMap;

use tamarack_types::{Key, TimeAggregate, TimeWindow};

use crate::tree::RefId;
use crate::update::UpdateLog;

// ---------------------------------------------------------------------------
// DiskImage
// ---------------------------------------------------------------------------

/// One on-disk cell: a key, its most recent reconciled value, and the value's
/// time window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskCell {
    pub key: Key,
    pub value: Vec<u8>,
    pub tw: TimeWindow,
}

/// The reconciled (checkpointed) image of a leaf page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskImage {
    cells: Vec<DiskCell>,
}

impl DiskImage {
    /// Build an image from cells; they are kept sorted by key.
    #[must_use]
    pub fn new(mut cells: Vec<DiskCell>) -> Self {
        cells.sort_by(|a, b| a.key.cmp(&b.key));
        Self { cells }
    }

    #[must_use]
    pub fn cells(&self) -> &[DiskCell] {
        &self.cells
    }

    #[must_use]
    pub fn cell(&self, key: &Key) -> Option<&DiskCell> {
        self.cells
            .binary_search_by(|c| c.key.cmp(key))
            .ok()
            .map(|i| &self.cells[i])
    }

    #[must_use]
    pub fn contains(&self, key: &Key) -> bool {
        self.cell(key).is_some()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Fold every cell's time window into a fresh aggregate.
    #[must_use]
    pub fn aggregate(&self) -> TimeAggregate {
        let mut agg = TimeAggregate::EMPTY;
        for cell in &self.cells {
            agg.merge_window(&cell.tw);
        }
        agg
    }
}

// ---------------------------------------------------------------------------
// Page
// ---------------------------------------------------------------------------

/// In-memory state of a leaf page: update logs for keys on the disk image and
/// for keys inserted since the page was read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeafPage {
    /// Update logs for keys present on the disk image.
    pub updates: BTreeMap<Key, UpdateLog>,
    /// Update logs for keys absent from the disk image (the insert list).
    pub inserts: BTreeMap<Key, UpdateLog>,
}

impl LeafPage {
    /// The update log for `key`, wherever it lives.
    #[must_use]
    pub fn log(&self, key: &Key) -> Option<&UpdateLog> {
        self.updates.get(key).or_else(|| self.inserts.get(key))
    }

    pub fn log_mut(&mut self, key: &Key) -> Option<&mut UpdateLog> {
        if self.updates.contains_key(key) {
            self.updates.get_mut(key)
        } else {
            self.inserts.get_mut(key)
        }
    }

    /// Whether any live (non-aborted) update exists anywhere on the page.
    #[must_use]
    pub fn has_live_updates(&self) -> bool {
        self.updates
            .values()
            .chain(self.inserts.values())
            .any(|log| log.first_live().is_some())
    }
}

/// An internal page: an ordered list of child refs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InternalPage {
    pub children: Vec<RefId>,
}

/// Tagged page variant, selected once per page visit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    Leaf(LeafPage),
    Internal(InternalPage),
}

impl Page {
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf(_))
    }

    #[must_use]
    pub fn as_leaf(&self) -> Option<&LeafPage> {
        match self {
            Self::Leaf(leaf) => Some(leaf),
            Self::Internal(_) => None,
        }
    }

    pub fn as_leaf_mut(&mut self) -> Option<&mut LeafPage> {
        match self {
            Self::Leaf(leaf) => Some(leaf),
            Self::Internal(_) => None,
        }
    }

    #[must_use]
    pub fn as_internal(&self) -> Option<&InternalPage> {
        match self {
            Self::Internal(internal) => Some(internal),
            Self::Leaf(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
