//! Trees, refs, and the page guard.

use smallvec::SmallVec;
use tamarack_error::{Result, TamarackError};
use tamarack_types::{Key, TableId, TimeAggregate, Timestamp, TreeKind, TxnId};

use crate::page::{DiskCell, DiskImage, InternalPage, LeafPage, Page};
use crate::update::{Update, UpdateLog};

// ---------------------------------------------------------------------------
// RefId / RefState / Addr / FastTruncate
// ---------------------------------------------------------------------------

/// Index of a ref slot within its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct RefId(u32);

impl RefId {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Lifecycle state of a ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefState {
    /// Page exists only as its disk image.
    OnDisk,
    /// Page is instantiated in memory.
    InMemory,
    /// Fast-truncated: the whole subtree is deleted without instantiation.
    Deleted,
    /// Held exclusively by another operation.
    Locked,
}

/// On-disk address metadata for a ref: the aggregate of every time window
/// beneath it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Addr {
    pub aggregate: TimeAggregate,
}

/// The record a fast-truncate leaves on a `Deleted` ref in place of the
/// subtree it removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FastTruncate {
    pub txn: TxnId,
    pub commit_ts: Timestamp,
    pub durable_ts: Timestamp,
}

/// One ref slot: state, address, disk image, instantiated page,
/// fast-truncate record, and the page-level dirty bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefSlot {
    pub state: RefState,
    pub addr: Option<Addr>,
    pub disk: Option<DiskImage>,
    pub page: Option<Page>,
    pub del: Option<FastTruncate>,
    pub dirty: bool,
}

impl RefSlot {
    fn on_disk(disk: DiskImage) -> Self {
        let aggregate = disk.aggregate();
        Self {
            state: RefState::OnDisk,
            addr: Some(Addr { aggregate }),
            disk: Some(disk),
            page: None,
            del: None,
            dirty: false,
        }
    }

    fn internal() -> Self {
        Self {
            state: RefState::InMemory,
            addr: None,
            disk: None,
            page: Some(Page::Internal(InternalPage::default())),
            del: None,
            dirty: false,
        }
    }

    /// Whether the instantiated page is a leaf.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        match &self.page {
            Some(page) => page.is_leaf(),
            // Only leaf pages are ever evicted back to bare disk images here.
            None => true,
        }
    }

    /// Whether this ref holds an internal page.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(&self.page, Some(Page::Internal(_)))
    }
}

// ---------------------------------------------------------------------------
// BTree
// ---------------------------------------------------------------------------

/// An in-memory tree handle: the ref slab, the root, and the tree-level
/// modified bit.
#[derive(Debug, Clone)]
pub struct BTree {
    pub id: TableId,
    pub uri: String,
    pub kind: TreeKind,
    /// Immediately-durable trees (operation-log semantics) are never rolled
    /// back.
    pub immediately_durable: bool,
    /// Checkpoint-only handles have nothing to roll back.
    pub checkpoint_only: bool,
    refs: Vec<RefSlot>,
    root: Option<RefId>,
    pub modified: bool,
}

impl BTree {
    #[must_use]
    pub fn new(id: TableId, uri: impl Into<String>, kind: TreeKind) -> Self {
        Self {
            id,
            uri: uri.into(),
            kind,
            immediately_durable: false,
            checkpoint_only: false,
            refs: Vec::new(),
            root: None,
            modified: false,
        }
    }

    /// Whether the tree has no root page.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    #[must_use]
    pub fn root(&self) -> Option<RefId> {
        self.root
    }

    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.refs.len()
    }

    #[must_use]
    pub fn slot(&self, id: RefId) -> &RefSlot {
        &self.refs[id.index()]
    }

    pub fn slot_mut(&mut self, id: RefId) -> &mut RefSlot {
        &mut self.refs[id.index()]
    }

    /// Create the root internal page. Idempotent.
    pub fn ensure_root(&mut self) -> RefId {
        if let Some(root) = self.root {
            return root;
        }
        let id = self.push_slot(RefSlot::internal());
        self.root = Some(id);
        id
    }

    /// Add an on-disk leaf under `parent`.
    pub fn add_leaf(&mut self, parent: RefId, disk: DiskImage) -> RefId {
        let id = self.push_slot(RefSlot::on_disk(disk));
        self.attach_child(parent, id);
        id
    }

    /// Add an internal page under `parent`.
    pub fn add_internal(&mut self, parent: RefId) -> RefId {
        let id = self.push_slot(RefSlot::internal());
        self.attach_child(parent, id);
        id
    }

    fn push_slot(&mut self, slot: RefSlot) -> RefId {
        let id = RefId::new(u32::try_from(self.refs.len()).expect("ref slab overflow"));
        self.refs.push(slot);
        id
    }

    fn attach_child(&mut self, parent: RefId, child: RefId) {
        let page = self.refs[parent.index()]
            .page
            .as_mut()
            .expect("parent ref has no page");
        match page {
            Page::Internal(internal) => internal.children.push(child),
            Page::Leaf(_) => panic!("cannot attach a child to a leaf page"),
        }
    }

    /// Child refs of an internal page.
    #[must_use]
    pub fn children(&self, id: RefId) -> Vec<RefId> {
        self.slot(id)
            .page
            .as_ref()
            .and_then(Page::as_internal)
            .map(|internal| internal.children.clone())
            .unwrap_or_default()
    }

    /// Instantiate an `OnDisk` leaf into memory. No-op for other states.
    pub fn materialize(&mut self, id: RefId) -> Result<()> {
        let slot = self.slot_mut(id);
        match slot.state {
            RefState::OnDisk => {
                slot.page = Some(Page::Leaf(LeafPage::default()));
                slot.state = RefState::InMemory;
                Ok(())
            }
            RefState::InMemory => Ok(()),
            RefState::Deleted | RefState::Locked => Err(TamarackError::internal(format!(
                "cannot materialize ref in state {:?}",
                slot.state
            ))),
        }
    }

    /// Fast-truncate a subtree: the ref becomes `Deleted`, carrying the stop
    /// information instead of instantiating anything.
    pub fn fast_truncate(&mut self, id: RefId, del: FastTruncate) {
        let slot = self.slot_mut(id);
        slot.state = RefState::Deleted;
        slot.del = Some(del);
        slot.page = None;
        self.modified = true;
    }

    /// Reverse a fast-truncate: the subtree is live again from its disk
    /// image.
    pub fn rollback_fast_truncate(&mut self, id: RefId) {
        let tree_id = self.id;
        let slot = self.slot_mut(id);
        debug_assert_eq!(slot.state, RefState::Deleted);
        slot.state = RefState::OnDisk;
        slot.del = None;
        self.modified = true;
        tracing::debug!(tree = %tree_id, r = id.get(), "deleted page rolled back");
    }

    /// DFS walk order from the root: each internal page before its children.
    ///
    /// The caller applies its own skip predicate before instantiating any
    /// `OnDisk` ref it is handed.
    #[must_use]
    pub fn walk_order(&self) -> Vec<RefId> {
        let mut order = Vec::with_capacity(self.refs.len());
        let Some(root) = self.root else {
            return order;
        };
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            order.push(id);
            let children = self.children(id);
            // Reverse so the leftmost child is visited first.
            stack.extend(children.into_iter().rev());
        }
        order
    }

    /// Take a page guard over one ref: the capability required for any chain
    /// splice. Holding it mutably borrows the slot, which is the same
    /// single-writer-per-page discipline ordinary writers follow.
    pub fn page_guard(&mut self, id: RefId) -> PageGuard<'_> {
        let Self {
            refs,
            modified,
            id: tree_id,
            ..
        } = self;
        PageGuard {
            tree: *tree_id,
            ref_id: id,
            slot: &mut refs[id.index()],
            tree_modified: modified,
        }
    }
}

// ---------------------------------------------------------------------------
// PageGuard
// ---------------------------------------------------------------------------

/// Exclusive access to one page for the duration of a splice.
pub struct PageGuard<'a> {
    tree: TableId,
    ref_id: RefId,
    slot: &'a mut RefSlot,
    tree_modified: &'a mut bool,
}

impl PageGuard<'_> {
    #[must_use]
    pub fn ref_id(&self) -> RefId {
        self.ref_id
    }

    #[must_use]
    pub fn state(&self) -> RefState {
        self.slot.state
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.slot.dirty
    }

    /// The disk image's cell for `key`, if any.
    #[must_use]
    pub fn disk_cell(&self, key: &Key) -> Option<&DiskCell> {
        self.slot.disk.as_ref().and_then(|img| img.cell(key))
    }

    /// Keys present on the disk image.
    #[must_use]
    pub fn disk_keys(&self) -> Vec<Key> {
        self.slot
            .disk
            .as_ref()
            .map(|img| img.cells().iter().map(|c| c.key.clone()).collect())
            .unwrap_or_default()
    }

    /// Keys with insert-list logs (absent from the disk image).
    #[must_use]
    pub fn insert_keys(&self) -> Vec<Key> {
        self.leaf()
            .map(|leaf| leaf.inserts.keys().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn leaf(&self) -> Option<&LeafPage> {
        self.slot.page.as_ref().and_then(Page::as_leaf)
    }

    /// The update log for `key`, wherever it lives on the page.
    pub fn log_mut(&mut self, key: &Key) -> Option<&mut UpdateLog> {
        self.slot
            .page
            .as_mut()
            .and_then(Page::as_leaf_mut)
            .and_then(|leaf| leaf.log_mut(key))
    }

    /// Mark the page (and tree) dirty.
    pub fn mark_dirty(&mut self) {
        self.slot.dirty = true;
        *self.tree_modified = true;
    }

    /// Splice a newest-first run of updates onto `key`'s log.
    ///
    /// The log is created on demand, routed to the on-image map when the key
    /// exists on the disk image and to the insert list otherwise. The page
    /// is marked dirty; the splice is the only mutation rollback ever makes
    /// to a page; the disk image itself is never touched.
    pub fn splice(&mut self, key: &Key, updates: SmallVec<[Update; 2]>) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let on_image = self
            .slot
            .disk
            .as_ref()
            .is_some_and(|img| img.contains(key));
        let leaf = self
            .slot
            .page
            .as_mut()
            .and_then(Page::as_leaf_mut)
            .ok_or_else(|| TamarackError::internal("splice on a page without leaf state"))?;
        let map = if on_image {
            &mut leaf.updates
        } else {
            &mut leaf.inserts
        };
        let log = map.entry(key.clone()).or_default();
        log.splice(updates);
        tracing::debug!(tree = %self.tree, r = self.ref_id.get(), key = %key, "update spliced");
        self.mark_dirty();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
