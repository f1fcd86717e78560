//! In-memory B-tree model for the Tamarack storage engine.
//!
//! Update records live in arena-style append-only logs per key: entries are
//! never physically unlinked, abort marks a record dead and readers follow
//! explicit `prev` indices instead of raw pointers. Pages are an explicit
//! tagged variant (leaf / internal); refs carry the on-disk address aggregate
//! and the fast-truncate record; page mutation goes through a [`PageGuard`]
//! obtained from the tree, which is the single-writer discipline.

pub mod page;
pub mod tree;
pub mod update;

pub use page::{DiskCell, DiskImage, InternalPage, LeafPage, Page};
pub use tree::{Addr, BTree, FastTruncate, PageGuard, RefId, RefSlot, RefState};
pub use update::{Update, UpdateLog, UpdateValue};
