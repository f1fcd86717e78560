//! Rollback-to-stable for the Tamarack storage engine.
//!
//! Given the stable timestamp established by checkpoints, revert every
//! on-disk and in-memory table to the most recent state consistent with it:
//! committed-but-unstable data and uncommitted or prepared data are
//! discarded, while superseded versions in the history store supply stable
//! replacements for still-valid readers.
//!
//! The pieces, bottom up: [`skip`] decides from a page's time-window
//! aggregate whether the walk can pass it over unread; [`abort`] walks one
//! key's update log and discards everything newer than the rollback point;
//! [`fixup`] repairs an unstable on-disk value, recursing into
//! [`reconstruct`] to rebuild a stable version from the history store;
//! [`page`] and [`tree`] drive those per page and per tree; [`apply`]
//! decides per file from checkpoint metadata alone; and [`orchestrator`]
//! sequences the whole invocation safely against the live engine.

pub mod abort;
pub mod apply;
pub mod context;
pub mod fixup;
pub mod orchestrator;
pub mod page;
pub mod reconstruct;
pub mod skip;
pub mod stats;
pub mod tree;

pub use abort::{abort_update_log, delete_hs_newer};
pub use apply::{hs_final_pass, rollback_to_stable_btree_apply};
pub use context::RollbackContext;
pub use fixup::abort_ondisk_kv;
pub use orchestrator::{rollback_to_stable, rollback_to_stable_one, RtsReport};
pub use page::{abort_fast_truncate, abort_page_updates};
pub use reconstruct::{restore_from_history, Restored};
pub use skip::{page_needs_abort, walk_page_skip};
pub use stats::{RtsStats, StatsSnapshot};
pub use tree::rollback_to_stable_tree;
