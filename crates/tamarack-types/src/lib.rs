//! Core glossary types for the Tamarack storage engine.
//!
//! This crate is pure data: timestamp and transaction-id newtypes, user keys,
//! time windows and their per-page aggregates, and the modify-delta payload
//! format. Runtime machinery (update logs, trees, the timestamp oracle) lives
//! in the downstream crates.

pub mod delta;
pub mod glossary;
pub mod window;

pub use delta::{ModifyDelta, ModifyOp};
pub use glossary::{Key, PrepareState, TableId, Timestamp, TxnId, ValueType};
pub use window::{TimeAggregate, TimeWindow, TreeKind};
