//! Engine context for Tamarack.
//!
//! Everything rollback-to-stable consumes from the surrounding engine lives
//! here: the timestamp oracle, the transaction registry and the recovery
//! checkpoint snapshot, the eviction server's quiescence surface, the catalog
//! with per-table checkpoint metadata, the engine configuration, and the
//! checkpoint collaborator.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod eviction;
pub mod oracle;
pub mod txn;

pub use catalog::{Catalog, CheckpointMeta, TableMeta, HS_URI, METADATA_URI};
pub use config::EngineConfig;
pub use engine::{Engine, HS_TABLE_ID, METADATA_TABLE_ID};
pub use eviction::{EvictionServer, EVICT_DIRTY, EVICT_HS_MASK, EVICT_UPDATES, EVICT_URGENT};
pub use oracle::TimestampOracle;
pub use txn::{RecoverySnapshot, TxnRegistry};
