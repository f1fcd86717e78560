//! Eviction server coordination surface.
//!
//! Rollback-to-stable does not lock eviction out entirely; it only needs the
//! eviction categories that can write into the history store (dirty pages,
//! update restoration, urgent eviction) to quiesce while it checks for
//! active transactions. Ordinary clean-page eviction cannot race with the
//! abort logic's on-disk reads and keeps running.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Eviction is writing dirty pages back.
pub const EVICT_DIRTY: u32 = 1 << 0;
/// Eviction is restoring updates (may write history).
pub const EVICT_UPDATES: u32 = 1 << 1;
/// Urgent eviction is in progress.
pub const EVICT_URGENT: u32 = 1 << 2;
/// The eviction categories that can result in a history store write.
pub const EVICT_HS_MASK: u32 = EVICT_DIRTY | EVICT_UPDATES | EVICT_URGENT;

/// The slice of eviction server state rollback coordinates with.
#[derive(Debug)]
pub struct EvictionServer {
    flags: AtomicU32,
    pass_intr: AtomicU32,
    /// The eviction pass lock: holding it stops the server from starting a
    /// new pass (and from setting the flags above) until released.
    pub pass_lock: Arc<Mutex<()>>,
}

impl Default for EvictionServer {
    fn default() -> Self {
        Self {
            flags: AtomicU32::new(0),
            pass_intr: AtomicU32::new(0),
            pass_lock: Arc::new(Mutex::new(())),
        }
    }
}

impl EvictionServer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn flags(&self) -> u32 {
        self.flags.load(Ordering::Acquire)
    }

    pub fn set_flags(&self, mask: u32) {
        self.flags.fetch_or(mask, Ordering::Release);
    }

    pub fn clear_flags(&self, mask: u32) {
        self.flags.fetch_and(!mask, Ordering::Release);
    }

    /// Whether any history-store-writing eviction is in flight.
    #[must_use]
    pub fn hs_eviction_active(&self) -> bool {
        self.flags() & EVICT_HS_MASK != 0
    }

    /// Ask the server to yield its pass lock at the next opportunity.
    pub fn interrupt(&self) {
        self.pass_intr.fetch_add(1, Ordering::AcqRel);
    }

    pub fn clear_interrupt(&self) {
        self.pass_intr.fetch_sub(1, Ordering::AcqRel);
    }

    #[must_use]
    pub fn interrupt_count(&self) -> u32 {
        self.pass_intr.load(Ordering::Acquire)
    }
}
