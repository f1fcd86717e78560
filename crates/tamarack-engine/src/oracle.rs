//! The timestamp oracle: process-wide monotonic timestamp state.

use parking_lot::RwLock;
use tamarack_error::{Result, TamarackError};
use tamarack_types::Timestamp;

#[derive(Debug, Clone, Copy, Default)]
struct OracleState {
    oldest: Timestamp,
    stable: Timestamp,
    durable: Timestamp,
    has_oldest: bool,
    has_stable: bool,
    has_durable: bool,
}

/// Process-wide timestamp state with the ordering invariant
/// `oldest <= stable` enforced at every set.
///
/// This is a single synchronized object injected into the rollback
/// orchestrator rather than ambient global state. Rollback reads `stable`
/// once per invocation and, on success, rolls `durable` back to equal it.
#[derive(Debug, Default)]
pub struct TimestampOracle {
    state: RwLock<OracleState>,
}

impl TimestampOracle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the oldest timestamp. Fails if it would pass stable.
    pub fn set_oldest(&self, ts: Timestamp) -> Result<()> {
        let mut state = self.state.write();
        if state.has_stable && ts > state.stable {
            return Err(TamarackError::illegal_state(format!(
                "oldest timestamp {ts} must not exceed stable timestamp {}",
                state.stable
            )));
        }
        state.oldest = ts;
        state.has_oldest = true;
        Ok(())
    }

    /// Set the stable timestamp. Fails if it would fall below oldest.
    pub fn set_stable(&self, ts: Timestamp) -> Result<()> {
        let mut state = self.state.write();
        if state.has_oldest && ts < state.oldest {
            return Err(TamarackError::illegal_state(format!(
                "stable timestamp {ts} must not precede oldest timestamp {}",
                state.oldest
            )));
        }
        state.stable = ts;
        state.has_stable = true;
        Ok(())
    }

    /// Set the durable timestamp.
    pub fn set_durable(&self, ts: Timestamp) {
        let mut state = self.state.write();
        state.durable = ts;
        state.has_durable = true;
    }

    #[must_use]
    pub fn oldest(&self) -> Timestamp {
        self.state.read().oldest
    }

    #[must_use]
    pub fn stable(&self) -> Timestamp {
        self.state.read().stable
    }

    #[must_use]
    pub fn durable(&self) -> Timestamp {
        self.state.read().durable
    }

    #[must_use]
    pub fn has_stable(&self) -> bool {
        self.state.read().has_stable
    }

    #[must_use]
    pub fn has_durable(&self) -> bool {
        self.state.read().has_durable
    }

    /// Roll the durable timestamp back to equal the stable timestamp; after
    /// rollback-to-stable nothing newer than stable survives a checkpoint.
    pub fn set_durable_to_stable(&self) {
        let mut state = self.state.write();
        state.durable = state.stable;
        state.has_durable = state.has_stable;
    }
}
