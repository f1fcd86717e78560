//! Engine configuration.

use std::time::Duration;

/// Engine-wide configuration consumed by rollback-to-stable.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// In-memory databases have no history store and never checkpoint.
    pub in_memory: bool,
    /// Whether corruption found during the all-files sweep is survivable.
    pub tolerate_corruption: bool,
    /// How long to wait for history-store-writing eviction to quiesce before
    /// proceeding anyway.
    pub evict_quiesce_ceiling_ms: u64,
    /// Poll interval while waiting for eviction to quiesce.
    pub evict_quiesce_poll_ms: u64,
    /// Period between rollback progress log lines.
    pub progress_period_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            in_memory: false,
            tolerate_corruption: false,
            evict_quiesce_ceiling_ms: 2 * 60 * 1000,
            evict_quiesce_poll_ms: 1,
            progress_period_secs: 20,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn quiesce_ceiling(&self) -> Duration {
        Duration::from_millis(self.evict_quiesce_ceiling_ms)
    }

    #[must_use]
    pub fn quiesce_poll(&self) -> Duration {
        Duration::from_millis(self.evict_quiesce_poll_ms)
    }

    #[must_use]
    pub fn progress_period(&self) -> Duration {
        Duration::from_secs(self.progress_period_secs)
    }
}
