use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Readiness checks before giving up on an unbuilt graph.
    pub ready_retries: u32,
    /// Backoff unit; attempt `n` sleeps `n * ready_backoff_ms`.
    pub ready_backoff_ms: u64,
    /// Lock TTL for stages without `lockEx`.
    pub default_lock_ex_secs: u64,
    pub event_buffer_size: usize,
}

impl SchedulerConfig {
    pub fn ready_backoff(&self) -> Duration {
        Duration::from_millis(self.ready_backoff_ms)
    }

    pub fn default_lock_ex(&self) -> Duration {
        Duration::from_secs(self.default_lock_ex_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ready_retries: 3,
            ready_backoff_ms: 3000,
            default_lock_ex_secs: 30,
            event_buffer_size: 1000,
        }
    }
}
