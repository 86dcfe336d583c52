//! Hub tuning knobs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// An instance that sends no heartbeat for this long is disconnected.
    pub heartbeat_timeout_ms: u64,
    /// Deadline for a dispatched intent to be answered.
    pub intent_timeout_ms: u64,
    /// Deadline for the raiser to pick a target among several candidates.
    pub resolution_timeout_ms: u64,
    /// Per-connection queue of undelivered contexts; overflow is dropped.
    pub outbox_capacity: usize,
    /// Finished requests remembered so late responses fail cleanly.
    pub retained_requests: usize,
    /// Extra system channels created at startup next to "global".
    pub user_channels: Vec<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 30_000,
            intent_timeout_ms: 15_000,
            resolution_timeout_ms: 60_000,
            outbox_capacity: 256,
            retained_requests: 1024,
            user_channels: Vec::new(),
        }
    }
}

impl HubConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn intent_timeout(&self) -> Duration {
        Duration::from_millis(self.intent_timeout_ms)
    }

    pub fn resolution_timeout(&self) -> Duration {
        Duration::from_millis(self.resolution_timeout_ms)
    }
}
