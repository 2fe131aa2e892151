use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime knobs of the aggregated watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Capacity of the fan-in queue shared by all partitions.
    pub queue_cap: usize,
    /// Upper bound on waiting for sub-streams when the request carries no timeout.
    pub close_timeout: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { queue_cap: 1024, close_timeout: Duration::from_secs(5) }
    }
}

impl WatchConfig {
    /// Defaults overridden by `KPART_WATCH_QUEUE_CAP` and `KPART_WATCH_CLOSE_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let d = Self::default();
        let queue_cap = std::env::var("KPART_WATCH_QUEUE_CAP").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(d.queue_cap);
        let close_timeout = std::env::var("KPART_WATCH_CLOSE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(d.close_timeout);
        Self { queue_cap, close_timeout }
    }
}
