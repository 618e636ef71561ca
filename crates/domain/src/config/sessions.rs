use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Thread resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// How often a waiter re-checks a held assistant lock.
    #[serde(default = "d_lock_poll_interval_ms")]
    pub lock_poll_interval_ms: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            lock_poll_interval_ms: d_lock_poll_interval_ms(),
        }
    }
}

impl SessionsConfig {
    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }
}

fn d_lock_poll_interval_ms() -> u64 {
    100
}
