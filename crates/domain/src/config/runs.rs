use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run polling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunsConfig {
    /// Wall-clock budget for a whole chat request, measured from arrival.
    /// Keep it below the upstream proxy timeout (commonly 30 s).
    #[serde(default = "d_deadline_secs")]
    pub deadline_secs: u64,
    #[serde(default = "d_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Cancel an active run found on a resumed thread before starting ours.
    #[serde(default = "d_true")]
    pub cancel_active_on_resume: bool,
    /// Cancel-and-check attempts before giving up on a resumed thread.
    #[serde(default = "d_cancel_attempts")]
    pub cancel_attempts: u32,
    #[serde(default = "d_cancel_retry_interval_ms")]
    pub cancel_retry_interval_ms: u64,
}

impl Default for RunsConfig {
    fn default() -> Self {
        Self {
            deadline_secs: d_deadline_secs(),
            poll_interval_ms: d_poll_interval_ms(),
            cancel_active_on_resume: true,
            cancel_attempts: d_cancel_attempts(),
            cancel_retry_interval_ms: d_cancel_retry_interval_ms(),
        }
    }
}

impl RunsConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cancel_retry_interval(&self) -> Duration {
        Duration::from_millis(self.cancel_retry_interval_ms)
    }
}

fn d_deadline_secs() -> u64 {
    28
}
fn d_poll_interval_ms() -> u64 {
    1_000
}
fn d_true() -> bool {
    true
}
fn d_cancel_attempts() -> u32 {
    5
}
fn d_cancel_retry_interval_ms() -> u64 {
    1_000
}
