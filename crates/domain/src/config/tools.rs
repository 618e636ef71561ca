use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool-call dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How pending tool calls get their outputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolMode {
    /// POST each call to the tenant's submission endpoint.
    #[default]
    Webhook,
    /// Park each call until an operator completes it over the API.
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub mode: ToolMode,
    /// Submission path appended to the tenant site URL.
    #[serde(default = "d_submit_path")]
    pub submit_path: String,
    /// Fixed submission URL. Overrides `submit_path` for every tenant.
    #[serde(default)]
    pub submit_url: Option<String>,
    #[serde(default = "d_per_call_timeout_ms")]
    pub per_call_timeout_ms: u64,
    /// Bound on the whole batch of calls for one `requires_action` step.
    #[serde(default = "d_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    /// Value of the `status` field added to every submission payload.
    #[serde(default = "d_report_status")]
    pub report_status: String,
    /// Environment variable holding an HMAC secret. When set, submissions
    /// carry `X-Signature-256: sha256=<hex>` over the body.
    #[serde(default)]
    pub signing_secret_env: Option<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            mode: ToolMode::default(),
            submit_path: d_submit_path(),
            submit_url: None,
            per_call_timeout_ms: d_per_call_timeout_ms(),
            batch_timeout_ms: d_batch_timeout_ms(),
            report_status: d_report_status(),
            signing_secret_env: None,
        }
    }
}

impl ToolsConfig {
    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_millis(self.per_call_timeout_ms)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }
}

fn d_submit_path() -> String {
    "/wp-json/brand-voice/v1/submit".into()
}
fn d_per_call_timeout_ms() -> u64 {
    5_000
}
fn d_batch_timeout_ms() -> u64 {
    10_000
}
fn d_report_status() -> String {
    "pending".into()
}
