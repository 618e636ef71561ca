use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Assistant backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Connection settings for the Assistants-style REST API. The API key is
/// not configured here: it is resolved per tenant on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Value of the `OpenAI-Beta` header. Empty string omits the header.
    #[serde(default = "d_beta_header")]
    pub beta_header: String,
    /// Timeout for a single backend HTTP call.
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
    /// Page size when listing thread messages for the response.
    #[serde(default = "d_message_limit")]
    pub message_limit: u32,
    /// How many recent runs to inspect when looking for an active run.
    #[serde(default = "d_run_list_limit")]
    pub run_list_limit: u32,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            beta_header: d_beta_header(),
            timeout_ms: d_timeout_ms(),
            message_limit: d_message_limit(),
            run_list_limit: d_run_list_limit(),
        }
    }
}

fn d_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn d_beta_header() -> String {
    "assistants=v2".into()
}
fn d_timeout_ms() -> u64 {
    15_000
}
fn d_message_limit() -> u32 {
    100
}
fn d_run_list_limit() -> u32 {
    10
}
