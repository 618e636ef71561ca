use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tenant credential lookup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where and how to ask a tenant site for its assistant API key.
///
/// The lookup is `GET {site}{path}?{query_param}={key_name}` and the key is
/// read from `response_field` of the JSON body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default = "d_path")]
    pub path: String,
    #[serde(default = "d_query_param")]
    pub query_param: String,
    #[serde(default = "d_response_field")]
    pub response_field: String,
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            path: d_path(),
            query_param: d_query_param(),
            response_field: d_response_field(),
            timeout_ms: d_timeout_ms(),
        }
    }
}

fn d_path() -> String {
    "/wp-json/gpt-chat/v1/api-keys".into()
}
fn d_query_param() -> String {
    "gpt_chat_api_key_name".into()
}
fn d_response_field() -> String {
    "apiKey".into()
}
fn d_timeout_ms() -> u64 {
    5_000
}
