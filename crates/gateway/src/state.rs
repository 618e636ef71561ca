use std::sync::Arc;

use cr_domain::config::Config;

use crate::runtime::pending::PendingToolCalls;
use crate::runtime::ChatRelay;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Request orchestrator (credentials, threads, runs, tools).
    pub relay: Arc<ChatRelay>,
    /// Tool calls waiting for an operator (manual mode only; empty otherwise).
    pub pending: Arc<PendingToolCalls>,
    /// SHA-256 digest of the operator bearer token, `None` in dev mode.
    pub api_token_hash: Option<Vec<u8>>,
}
