//! Manual tool mode: calls wait for an operator to post their output.
//!
//! Each pending call holds a `oneshot::Sender` that unblocks the waiting
//! dispatch when an output arrives over the REST API. The batch timeout
//! bounds the wait; a call abandoned that way is removed from the store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cr_domain::assistant::ToolCall;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use super::tools::{DispatchContext, ToolExecutor};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PendingToolCall {
    pub call_id: String,
    pub function: String,
    pub arguments: Value,
    pub thread_id: String,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub respond: oneshot::Sender<String>,
}

/// Serializable snapshot of a pending call (for API responses).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingToolCallInfo {
    pub call_id: String,
    pub function: String,
    pub arguments: Value,
    pub thread_id: String,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<&PendingToolCall> for PendingToolCallInfo {
    fn from(p: &PendingToolCall) -> Self {
        Self {
            call_id: p.call_id.clone(),
            function: p.function.clone(),
            arguments: p.arguments.clone(),
            thread_id: p.thread_id.clone(),
            run_id: p.run_id.clone(),
            created_at: p.created_at,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct PendingToolCalls {
    pending: RwLock<HashMap<String, PendingToolCall>>,
}

impl PendingToolCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, call: PendingToolCall) -> PendingToolCallInfo {
        let info = PendingToolCallInfo::from(&call);
        self.pending.write().insert(call.call_id.clone(), call);
        info
    }

    /// Deliver an output. Returns `false` if the call id is not pending.
    pub fn complete(&self, call_id: &str, output: String) -> bool {
        match self.pending.write().remove(call_id) {
            Some(pending) => {
                let _ = pending.respond.send(output);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, call_id: &str) {
        self.pending.write().remove(call_id);
    }

    pub fn list_pending(&self) -> Vec<PendingToolCallInfo> {
        let mut list: Vec<_> = self
            .pending
            .read()
            .values()
            .map(PendingToolCallInfo::from)
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    pub fn len(&self) -> usize {
        self.pending.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes the entry when the waiting future goes away, whether it
/// completed or was dropped by the batch timeout.
struct Registration<'a> {
    store: &'a PendingToolCalls,
    call_id: String,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.store.remove(&self.call_id);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ManualExecutor {
    store: Arc<PendingToolCalls>,
}

impl ManualExecutor {
    pub fn new(store: Arc<PendingToolCalls>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolExecutor for ManualExecutor {
    async fn execute(
        &self,
        call: &ToolCall,
        arguments: Value,
        ctx: &DispatchContext,
    ) -> std::result::Result<String, String> {
        let (tx, rx) = oneshot::channel();
        self.store.insert(PendingToolCall {
            call_id: call.id.clone(),
            function: call.function.name.clone(),
            arguments,
            thread_id: ctx.thread_id.clone(),
            run_id: ctx.run_id.clone(),
            created_at: Utc::now(),
            respond: tx,
        });
        let _registration = Registration {
            store: self.store.as_ref(),
            call_id: call.id.clone(),
        };
        tracing::info!(call_id = %call.id, "tool call waiting for manual completion");

        rx.await
            .map_err(|_| "tool call was withdrawn before completion".to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
