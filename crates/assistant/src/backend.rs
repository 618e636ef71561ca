use std::sync::Arc;

use async_trait::async_trait;
use cr_domain::assistant::{Run, Thread, ThreadMessage, ToolOutput};
use cr_domain::error::Result;

/// Abstraction over the assistant backend's thread/run/message resources.
///
/// Implementations may talk to the real REST API or be an in-memory test
/// double. The backend is the source of truth for every resource.
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    /// Create an empty thread (POST /threads).
    async fn create_thread(&self) -> Result<Thread>;

    /// Fetch an existing thread (GET /threads/{id}).
    async fn retrieve_thread(&self, thread_id: &str) -> Result<Thread>;

    /// Append a user message (POST /threads/{id}/messages).
    async fn add_user_message(&self, thread_id: &str, content: &str) -> Result<ThreadMessage>;

    /// Start a run of `assistant_id` on the thread (POST /threads/{id}/runs).
    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run>;

    /// Poll a run (GET /threads/{id}/runs/{run_id}).
    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run>;

    /// Most recent runs first (GET /threads/{id}/runs?order=desc).
    async fn list_runs(&self, thread_id: &str, limit: u32) -> Result<Vec<Run>>;

    /// Request cancellation (POST /threads/{id}/runs/{run_id}/cancel).
    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run>;

    /// Answer every pending tool call of a `requires_action` run in one
    /// request (POST /threads/{id}/runs/{run_id}/submit_tool_outputs).
    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run>;

    /// The newest `limit` thread messages, newest first
    /// (GET /threads/{id}/messages?order=desc). Callers re-sort.
    async fn list_messages(&self, thread_id: &str, limit: u32) -> Result<Vec<ThreadMessage>>;
}

/// Builds a backend bound to one tenant's API key.
pub trait BackendConnector: Send + Sync {
    fn connect(&self, api_key: &str) -> Arc<dyn AssistantBackend>;
}
