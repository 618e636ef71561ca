//! In-memory assistant backend for runtime tests.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use cr_assistant::{AssistantBackend, BackendConnector};
use cr_domain::assistant::{
    FunctionCall, MessageContent, MessageRole, RequiredAction, Run, RunStatus, SubmitToolOutputs,
    TextContent, Thread, ThreadMessage, ToolCall, ToolOutput,
};
use cr_domain::error::{Error, Result};
use parking_lot::Mutex;

pub fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCall {
    ToolCall {
        id: id.into(),
        kind: "function".into(),
        function: FunctionCall {
            name: name.into(),
            arguments: arguments.into(),
        },
    }
}

pub fn message(id: &str, role: MessageRole, text: &str, created_at: i64) -> ThreadMessage {
    ThreadMessage {
        id: id.into(),
        role,
        created_at,
        content: vec![MessageContent::Text {
            text: TextContent { value: text.into() },
        }],
    }
}

pub fn run(id: &str, status: RunStatus) -> Run {
    Run {
        id: id.into(),
        thread_id: "thread_1".into(),
        assistant_id: "asst_1".into(),
        status,
        created_at: 0,
        required_action: None,
        last_error: None,
    }
}

pub fn requires_action(id: &str, calls: Vec<ToolCall>) -> Run {
    Run {
        required_action: Some(RequiredAction {
            kind: "submit_tool_outputs".into(),
            submit_tool_outputs: SubmitToolOutputs { tool_calls: calls },
        }),
        ..run(id, RunStatus::RequiresAction)
    }
}

fn not_found(endpoint: &str) -> Error {
    Error::Backend {
        endpoint: endpoint.into(),
        status: 404,
        message: "No thread found".into(),
    }
}

#[derive(Default)]
pub struct MockState {
    /// Threads that exist on the "backend".
    pub threads: HashSet<String>,
    pub created_threads: u32,
    /// Statuses returned by successive `retrieve_run` calls for the run
    /// created by `create_run`. The last one repeats.
    pub script: VecDeque<Run>,
    /// Returned by `list_runs`.
    pub existing_runs: Vec<Run>,
    /// When true, previously active runs reach `cancelled` once asked.
    pub cancel_settles: bool,
    pub cancel_requested: HashSet<String>,
    pub messages: Vec<ThreadMessage>,
    pub submitted: Vec<Vec<ToolOutput>>,
    pub calls: Vec<&'static str>,
    pub fail_create_thread: bool,
}

#[derive(Default)]
pub struct MockBackend {
    pub state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_thread(self: Arc<Self>, id: &str) -> Arc<Self> {
        self.state.lock().threads.insert(id.into());
        self
    }

    pub fn with_script(self: Arc<Self>, runs: Vec<Run>) -> Arc<Self> {
        self.state.lock().script = runs.into();
        self
    }

    pub fn with_messages(self: Arc<Self>, messages: Vec<ThreadMessage>) -> Arc<Self> {
        self.state.lock().messages = messages;
        self
    }

    pub fn count(&self, name: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == name).count()
    }

    fn record(&self, name: &'static str) {
        self.state.lock().calls.push(name);
    }
}

#[async_trait]
impl AssistantBackend for MockBackend {
    async fn create_thread(&self) -> Result<Thread> {
        self.record("create_thread");
        let mut state = self.state.lock();
        if state.fail_create_thread {
            return Err(Error::Backend {
                endpoint: "/threads".into(),
                status: 500,
                message: "server error".into(),
            });
        }
        state.created_threads += 1;
        let id = format!("thread_new_{}", state.created_threads);
        state.threads.insert(id.clone());
        Ok(Thread { id, created_at: 0 })
    }

    async fn retrieve_thread(&self, thread_id: &str) -> Result<Thread> {
        self.record("retrieve_thread");
        if self.state.lock().threads.contains(thread_id) {
            Ok(Thread {
                id: thread_id.into(),
                created_at: 0,
            })
        } else {
            Err(not_found("/threads/{id}"))
        }
    }

    async fn add_user_message(&self, _thread_id: &str, content: &str) -> Result<ThreadMessage> {
        self.record("add_user_message");
        let mut state = self.state.lock();
        let created_at = state.messages.len() as i64;
        let msg = message(
            &format!("msg_user_{created_at}"),
            MessageRole::User,
            content,
            created_at,
        );
        state.messages.push(msg.clone());
        Ok(msg)
    }

    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run> {
        self.record("create_run");
        Ok(Run {
            thread_id: thread_id.into(),
            assistant_id: assistant_id.into(),
            ..run("run_new", RunStatus::Queued)
        })
    }

    async fn retrieve_run(&self, _thread_id: &str, run_id: &str) -> Result<Run> {
        self.record("retrieve_run");
        let mut state = self.state.lock();
        if state.existing_runs.iter().any(|r| r.id == run_id) {
            let status = if state.cancel_settles && state.cancel_requested.contains(run_id) {
                RunStatus::Cancelled
            } else {
                RunStatus::Cancelling
            };
            return Ok(run(run_id, status));
        }
        let next = if state.script.len() > 1 {
            state.script.pop_front()
        } else {
            state.script.front().cloned()
        };
        Ok(next.unwrap_or_else(|| run(run_id, RunStatus::InProgress)))
    }

    async fn list_runs(&self, _thread_id: &str, _limit: u32) -> Result<Vec<Run>> {
        self.record("list_runs");
        Ok(self.state.lock().existing_runs.clone())
    }

    async fn cancel_run(&self, _thread_id: &str, run_id: &str) -> Result<Run> {
        self.record("cancel_run");
        self.state.lock().cancel_requested.insert(run_id.into());
        Ok(run(run_id, RunStatus::Cancelling))
    }

    async fn submit_tool_outputs(
        &self,
        _thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run> {
        self.record("submit_tool_outputs");
        self.state.lock().submitted.push(outputs.to_vec());
        Ok(run(run_id, RunStatus::Queued))
    }

    async fn list_messages(&self, _thread_id: &str, _limit: u32) -> Result<Vec<ThreadMessage>> {
        self.record("list_messages");
        Ok(self.state.lock().messages.clone())
    }
}

/// Hands out the same mock regardless of key and remembers the keys seen.
pub struct MockConnector {
    pub backend: Arc<MockBackend>,
    pub keys: Mutex<Vec<String>>,
}

impl MockConnector {
    pub fn new(backend: Arc<MockBackend>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            keys: Mutex::new(Vec::new()),
        })
    }
}

impl BackendConnector for MockConnector {
    fn connect(&self, api_key: &str) -> Arc<dyn AssistantBackend> {
        self.keys.lock().push(api_key.into());
        self.backend.clone()
    }
}
