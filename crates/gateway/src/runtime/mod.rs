//! Core runtime: the orchestrator that turns one widget message into one
//! assistant reply.
//!
//! Entry point: [`ChatRelay::handle`] resolves the tenant's key, picks the
//! thread, posts the message, drives a single run to a terminal status and
//! extracts the reply. Every failure maps onto a [`ChatError`] with an HTTP
//! status and a stable `kind`.

pub mod credentials;
pub mod driver;
pub mod extract;
pub mod pending;
pub mod session_lock;
pub mod threads;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use axum::http::StatusCode;
use cr_assistant::BackendConnector;
use cr_domain::assistant::RunStatus;
use cr_domain::config::Config;
use cr_domain::error::Error;
use tokio::time::Instant;
use tracing::Instrument;

use self::credentials::{CredentialLookup, CredentialSource};
use self::driver::RunDriver;
use self::extract::TranscriptLine;
use self::session_lock::LockManager;
use self::threads::SessionManager;
use self::tools::{DispatchContext, ToolDispatcher, ToolExecutor};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input / output
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One widget message and the tenant it belongs to.
#[derive(Debug, Clone, Default)]
pub struct ChatInput {
    pub message: String,
    pub assistant_id: String,
    pub thread_id: Option<String>,
    pub api_key_name: String,
    pub site_url: String,
    pub webhook_url: Option<String>,
}

impl ChatInput {
    /// Reject blank required fields, naming all of them at once.
    pub fn validate(&self) -> Result<(), ChatError> {
        let missing: Vec<&str> = [
            ("message", &self.message),
            ("assistantId", &self.assistant_id),
            ("apiKeyName", &self.api_key_name),
            ("wordpressUrl", &self.site_url),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ChatError::InvalidRequest(format!(
                "missing required fields: {}",
                missing.join(", ")
            )))
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub thread_id: String,
    pub run_id: String,
    pub status: RunStatus,
    pub thread_created: bool,
    /// Backend error message when the run ended `failed` or similar.
    pub run_error: Option<String>,
    pub transcript: Vec<TranscriptLine>,
    /// Newest assistant text, empty if the assistant has not replied.
    pub latest: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("{0}")]
    InvalidRequest(String),

    /// The reason is logged, never returned to the caller.
    #[error("API key not found")]
    CredentialNotFound { reason: String },

    #[error("assistant backend error: {0}")]
    Backend(#[source] cr_domain::error::Error),

    /// `run_id` is `None` when the budget ran out before a run existed.
    #[error("request did not finish within {elapsed_ms} ms")]
    Timeout {
        run_id: Option<String>,
        elapsed_ms: u64,
    },

    #[error("tool calls for run {run_id} did not finish within {timeout_ms} ms")]
    ToolBatchTimeout { run_id: String, timeout_ms: u64 },

    #[error("submitting tool outputs failed: {0}")]
    Submission(#[source] cr_domain::error::Error),
}

impl ChatError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::CredentialNotFound { .. } => StatusCode::UNAUTHORIZED,
            Self::Timeout { .. } | Self::ToolBatchTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Backend(_) | Self::Submission(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable machine-readable error class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::CredentialNotFound { .. } => "credential_not_found",
            Self::Backend(_) => "backend",
            Self::Timeout { .. } => "timeout",
            Self::ToolBatchTimeout { .. } => "tool_timeout",
            Self::Submission(_) => "submission",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ChatRelay {
    credentials: Arc<dyn CredentialSource>,
    connector: Arc<dyn BackendConnector>,
    sessions: SessionManager,
    driver: RunDriver,
    tools: ToolDispatcher,
    message_limit: u32,
}

impl ChatRelay {
    pub fn new(
        config: &Config,
        credentials: Arc<dyn CredentialSource>,
        connector: Arc<dyn BackendConnector>,
        locks: Arc<dyn LockManager>,
        executor: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            credentials,
            connector,
            sessions: SessionManager::new(
                locks,
                config.runs.clone(),
                config.assistant.run_list_limit,
            ),
            driver: RunDriver::new(&config.runs),
            tools: ToolDispatcher::new(executor, config.tools.batch_timeout()),
            message_limit: config.assistant.message_limit,
        }
    }

    pub async fn handle(&self, input: ChatInput) -> Result<ChatOutcome, ChatError> {
        let span = tracing::info_span!(
            "chat.request",
            assistant_id = %input.assistant_id,
            site = %input.site_url,
        );
        self.handle_inner(input).instrument(span).await
    }

    async fn handle_inner(&self, input: ChatInput) -> Result<ChatOutcome, ChatError> {
        let started = Instant::now();
        input.validate()?;

        let api_key = match self
            .credentials
            .resolve(&input.site_url, &input.api_key_name)
            .await
        {
            CredentialLookup::Found(key) => key,
            CredentialLookup::NotFound(reason) => {
                return Err(ChatError::CredentialNotFound { reason })
            }
        };
        let backend = self.connector.connect(&api_key);

        let thread = self
            .sessions
            .resolve(
                backend.as_ref(),
                input.thread_id.as_deref(),
                &input.assistant_id,
                self.driver.deadline_from(started),
            )
            .await
            .map_err(|e| match e {
                Error::Timeout(_) if self.driver.expired(started) => ChatError::Timeout {
                    run_id: None,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                },
                e => ChatError::Backend(e),
            })?;
        self.driver.ensure_budget(started)?;

        backend
            .add_user_message(&thread.id, &input.message)
            .await
            .map_err(ChatError::Backend)?;

        let ctx = DispatchContext {
            site_url: input.site_url.clone(),
            webhook_url: input
                .webhook_url
                .clone()
                .filter(|u| !u.trim().is_empty()),
            thread_id: thread.id.clone(),
            run_id: String::new(),
        };
        let outcome = self
            .driver
            .drive(
                backend.as_ref(),
                &self.tools,
                &ctx,
                &input.assistant_id,
                started,
            )
            .await?;

        let messages = backend
            .list_messages(&thread.id, self.message_limit)
            .await
            .map_err(ChatError::Backend)?;

        tracing::info!(
            thread_id = %thread.id,
            run_id = %outcome.run.id,
            status = %outcome.run.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "chat request finished"
        );

        Ok(ChatOutcome {
            thread_id: thread.id,
            run_id: outcome.run.id,
            status: outcome.run.status,
            thread_created: thread.created,
            run_error: outcome.run.last_error.map(|e| e.message),
            latest: extract::latest_assistant_text(&messages),
            transcript: extract::transcript(&messages),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::session_lock::LocalLockManager;
    use crate::runtime::testing::{message, requires_action, run, tool_call, MockBackend, MockConnector};
    use async_trait::async_trait;
    use cr_domain::assistant::{MessageRole, ToolCall};
    use serde_json::Value;
    use std::time::Duration;

    struct StaticCredentials(Option<&'static str>);

    #[async_trait]
    impl CredentialSource for StaticCredentials {
        async fn resolve(&self, _site_url: &str, _key_name: &str) -> CredentialLookup {
            match self.0 {
                Some(key) => CredentialLookup::Found(key.into()),
                None => CredentialLookup::NotFound("no such key".into()),
            }
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl ToolExecutor for FailingExecutor {
        async fn execute(
            &self,
            _call: &ToolCall,
            _arguments: Value,
            _ctx: &DispatchContext,
        ) -> Result<String, String> {
            Err("submission endpoint unreachable".into())
        }
    }

    fn relay(backend: Arc<MockBackend>, key: Option<&'static str>) -> (ChatRelay, Arc<MockConnector>) {
        let connector = MockConnector::new(backend);
        let relay = ChatRelay::new(
            &Config::default(),
            Arc::new(StaticCredentials(key)),
            connector.clone(),
            Arc::new(LocalLockManager::new(Duration::from_millis(5))),
            Arc::new(FailingExecutor),
        );
        (relay, connector)
    }

    fn input(thread_id: Option<&str>) -> ChatInput {
        ChatInput {
            message: "Write me a tagline".into(),
            assistant_id: "asst_1".into(),
            thread_id: thread_id.map(Into::into),
            api_key_name: "main".into(),
            site_url: "https://tenant.example".into(),
            webhook_url: None,
        }
    }

    #[test]
    fn validation_names_every_missing_field() {
        let err = ChatInput::default().validate().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        let text = err.to_string();
        for field in ["message", "assistantId", "apiKeyName", "wordpressUrl"] {
            assert!(text.contains(field), "{text}");
        }
    }

    #[test]
    fn error_kinds_and_statuses() {
        let timeout = ChatError::Timeout {
            run_id: Some("run_1".into()),
            elapsed_ms: 28_000,
        };
        assert_eq!(timeout.kind(), "timeout");
        assert_eq!(timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);

        let missing = ChatError::CredentialNotFound {
            reason: "404 from site".into(),
        };
        assert_eq!(missing.status_code(), StatusCode::UNAUTHORIZED);
        assert!(!missing.to_string().contains("404"));

        let submission = ChatError::Submission(cr_domain::error::Error::Http("reset".into()));
        assert_eq!(submission.kind(), "submission");
        assert_eq!(submission.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_returns_latest_reply() {
        let backend = MockBackend::new()
            .with_script(vec![run("run_new", RunStatus::Completed)])
            .with_messages(vec![message("m0", MessageRole::Assistant, "Welcome!", 0)]);
        let (relay, connector) = relay(backend.clone(), Some("sk-tenant"));

        let outcome = relay.handle(input(None)).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert!(outcome.thread_created);
        assert_eq!(outcome.thread_id, "thread_new_1");
        assert_eq!(outcome.transcript.len(), 2);
        assert_eq!(connector.keys.lock().as_slice(), ["sk-tenant"]);
        assert_eq!(backend.count("create_run"), 1);
        assert_eq!(backend.count("add_user_message"), 1);
    }

    #[tokio::test]
    async fn missing_credentials_touch_no_backend() {
        let backend = MockBackend::new();
        let (relay, connector) = relay(backend.clone(), None);

        let err = relay.handle(input(None)).await.unwrap_err();
        assert_eq!(err.kind(), "credential_not_found");
        assert!(connector.keys.lock().is_empty());
        assert!(backend.state.lock().calls.is_empty());
    }

    #[tokio::test]
    async fn invalid_input_touches_nothing() {
        let backend = MockBackend::new();
        let (relay, connector) = relay(backend.clone(), Some("sk"));
        let mut bad = input(None);
        bad.message = "  ".into();

        let err = relay.handle(bad).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
        assert!(connector.keys.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn resumed_thread_is_reused() {
        let backend = MockBackend::new()
            .with_thread("thread_old")
            .with_script(vec![run("run_new", RunStatus::Completed)]);
        let (relay, _) = relay(backend.clone(), Some("sk"));

        let outcome = relay.handle(input(Some("thread_old"))).await.unwrap();
        assert_eq!(outcome.thread_id, "thread_old");
        assert!(!outcome.thread_created);
        assert_eq!(backend.count("create_thread"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_tools_still_submit_one_output_each() {
        let backend = MockBackend::new().with_script(vec![
            requires_action(
                "run_new",
                vec![
                    tool_call("call_1", "report", "{}"),
                    tool_call("call_2", "report", "not json"),
                    tool_call("call_3", "report", "{}"),
                ],
            ),
            run("run_new", RunStatus::Completed),
        ]);
        let (relay, _) = relay(backend.clone(), Some("sk"));

        let outcome = relay.handle(input(None)).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);

        let state = backend.state.lock();
        assert_eq!(state.submitted.len(), 1);
        assert_eq!(state.submitted[0].len(), 3);
        for output in &state.submitted[0] {
            let body: Value = serde_json::from_str(&output.output).unwrap();
            assert_eq!(body["tool_call_id"], output.tool_call_id.as_str());
            assert!(body["error"].is_string());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_run_times_out() {
        let backend =
            MockBackend::new().with_script(vec![run("run_new", RunStatus::InProgress)]);
        let (relay, _) = relay(backend.clone(), Some("sk"));

        let err = relay.handle(input(None)).await.unwrap_err();
        assert_eq!(err.kind(), "timeout");
        assert_eq!(backend.count("create_run"), 1);
        assert_eq!(backend.count("list_messages"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn held_assistant_lock_times_out_without_creating_a_run() {
        let backend = MockBackend::new().with_script(vec![run("run_new", RunStatus::Completed)]);
        let locks = Arc::new(LocalLockManager::new(Duration::from_millis(5)));
        locks.acquire("asst_1").await.unwrap();
        let relay = ChatRelay::new(
            &Config::default(),
            Arc::new(StaticCredentials(Some("sk"))),
            MockConnector::new(backend.clone()),
            locks.clone(),
            Arc::new(FailingExecutor),
        );

        let err = relay.handle(input(None)).await.unwrap_err();
        assert_eq!(err.kind(), "timeout");
        assert!(matches!(err, ChatError::Timeout { run_id: None, .. }));
        assert_eq!(backend.count("create_thread"), 0);
        assert_eq!(backend.count("create_run"), 0);
        assert!(locks.is_held("asst_1"));
    }
}
