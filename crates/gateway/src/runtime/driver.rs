//! Drives one run to a terminal status under a wall-clock deadline.
//!
//! The deadline is measured from request start, not from run creation, so
//! the time spent resolving credentials and threads counts against it.
//! Sleeps are clamped to the time left, so a timeout fires no later than
//! the deadline plus one backend round-trip.

use std::time::Duration;

use cr_assistant::AssistantBackend;
use cr_domain::assistant::{Run, RunStatus};
use cr_domain::config::RunsConfig;
use cr_domain::trace::TraceEvent;
use tokio::time::Instant;

use super::tools::{DispatchContext, DispatchError, ToolDispatcher};
use super::ChatError;

/// A run that reached a terminal status.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run: Run,
    pub polls: u32,
}

pub struct RunDriver {
    deadline: Duration,
    poll_interval: Duration,
}

impl RunDriver {
    pub fn new(config: &RunsConfig) -> Self {
        Self {
            deadline: config.deadline(),
            poll_interval: config.poll_interval(),
        }
    }

    /// The instant a request that started at `started` runs out of time.
    pub fn deadline_from(&self, started: Instant) -> Instant {
        started + self.deadline
    }

    pub fn expired(&self, started: Instant) -> bool {
        started.elapsed() >= self.deadline
    }

    /// Fails with [`ChatError::Timeout`] once the request budget is spent.
    pub fn ensure_budget(&self, started: Instant) -> Result<(), ChatError> {
        let elapsed = started.elapsed();
        if elapsed >= self.deadline {
            tracing::warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                "request deadline passed before a run was created"
            );
            return Err(ChatError::Timeout {
                run_id: None,
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }
        Ok(())
    }

    /// Create exactly one run on the thread and poll it to completion.
    ///
    /// No run is created once the budget is spent. `requires_action` steps
    /// are answered through `tools`; a terminal status of any kind
    /// (including `failed`) is a successful outcome.
    pub async fn drive(
        &self,
        backend: &dyn AssistantBackend,
        tools: &ToolDispatcher,
        ctx: &DispatchContext,
        assistant_id: &str,
        started: Instant,
    ) -> Result<RunOutcome, ChatError> {
        self.ensure_budget(started)?;
        let thread_id = ctx.thread_id.as_str();
        let mut run = backend
            .create_run(thread_id, assistant_id)
            .await
            .map_err(ChatError::Backend)?;
        tracing::debug!(thread_id, run_id = %run.id, "run created");

        let mut polls = 0u32;
        loop {
            if run.status.is_terminal() {
                TraceEvent::RunFinished {
                    thread_id: thread_id.to_owned(),
                    run_id: run.id.clone(),
                    status: run.status.to_string(),
                    polls,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
                .emit();
                if let Some(err) = &run.last_error {
                    tracing::warn!(run_id = %run.id, status = %run.status, error = %err.message, "run ended with an error");
                }
                return Ok(RunOutcome { run, polls });
            }

            if run.status == RunStatus::RequiresAction {
                run = self.answer_tool_calls(backend, tools, ctx, run).await?;
            }

            let elapsed = started.elapsed();
            if elapsed >= self.deadline {
                tracing::warn!(
                    run_id = %run.id,
                    status = %run.status,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "run deadline exceeded"
                );
                return Err(ChatError::Timeout {
                    run_id: Some(run.id),
                    elapsed_ms: elapsed.as_millis() as u64,
                });
            }

            let remaining = self.deadline - elapsed;
            tokio::time::sleep(self.poll_interval.min(remaining)).await;

            run = backend
                .retrieve_run(thread_id, &run.id)
                .await
                .map_err(ChatError::Backend)?;
            polls += 1;
        }
    }

    async fn answer_tool_calls(
        &self,
        backend: &dyn AssistantBackend,
        tools: &ToolDispatcher,
        ctx: &DispatchContext,
        run: Run,
    ) -> Result<Run, ChatError> {
        let calls = run.pending_tool_calls();
        if calls.is_empty() {
            // Nothing to answer; keep polling until the backend moves on.
            tracing::warn!(run_id = %run.id, "requires_action without tool calls");
            return Ok(run);
        }

        let ctx = DispatchContext {
            run_id: run.id.clone(),
            ..ctx.clone()
        };
        let outputs = tools.dispatch(calls, &ctx).await.map_err(|e| match e {
            DispatchError::BatchTimeout(d) => ChatError::ToolBatchTimeout {
                run_id: run.id.clone(),
                timeout_ms: d.as_millis() as u64,
            },
        })?;

        let updated = backend
            .submit_tool_outputs(&ctx.thread_id, &run.id, &outputs)
            .await
            .map_err(ChatError::Submission)?;
        TraceEvent::ToolOutputsSubmitted {
            run_id: run.id.clone(),
            outputs: outputs.len(),
        }
        .emit();
        Ok(updated)
    }
}
