//! Thread resolution: resume the caller's thread or start a new one.
//!
//! A resumed thread must not have a run in flight, otherwise the backend
//! rejects the next message. Active runs are cancelled and awaited for a
//! bounded number of attempts; if they do not settle the request moves to a
//! fresh thread instead of failing.

use std::sync::Arc;

use cr_assistant::AssistantBackend;
use cr_domain::assistant::{Run, RunStatus};
use cr_domain::config::RunsConfig;
use cr_domain::error::{Error, Result};
use cr_domain::trace::TraceEvent;
use tokio::time::Instant;

use super::session_lock::LockManager;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedThread {
    pub id: String,
    /// A new thread was created for this request.
    pub created: bool,
    /// The caller asked to resume this exact thread and it was usable.
    pub resumed: bool,
}

pub struct SessionManager {
    locks: Arc<dyn LockManager>,
    runs: RunsConfig,
    run_list_limit: u32,
}

impl SessionManager {
    pub fn new(locks: Arc<dyn LockManager>, runs: RunsConfig, run_list_limit: u32) -> Self {
        Self {
            locks,
            runs,
            run_list_limit,
        }
    }

    /// Resolve the thread for one request under the assistant's lock.
    ///
    /// Only `create_thread` failures and a lock wait that outlives
    /// `deadline` are errors; a missing or stuck thread is replaced.
    pub async fn resolve(
        &self,
        backend: &dyn AssistantBackend,
        thread_id: Option<&str>,
        assistant_id: &str,
        deadline: Instant,
    ) -> Result<ResolvedThread> {
        match tokio::time::timeout_at(deadline, self.locks.acquire(assistant_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(assistant_id, error = %e, "assistant lock unavailable, resolving unlocked");
                return self.resolve_unlocked(backend, thread_id, assistant_id).await;
            }
            Err(_) => {
                tracing::warn!(assistant_id, "request deadline passed while waiting for the assistant lock");
                return Err(Error::Timeout(format!(
                    "assistant lock for {assistant_id} not acquired before the deadline"
                )));
            }
        }
        let resolved = self.resolve_unlocked(backend, thread_id, assistant_id).await;
        self.locks.release(assistant_id).await;
        resolved
    }

    async fn resolve_unlocked(
        &self,
        backend: &dyn AssistantBackend,
        thread_id: Option<&str>,
        assistant_id: &str,
    ) -> Result<ResolvedThread> {
        let requested = thread_id.map(str::trim).filter(|id| !id.is_empty());

        if let Some(id) = requested {
            match backend.retrieve_thread(id).await {
                Ok(thread) => {
                    if self.settle_active_runs(backend, &thread.id).await {
                        return Ok(self.resolved(assistant_id, thread.id, false, true));
                    }
                    tracing::warn!(
                        thread_id = %thread.id,
                        "thread still has an active run, starting a new thread"
                    );
                }
                Err(e) if e.is_not_found() => {
                    tracing::info!(thread_id = id, "thread not found, starting a new thread");
                }
                Err(e) => {
                    tracing::warn!(thread_id = id, error = %e, "thread lookup failed, starting a new thread");
                }
            }
        }

        let thread = backend.create_thread().await?;
        Ok(self.resolved(assistant_id, thread.id, true, false))
    }

    fn resolved(
        &self,
        assistant_id: &str,
        id: String,
        created: bool,
        resumed: bool,
    ) -> ResolvedThread {
        TraceEvent::ThreadResolved {
            assistant_id: assistant_id.to_owned(),
            thread_id: id.clone(),
            created,
            resumed,
        }
        .emit();
        ResolvedThread {
            id,
            created,
            resumed,
        }
    }

    /// True when the thread has no active run left.
    async fn settle_active_runs(&self, backend: &dyn AssistantBackend, thread_id: &str) -> bool {
        if !self.runs.cancel_active_on_resume {
            return true;
        }
        let runs = match backend.list_runs(thread_id, self.run_list_limit).await {
            Ok(runs) => runs,
            Err(e) => {
                tracing::warn!(thread_id, error = %e, "listing runs failed, assuming none active");
                return true;
            }
        };

        let mut settled = true;
        for run in runs.iter().filter(|r| r.status.is_active()) {
            if !self.cancel_and_wait(backend, thread_id, run).await {
                settled = false;
            }
        }
        settled
    }

    async fn cancel_and_wait(&self, backend: &dyn AssistantBackend, thread_id: &str, run: &Run) -> bool {
        let attempts = self.runs.cancel_attempts.max(1);
        let mut status = run.status;

        for attempt in 1..=attempts {
            if status != RunStatus::Cancelling {
                match backend.cancel_run(thread_id, &run.id).await {
                    Ok(r) => status = r.status,
                    Err(e) => tracing::debug!(run_id = %run.id, error = %e, "cancel request failed"),
                }
            }
            if !status.is_active() {
                return self.cancelled(thread_id, &run.id, attempt, true);
            }

            tokio::time::sleep(self.runs.cancel_retry_interval()).await;
            match backend.retrieve_run(thread_id, &run.id).await {
                Ok(r) => status = r.status,
                Err(e) => tracing::debug!(run_id = %run.id, error = %e, "run lookup failed"),
            }
            if !status.is_active() {
                return self.cancelled(thread_id, &run.id, attempt, true);
            }
        }

        self.cancelled(thread_id, &run.id, attempts, false)
    }

    fn cancelled(&self, thread_id: &str, run_id: &str, attempts: u32, settled: bool) -> bool {
        TraceEvent::ActiveRunCancelled {
            thread_id: thread_id.to_owned(),
            run_id: run_id.to_owned(),
            attempts,
            settled,
        }
        .emit();
        settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::session_lock::LocalLockManager;
    use crate::runtime::testing::{run, MockBackend};
    use std::time::Duration;

    fn manager() -> SessionManager {
        manager_with(RunsConfig::default())
    }

    fn later() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    fn manager_with(runs: RunsConfig) -> SessionManager {
        SessionManager::new(
            Arc::new(LocalLockManager::new(Duration::from_millis(5))),
            runs,
            10,
        )
    }

    #[tokio::test]
    async fn no_thread_id_creates_thread() {
        let backend = MockBackend::new();
        let resolved = manager()
            .resolve(&*backend, None, "asst_1", later())
            .await
            .unwrap();
        assert!(resolved.created);
        assert!(!resolved.resumed);
        assert_eq!(resolved.id, "thread_new_1");
        assert_eq!(backend.count("retrieve_thread"), 0);
    }

    #[tokio::test]
    async fn blank_thread_id_is_treated_as_absent() {
        let backend = MockBackend::new();
        let resolved = manager()
            .resolve(&*backend, Some("   "), "asst_1", later())
            .await
            .unwrap();
        assert!(resolved.created);
        assert_eq!(backend.count("retrieve_thread"), 0);
    }

    #[tokio::test]
    async fn existing_thread_is_resumed() {
        let backend = MockBackend::new().with_thread("thread_old");
        let resolved = manager()
            .resolve(&*backend, Some("thread_old"), "asst_1", later())
            .await
            .unwrap();
        assert_eq!(
            resolved,
            ResolvedThread {
                id: "thread_old".into(),
                created: false,
                resumed: true
            }
        );
        assert_eq!(backend.count("create_thread"), 0);
    }

    #[tokio::test]
    async fn unknown_thread_is_replaced() {
        let backend = MockBackend::new();
        let resolved = manager()
            .resolve(&*backend, Some("thread_gone"), "asst_1", later())
            .await
            .unwrap();
        assert!(resolved.created);
        assert_ne!(resolved.id, "thread_gone");
    }

    #[tokio::test]
    async fn create_failure_is_an_error() {
        let backend = MockBackend::new();
        backend.state.lock().fail_create_thread = true;
        assert!(manager()
            .resolve(&*backend, None, "asst_1", later())
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn active_run_is_cancelled_before_resume() {
        let backend = MockBackend::new().with_thread("thread_old");
        {
            let mut state = backend.state.lock();
            state.existing_runs = vec![
                run("run_old", RunStatus::InProgress),
                run("run_done", RunStatus::Completed),
            ];
            state.cancel_settles = true;
        }

        let resolved = manager()
            .resolve(&*backend, Some("thread_old"), "asst_1", later())
            .await
            .unwrap();
        assert!(resolved.resumed);
        assert_eq!(backend.count("cancel_run"), 1);
        assert!(backend.state.lock().cancel_requested.contains("run_old"));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_run_falls_back_to_new_thread() {
        let backend = MockBackend::new().with_thread("thread_old");
        backend.state.lock().existing_runs = vec![run("run_old", RunStatus::InProgress)];

        let resolved = manager()
            .resolve(&*backend, Some("thread_old"), "asst_1", later())
            .await
            .unwrap();
        assert!(resolved.created);
        assert_eq!(resolved.id, "thread_new_1");
        assert_eq!(backend.count("retrieve_run"), 5);
    }

    #[tokio::test]
    async fn cancellation_can_be_disabled() {
        let backend = MockBackend::new().with_thread("thread_old");
        backend.state.lock().existing_runs = vec![run("run_old", RunStatus::InProgress)];

        let runs = RunsConfig {
            cancel_active_on_resume: false,
            ..RunsConfig::default()
        };
        let resolved = manager_with(runs)
            .resolve(&*backend, Some("thread_old"), "asst_1", later())
            .await
            .unwrap();
        assert!(resolved.resumed);
        assert_eq!(backend.count("list_runs"), 0);
    }

    #[tokio::test]
    async fn lock_is_released_after_resolution() {
        let locks = Arc::new(LocalLockManager::new(Duration::from_millis(5)));
        let sessions = SessionManager::new(locks.clone(), RunsConfig::default(), 10);
        let backend = MockBackend::new();

        sessions.resolve(&*backend, None, "asst_1", later()).await.unwrap();
        assert_eq!(locks.held_count(), 0);

        backend.state.lock().fail_create_thread = true;
        assert!(sessions.resolve(&*backend, None, "asst_1", later()).await.is_err());
        assert_eq!(locks.held_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lock_wait_is_bounded_by_the_deadline() {
        let locks = Arc::new(LocalLockManager::new(Duration::from_millis(5)));
        let sessions = SessionManager::new(locks.clone(), RunsConfig::default(), 10);
        let backend = MockBackend::new();
        locks.acquire("asst_1").await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let err = sessions
            .resolve(&*backend, None, "asst_1", deadline)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(Instant::now() >= deadline);
        assert_eq!(backend.count("create_thread"), 0);

        // The waiter gave up without taking the lock.
        assert!(locks.is_held("asst_1"));
        locks.release("asst_1").await;
        assert_eq!(locks.held_count(), 0);
    }
}
