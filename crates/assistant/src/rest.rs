//! REST implementation of [`AssistantBackend`].
//!
//! Every call carries the tenant key as a bearer token, the configured
//! `OpenAI-Beta` header and a fresh `X-Request-Id`. Calls are not retried:
//! the run driver's deadline is the only budget a request has.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;
use uuid::Uuid;

use cr_domain::assistant::{ListResponse, Run, Thread, ThreadMessage, ToolOutput};
use cr_domain::config::AssistantConfig;
use cr_domain::error::{Error, Result};
use cr_domain::trace::TraceEvent;

use crate::backend::{AssistantBackend, BackendConnector};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mints [`RestAssistantClient`]s that share one connection pool.
#[derive(Debug, Clone)]
pub struct RestConnector {
    http: Client,
    base_url: String,
    beta_header: Option<String>,
}

impl RestConnector {
    pub fn new(cfg: &AssistantConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            beta_header: Some(cfg.beta_header.clone()).filter(|h| !h.is_empty()),
        })
    }

    pub fn client(&self, api_key: &str) -> RestAssistantClient {
        RestAssistantClient {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            beta_header: self.beta_header.clone(),
            api_key: api_key.to_owned(),
        }
    }
}

impl BackendConnector for RestConnector {
    fn connect(&self, api_key: &str) -> Arc<dyn AssistantBackend> {
        Arc::new(self.client(api_key))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A REST client for one tenant's assistant API key.
#[derive(Clone)]
pub struct RestAssistantClient {
    http: Client,
    base_url: String,
    beta_header: Option<String>,
    api_key: String,
}

impl std::fmt::Debug for RestAssistantClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestAssistantClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl RestAssistantClient {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn decorate(&self, rb: RequestBuilder, request_id: &str) -> RequestBuilder {
        let mut rb = rb
            .bearer_auth(&self.api_key)
            .header("X-Request-Id", request_id);
        if let Some(ref beta) = self.beta_header {
            rb = rb.header("OpenAI-Beta", beta);
        }
        rb
    }

    /// Send one request and decode a JSON body of type `T`.
    ///
    /// Non-2xx statuses become [`Error::Backend`] carrying the backend's
    /// `error.message` when present.
    async fn send<T: DeserializeOwned>(&self, endpoint: &str, rb: RequestBuilder) -> Result<T> {
        let request_id = Uuid::new_v4().to_string();
        let start = Instant::now();
        let result = self.decorate(rb, &request_id).send().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                TraceEvent::AssistantCall {
                    endpoint: endpoint.to_owned(),
                    request_id,
                    status: 0,
                    duration_ms,
                }
                .emit();
                return Err(from_reqwest(e));
            }
        };

        let status = resp.status();
        TraceEvent::AssistantCall {
            endpoint: endpoint.to_owned(),
            request_id,
            status: status.as_u16(),
            duration_ms,
        }
        .emit();

        let body = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Backend {
                endpoint: endpoint.to_owned(),
                status: status.as_u16(),
                message: backend_error_message(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| Error::Backend {
            endpoint: endpoint.to_owned(),
            status: status.as_u16(),
            message: format!("undecodable response: {e}"),
        })
    }
}

/// Pull `error.message` out of an error body, falling back to the raw text.
fn backend_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.chars().take(500).collect())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
impl AssistantBackend for RestAssistantClient {
    async fn create_thread(&self) -> Result<Thread> {
        let url = self.url("/threads");
        self.send("POST /threads", self.http.post(&url).json(&json!({})))
            .await
    }

    async fn retrieve_thread(&self, thread_id: &str) -> Result<Thread> {
        let url = self.url(&format!("/threads/{thread_id}"));
        self.send("GET /threads/{id}", self.http.get(&url)).await
    }

    async fn add_user_message(&self, thread_id: &str, content: &str) -> Result<ThreadMessage> {
        let url = self.url(&format!("/threads/{thread_id}/messages"));
        let body = json!({ "role": "user", "content": content });
        self.send("POST /threads/{id}/messages", self.http.post(&url).json(&body))
            .await
    }

    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run> {
        let url = self.url(&format!("/threads/{thread_id}/runs"));
        let body = json!({ "assistant_id": assistant_id });
        self.send("POST /threads/{id}/runs", self.http.post(&url).json(&body))
            .await
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        let url = self.url(&format!("/threads/{thread_id}/runs/{run_id}"));
        self.send("GET /threads/{id}/runs/{run_id}", self.http.get(&url))
            .await
    }

    async fn list_runs(&self, thread_id: &str, limit: u32) -> Result<Vec<Run>> {
        let url = self.url(&format!("/threads/{thread_id}/runs"));
        let rb = self
            .http
            .get(&url)
            .query(&[("limit", limit.to_string()), ("order", "desc".into())]);
        let list: ListResponse<Run> = self.send("GET /threads/{id}/runs", rb).await?;
        Ok(list.data)
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        let url = self.url(&format!("/threads/{thread_id}/runs/{run_id}/cancel"));
        self.send("POST /threads/{id}/runs/{run_id}/cancel", self.http.post(&url))
            .await
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run> {
        let url = self.url(&format!(
            "/threads/{thread_id}/runs/{run_id}/submit_tool_outputs"
        ));
        let body = json!({ "tool_outputs": outputs });
        self.send(
            "POST /threads/{id}/runs/{run_id}/submit_tool_outputs",
            self.http.post(&url).json(&body),
        )
        .await
    }

    async fn list_messages(&self, thread_id: &str, limit: u32) -> Result<Vec<ThreadMessage>> {
        let url = self.url(&format!("/threads/{thread_id}/messages"));
        let rb = self
            .http
            .get(&url)
            .query(&[("limit", limit.to_string()), ("order", "desc".into())]);
        let list: ListResponse<ThreadMessage> =
            self.send("GET /threads/{id}/messages", rb).await?;
        Ok(list.data)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
