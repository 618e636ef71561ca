//! Chat endpoint called by the embedded widget.
//!
//! - `POST /v1/chat` (alias `POST /api/chat`): one message in, one reply out.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

use crate::api::api_error;
use crate::runtime::extract::TranscriptLine;
use crate::runtime::{ChatError, ChatInput, ChatOutcome};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Missing fields deserialize as empty so validation can report them all
/// in one 400 instead of a serde rejection for the first.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub assistant_id: String,
    pub thread_id: Option<String>,
    pub api_key_name: String,
    pub wordpress_url: String,
    #[serde(alias = "zapier_webhook_url")]
    pub webhook_url: Option<String>,
}

impl From<ChatRequest> for ChatInput {
    fn from(req: ChatRequest) -> Self {
        Self {
            message: req.message,
            assistant_id: req.assistant_id,
            thread_id: req.thread_id,
            api_key_name: req.api_key_name,
            site_url: req.wordpress_url,
            webhook_url: req.webhook_url,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub success: bool,
    pub thread_id: String,
    pub run_id: String,
    pub status: String,
    pub all_messages: Vec<TranscriptLine>,
    pub messages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_error: Option<String>,
}

impl From<ChatOutcome> for ChatResponse {
    fn from(outcome: ChatOutcome) -> Self {
        Self {
            success: true,
            thread_id: outcome.thread_id,
            run_id: outcome.run_id,
            status: outcome.status.to_string(),
            all_messages: outcome.transcript,
            messages: vec![outcome.latest],
            run_error: outcome.run_error,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return api_error(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                rejection.body_text(),
            )
        }
    };

    // Run detached so a client disconnect cannot abandon the request
    // between lock acquire and release.
    let relay = state.relay.clone();
    let handle = tokio::spawn(async move { relay.handle(body.into()).await });

    match handle.await {
        Ok(Ok(outcome)) => Json(ChatResponse::from(outcome)).into_response(),
        Ok(Err(e)) => error_response(&e),
        Err(join_err) => {
            tracing::error!(error = %join_err, "chat task failed");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "internal error",
            )
        }
    }
}

fn error_response(e: &ChatError) -> Response {
    match e {
        ChatError::InvalidRequest(_) | ChatError::CredentialNotFound { .. } => {
            tracing::info!(kind = e.kind(), error = %e, "chat request rejected");
        }
        _ => tracing::warn!(kind = e.kind(), error = %e, "chat request failed"),
    }
    api_error(e.status_code(), e.kind(), e.to_string())
}
