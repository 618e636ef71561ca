//! Operator endpoints for manual tool mode.
//!
//! - `GET  /v1/tool-calls/pending`  calls waiting for an output
//! - `POST /v1/tool-calls/:call_id/complete`  deliver an output

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::Value;

use crate::api::api_error;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    /// Strings are forwarded verbatim; any other JSON value is serialized.
    pub output: Value,
}

pub async fn list_pending(State(state): State<AppState>) -> impl IntoResponse {
    let pending = state.pending.list_pending();
    Json(serde_json::json!({
        "pending": pending,
        "count": pending.len(),
    }))
}

pub async fn complete(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
    Json(body): Json<CompleteRequest>,
) -> Response {
    let output = match body.output {
        Value::String(s) => s,
        other => other.to_string(),
    };

    if state.pending.complete(&call_id, output) {
        tracing::info!(call_id = %call_id, "tool call completed by operator");
        Json(serde_json::json!({ "completed": true, "callId": call_id })).into_response()
    } else {
        api_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no pending tool call with id {call_id}"),
        )
    }
}
