pub mod auth;
pub mod chat;
pub mod tool_calls;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no auth required) and **protected**
/// (gated behind the `CR_API_TOKEN` bearer-token middleware). The chat
/// routes are public because the widget calls them from tenant browsers;
/// tenant identity comes from the per-site API key lookup instead.
///
/// `state` is needed to wire up the auth middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/v1/health", get(health))
        .route("/v1/chat", post(chat::chat))
        .route("/api/chat", post(chat::chat));

    let protected = Router::new()
        .route("/v1/tool-calls/pending", get(tool_calls::list_pending))
        .route(
            "/v1/tool-calls/:call_id/complete",
            post(tool_calls::complete),
        )
        // Apply API auth middleware to all protected routes.
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public.merge(protected)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "ok": true,
        "now": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Uniform JSON error body: `{ success: false, error, status: "error", kind }`.
pub(crate) fn api_error(status: StatusCode, kind: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": message.into(),
            "status": "error",
            "kind": kind,
        })),
    )
        .into_response()
}
