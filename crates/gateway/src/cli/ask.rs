//! `chatrelay ask`: one request through the relay without an HTTP server.
//!
//! Useful for checking a tenant's key and assistant wiring from a shell.

use std::sync::Arc;

use cr_domain::config::Config;

use crate::api::chat::ChatResponse;
use crate::bootstrap;
use crate::runtime::ChatInput;

/// Run one request and print the reply. Returns the process exit code.
pub async fn ask(config: Arc<Config>, input: ChatInput, json_output: bool) -> anyhow::Result<i32> {
    let state = bootstrap::build_app_state(config)?;

    match state.relay.handle(input).await {
        Ok(outcome) => {
            let response = ChatResponse::from(outcome);
            if json_output {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                eprintln!(
                    "\x1b[2m[thread: {}  run: {}  status: {}]\x1b[0m",
                    response.thread_id, response.run_id, response.status
                );
                println!("{}", response.messages.first().map(String::as_str).unwrap_or(""));
            }
            Ok(0)
        }
        Err(e) => {
            if json_output {
                let body = serde_json::json!({
                    "success": false,
                    "error": e.to_string(),
                    "status": "error",
                    "kind": e.kind(),
                });
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                eprintln!("error ({}): {e}", e.kind());
            }
            Ok(1)
        }
    }
}
