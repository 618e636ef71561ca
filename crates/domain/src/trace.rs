use serde::Serialize;

/// Structured trace events emitted across all ChatRelay crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    CredentialLookup {
        site_url: String,
        key_name: String,
        found: bool,
        duration_ms: u64,
    },
    AssistantCall {
        endpoint: String,
        request_id: String,
        status: u16,
        duration_ms: u64,
    },
    ThreadResolved {
        assistant_id: String,
        thread_id: String,
        created: bool,
        resumed: bool,
    },
    ActiveRunCancelled {
        thread_id: String,
        run_id: String,
        attempts: u32,
        settled: bool,
    },
    ToolDispatched {
        run_id: String,
        call_id: String,
        function: String,
        ok: bool,
        duration_ms: u64,
    },
    ToolOutputsSubmitted {
        run_id: String,
        outputs: usize,
    },
    RunFinished {
        thread_id: String,
        run_id: String,
        status: String,
        polls: u32,
        duration_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "cr_event");
    }
}
