mod assistant;
mod credentials;
mod observability;
mod runs;
mod server;
mod sessions;
mod tools;

pub use assistant::*;
pub use credentials::*;
pub use observability::*;
pub use runs::*;
pub use server::*;
pub use sessions::*;
pub use tools::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub runs: RunsConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return every issue found.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut issues = Vec::new();
        let mut error = |field: &str, message: &str| {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: field.into(),
                message: message.into(),
            })
        };

        if self.server.port == 0 {
            error("server.port", "port must be greater than 0");
        }
        if self.server.host.is_empty() {
            error("server.host", "host must not be empty");
        }
        if self.server.max_concurrent_requests == 0 {
            error(
                "server.max_concurrent_requests",
                "must allow at least one request",
            );
        }
        if !self.assistant.base_url.starts_with("http") {
            error("assistant.base_url", "must be an http(s) URL");
        }
        if !self.credentials.path.starts_with('/') {
            error("credentials.path", "must start with '/'");
        }
        if self.credentials.response_field.is_empty() {
            error("credentials.response_field", "must not be empty");
        }
        if self.runs.deadline_secs == 0 {
            error("runs.deadline_secs", "deadline must be greater than 0");
        }
        if self.runs.poll_interval_ms == 0 {
            error("runs.poll_interval_ms", "poll interval must be greater than 0");
        }
        if self.sessions.lock_poll_interval_ms == 0 {
            error(
                "sessions.lock_poll_interval_ms",
                "lock poll interval must be greater than 0",
            );
        }
        if self.tools.submit_url.is_none() && !self.tools.submit_path.starts_with('/') {
            error("tools.submit_path", "must start with '/'");
        }
        if let Some(url) = &self.tools.submit_url {
            if !url.starts_with("http") {
                error("tools.submit_url", "must be an http(s) URL");
            }
        }

        let mut warn = |field: &str, message: String| {
            issues.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: field.into(),
                message,
            })
        };

        if self.runs.poll_interval_ms >= self.runs.deadline_secs.saturating_mul(1000) {
            warn(
                "runs.poll_interval_ms",
                "poll interval is not shorter than the deadline; runs get a single poll".into(),
            );
        }
        if self.tools.per_call_timeout_ms > self.tools.batch_timeout_ms {
            warn(
                "tools.per_call_timeout_ms",
                format!(
                    "per-call timeout ({} ms) exceeds the batch timeout ({} ms)",
                    self.tools.per_call_timeout_ms, self.tools.batch_timeout_ms
                ),
            );
        }
        if self.tools.batch_timeout_ms >= self.runs.deadline_secs.saturating_mul(1000) {
            warn(
                "tools.batch_timeout_ms",
                "tool batch timeout is not shorter than the run deadline".into(),
            );
        }
        if self.server.cors.allowed_origins.len() == 1 && self.server.cors.allowed_origins[0] == "*"
        {
            warn(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins".into(),
            );
        }

        issues
    }
}
