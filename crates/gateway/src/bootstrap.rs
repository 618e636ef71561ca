//! AppState construction shared by `serve` and the one-shot `ask` command.

use std::sync::Arc;

use anyhow::Context;
use sha2::{Digest, Sha256};

use cr_assistant::RestConnector;
use cr_domain::config::{Config, ConfigSeverity, ToolMode};

use crate::runtime::credentials::WordPressCredentials;
use crate::runtime::pending::{ManualExecutor, PendingToolCalls};
use crate::runtime::session_lock::LocalLockManager;
use crate::runtime::tools::{ToolExecutor, WebhookExecutor};
use crate::runtime::ChatRelay;
use crate::state::AppState;

/// Validate config, wire every runtime component and return the state.
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Outbound clients ─────────────────────────────────────────────
    let credentials = Arc::new(
        WordPressCredentials::new(&config.credentials).context("building credential client")?,
    );
    let connector = Arc::new(
        RestConnector::new(&config.assistant).context("building assistant client")?,
    );
    tracing::info!(base_url = %config.assistant.base_url, "assistant backend configured");

    // ── Tool execution ───────────────────────────────────────────────
    let pending = Arc::new(PendingToolCalls::new());
    let executor: Arc<dyn ToolExecutor> = match config.tools.mode {
        ToolMode::Webhook => {
            let secret = signing_secret(config.tools.signing_secret_env.as_deref());
            tracing::info!(
                submit_url = config.tools.submit_url.as_deref().unwrap_or(&config.tools.submit_path),
                signed = secret.is_some(),
                "tool calls go to the tenant webhook"
            );
            Arc::new(
                WebhookExecutor::new(&config.tools, secret).context("building webhook client")?,
            )
        }
        ToolMode::Manual => {
            tracing::info!("tool calls wait for manual completion");
            Arc::new(ManualExecutor::new(pending.clone()))
        }
    };

    // ── Locks ────────────────────────────────────────────────────────
    let locks = Arc::new(LocalLockManager::new(config.sessions.lock_poll_interval()));

    let relay = Arc::new(ChatRelay::new(
        &config,
        credentials,
        connector,
        locks,
        executor,
    ));

    // ── API token (read once, hash for constant-time comparison) ────
    let api_token_hash = {
        let env_var = &config.server.api_token_env;
        match std::env::var(env_var).ok().filter(|t| !t.is_empty()) {
            Some(token) => {
                tracing::info!(source = %format!("env:{env_var}"), "API bearer-token auth enabled");
                Some(Sha256::digest(token.as_bytes()).to_vec())
            }
            None => {
                tracing::warn!(
                    "API bearer-token auth DISABLED for operator routes; set the {env_var} env var"
                );
                None
            }
        }
    };

    Ok(AppState {
        config,
        relay,
        pending,
        api_token_hash,
    })
}

fn signing_secret(env_var: Option<&str>) -> Option<String> {
    let env_var = env_var?;
    match std::env::var(env_var).ok().filter(|s| !s.is_empty()) {
        Some(secret) => Some(secret),
        None => {
            tracing::warn!(env_var, "signing secret env var is unset; submissions go unsigned");
            None
        }
    }
}
