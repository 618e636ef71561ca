//! Tool-call dispatch for runs in `requires_action`.
//!
//! Every pending call is resolved concurrently through a [`ToolExecutor`].
//! A failing call still yields an output (an error JSON) so the run can
//! continue; only the batch timeout fails the whole step.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cr_domain::assistant::{ToolCall, ToolOutput};
use cr_domain::config::ToolsConfig;
use cr_domain::error::{Error, Result};
use cr_domain::trace::TraceEvent;
use futures_util::future::join_all;
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use serde_json::{json, Map, Value};
use sha2::Sha256;
use tracing::Instrument;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature on tool submissions.
pub const SIGNATURE_HEADER: &str = "X-Signature-256";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-request facts a tool submission needs.
#[derive(Debug, Clone, Default)]
pub struct DispatchContext {
    pub site_url: String,
    pub webhook_url: Option<String>,
    pub thread_id: String,
    pub run_id: String,
}

/// Produces the output string for one tool call. `Err` carries a message
/// that is reported back to the model as an error output.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        call: &ToolCall,
        arguments: Value,
        ctx: &DispatchContext,
    ) -> std::result::Result<String, String>;
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("tool calls did not finish within {} ms", .0.as_millis())]
    BatchTimeout(Duration),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolDispatcher {
    executor: Arc<dyn ToolExecutor>,
    batch_timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(executor: Arc<dyn ToolExecutor>, batch_timeout: Duration) -> Self {
        Self {
            executor,
            batch_timeout,
        }
    }

    /// Resolve every call, at most once per call id, in input order.
    pub async fn dispatch(
        &self,
        calls: &[ToolCall],
        ctx: &DispatchContext,
    ) -> std::result::Result<Vec<ToolOutput>, DispatchError> {
        let mut seen = HashSet::new();
        let unique: Vec<&ToolCall> = calls
            .iter()
            .filter(|call| seen.insert(call.id.as_str()))
            .collect();
        if unique.len() < calls.len() {
            tracing::warn!(
                run_id = %ctx.run_id,
                duplicates = calls.len() - unique.len(),
                "dropping duplicate tool call ids"
            );
        }

        let futures = unique.into_iter().map(|call| {
            let span = tracing::info_span!(
                "tool.call",
                call_id = %call.id,
                function = %call.function.name,
            );
            self.resolve_one(call, ctx).instrument(span)
        });

        match tokio::time::timeout(self.batch_timeout, join_all(futures)).await {
            Ok(outputs) => Ok(outputs),
            Err(_) => {
                tracing::warn!(
                    run_id = %ctx.run_id,
                    timeout_ms = self.batch_timeout.as_millis() as u64,
                    "tool batch timed out"
                );
                Err(DispatchError::BatchTimeout(self.batch_timeout))
            }
        }
    }

    async fn resolve_one(&self, call: &ToolCall, ctx: &DispatchContext) -> ToolOutput {
        let start = Instant::now();
        let result = match parse_arguments(&call.function.arguments) {
            Ok(arguments) => self.executor.execute(call, arguments, ctx).await,
            Err(e) => Err(format!("invalid tool arguments: {e}")),
        };

        if let Err(message) = &result {
            tracing::warn!(error = %message, "tool call failed");
        }
        TraceEvent::ToolDispatched {
            run_id: ctx.run_id.clone(),
            call_id: call.id.clone(),
            function: call.function.name.clone(),
            ok: result.is_ok(),
            duration_ms: start.elapsed().as_millis() as u64,
        }
        .emit();

        ToolOutput {
            tool_call_id: call.id.clone(),
            output: result.unwrap_or_else(|message| error_output(&call.id, &message)),
        }
    }
}

/// Parse the model's argument string. Blank means no arguments; a JSON value
/// that is not an object is wrapped as `{"arguments": value}`.
pub fn parse_arguments(raw: &str) -> serde_json::Result<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    let value: Value = serde_json::from_str(raw)?;
    Ok(match value {
        Value::Object(_) => value,
        other => json!({ "arguments": other }),
    })
}

/// Output reported to the model when a call could not be completed.
pub fn error_output(call_id: &str, message: &str) -> String {
    json!({ "error": message, "tool_call_id": call_id }).to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Webhook executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// POSTs the call's arguments plus report metadata to the tenant's
/// submission endpoint and returns the raw response body.
pub struct WebhookExecutor {
    http: reqwest::Client,
    submit_path: String,
    submit_url: Option<String>,
    report_status: String,
    signing_secret: Option<String>,
}

impl WebhookExecutor {
    pub fn new(config: &ToolsConfig, signing_secret: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.per_call_timeout())
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            submit_path: config.submit_path.clone(),
            submit_url: config.submit_url.clone(),
            report_status: config.report_status.clone(),
            signing_secret,
        })
    }

    fn target_url(&self, ctx: &DispatchContext) -> std::result::Result<String, String> {
        if let Some(url) = &self.submit_url {
            return Ok(url.clone());
        }
        let site = ctx.site_url.trim().trim_end_matches('/');
        if site.is_empty() {
            return Err("no site url to submit to".into());
        }
        Ok(format!("{site}{}", self.submit_path))
    }
}

/// Merge report metadata into the arguments. Metadata wins on key clashes.
pub fn build_payload(
    arguments: Value,
    call: &ToolCall,
    ctx: &DispatchContext,
    status: &str,
) -> Value {
    let mut body = match arguments {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("arguments".into(), other);
            map
        }
    };
    body.insert(
        "webhook_url".into(),
        ctx.webhook_url
            .as_ref()
            .map(|u| Value::String(u.clone()))
            .unwrap_or(Value::Null),
    );
    body.insert("report_type".into(), json!(call.function.name));
    body.insert("status".into(), json!(status));
    body.insert("report_id".into(), json!(call.id));
    Value::Object(body)
}

/// `sha256=<hex>` HMAC of `body` under `secret`.
pub fn sign_body(secret: &str, body: &[u8]) -> std::result::Result<String, InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

#[async_trait]
impl ToolExecutor for WebhookExecutor {
    async fn execute(
        &self,
        call: &ToolCall,
        arguments: Value,
        ctx: &DispatchContext,
    ) -> std::result::Result<String, String> {
        let url = self.target_url(ctx)?;
        let payload = build_payload(arguments, call, ctx, &self.report_status);
        let body = serde_json::to_vec(&payload).map_err(|e| e.to_string())?;

        let mut req = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = &self.signing_secret {
            let signature =
                sign_body(secret, &body).map_err(|e| format!("signing submission: {e}"))?;
            req = req.header(SIGNATURE_HEADER, signature);
        }

        let resp = req.body(body).send().await.map_err(|e| {
            if e.is_timeout() {
                "submission timed out".to_string()
            } else {
                format!("submission failed: {e}")
            }
        })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| format!("reading submission response failed: {e}"))?;
        if !status.is_success() {
            let snippet: String = text.chars().take(200).collect();
            return Err(format!("submission endpoint returned {status}: {snippet}"));
        }
        tracing::debug!(url = %url, status = status.as_u16(), "tool submission accepted");

        if text.trim().is_empty() {
            Ok("{}".into())
        } else {
            Ok(text)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testing::tool_call;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct EchoExecutor {
        delay: Duration,
    }

    #[async_trait]
    impl ToolExecutor for EchoExecutor {
        async fn execute(
            &self,
            call: &ToolCall,
            arguments: Value,
            _ctx: &DispatchContext,
        ) -> std::result::Result<String, String> {
            tokio::time::sleep(self.delay).await;
            if call.function.name == "broken" {
                return Err("boom".into());
            }
            Ok(arguments.to_string())
        }
    }

    fn ctx(site: &str) -> DispatchContext {
        DispatchContext {
            site_url: site.into(),
            webhook_url: Some("https://hooks.zapier.com/abc".into()),
            thread_id: "thread_1".into(),
            run_id: "run_1".into(),
        }
    }

    fn dispatcher(delay: Duration, batch: Duration) -> ToolDispatcher {
        ToolDispatcher::new(Arc::new(EchoExecutor { delay }), batch)
    }

    #[test]
    fn arguments_parse_rules() {
        assert_eq!(parse_arguments("").unwrap(), json!({}));
        assert_eq!(parse_arguments(r#"{"a":1}"#).unwrap(), json!({"a": 1}));
        assert_eq!(parse_arguments("[1,2]").unwrap(), json!({"arguments": [1, 2]}));
        assert!(parse_arguments("{not json").is_err());
    }

    #[test]
    fn payload_carries_report_metadata() {
        let call = tool_call("call_1", "brand_report", r#"{"topic":"x"}"#);
        let payload = build_payload(json!({"topic": "x", "status": "mine"}), &call, &ctx("s"), "pending");
        assert_eq!(payload["topic"], "x");
        assert_eq!(payload["webhook_url"], "https://hooks.zapier.com/abc");
        assert_eq!(payload["report_type"], "brand_report");
        assert_eq!(payload["report_id"], "call_1");
        assert_eq!(payload["status"], "pending");
    }

    #[test]
    fn payload_without_webhook_has_null() {
        let call = tool_call("call_1", "f", "{}");
        let mut c = ctx("s");
        c.webhook_url = None;
        assert!(build_payload(json!({}), &call, &c, "pending")["webhook_url"].is_null());
    }

    #[test]
    fn signature_is_stable_hex() {
        let sig = sign_body("secret", b"{}").unwrap();
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig.len(), "sha256=".len() + 64);
        assert_eq!(sig, sign_body("secret", b"{}").unwrap());
        assert_ne!(sig, sign_body("other", b"{}").unwrap());
        // Empty keys are valid HMAC keys and still sign.
        assert!(sign_body("", b"{}").unwrap().starts_with("sha256="));
    }

    #[tokio::test]
    async fn one_output_per_unique_call_in_order() {
        let calls = vec![
            tool_call("call_a", "f", r#"{"n":1}"#),
            tool_call("call_b", "f", r#"{"n":2}"#),
            tool_call("call_a", "f", r#"{"n":3}"#),
        ];
        let outputs = dispatcher(Duration::ZERO, Duration::from_secs(1))
            .dispatch(&calls, &ctx("s"))
            .await
            .unwrap();
        let ids: Vec<_> = outputs.iter().map(|o| o.tool_call_id.as_str()).collect();
        assert_eq!(ids, ["call_a", "call_b"]);
        assert_eq!(outputs[0].output, r#"{"n":1}"#);
    }

    #[tokio::test]
    async fn failures_become_error_outputs() {
        let calls = vec![
            tool_call("call_bad_json", "f", "{oops"),
            tool_call("call_broken", "broken", "{}"),
            tool_call("call_ok", "f", "{}"),
        ];
        let outputs = dispatcher(Duration::ZERO, Duration::from_secs(1))
            .dispatch(&calls, &ctx("s"))
            .await
            .unwrap();
        assert_eq!(outputs.len(), 3);

        let bad: Value = serde_json::from_str(&outputs[0].output).unwrap();
        assert_eq!(bad["tool_call_id"], "call_bad_json");
        assert!(bad["error"].as_str().unwrap().contains("invalid tool arguments"));

        let broken: Value = serde_json::from_str(&outputs[1].output).unwrap();
        assert_eq!(broken["error"], "boom");
        assert_eq!(outputs[2].output, "{}");
    }

    #[tokio::test]
    async fn calls_run_concurrently() {
        let calls: Vec<_> = (0..5)
            .map(|i| tool_call(&format!("call_{i}"), "f", "{}"))
            .collect();
        let start = Instant::now();
        let outputs = dispatcher(Duration::from_millis(100), Duration::from_secs(2))
            .dispatch(&calls, &ctx("s"))
            .await
            .unwrap();
        assert_eq!(outputs.len(), 5);
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_batch_times_out() {
        let calls = vec![tool_call("call_1", "f", "{}")];
        let err = dispatcher(Duration::from_secs(30), Duration::from_secs(10))
            .dispatch(&calls, &ctx("s"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::BatchTimeout(d) if d == Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn webhook_posts_to_site_submit_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wp-json/brand-voice/v1/submit"))
            .and(body_partial_json(json!({
                "topic": "launch",
                "report_type": "brand_report",
                "report_id": "call_1",
                "status": "pending",
                "webhook_url": "https://hooks.zapier.com/abc",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"queued":true}"#))
            .expect(1)
            .mount(&server)
            .await;

        let exec = WebhookExecutor::new(&ToolsConfig::default(), None).unwrap();
        let call = tool_call("call_1", "brand_report", "");
        let out = exec
            .execute(&call, json!({"topic": "launch"}), &ctx(&server.uri()))
            .await
            .unwrap();
        assert_eq!(out, r#"{"queued":true}"#);
    }

    #[tokio::test]
    async fn webhook_signs_when_secret_configured() {
        let server = MockServer::start().await;
        let call = tool_call("call_1", "f", "");
        let payload = build_payload(json!({}), &call, &ctx(&server.uri()), "pending");
        let expected = sign_body("s3cret", &serde_json::to_vec(&payload).unwrap()).unwrap();
        Mock::given(method("POST"))
            .and(header(SIGNATURE_HEADER, expected.as_str()))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let exec = WebhookExecutor::new(&ToolsConfig::default(), Some("s3cret".into())).unwrap();
        let out = exec
            .execute(&call, json!({}), &ctx(&server.uri()))
            .await
            .unwrap();
        assert_eq!(out, "{}");
    }

    #[tokio::test]
    async fn webhook_error_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("fatal"))
            .mount(&server)
            .await;

        let exec = WebhookExecutor::new(&ToolsConfig::default(), None).unwrap();
        let call = tool_call("call_1", "f", "");
        let err = exec
            .execute(&call, json!({}), &ctx(&server.uri()))
            .await
            .unwrap_err();
        assert!(err.contains("500"));
    }

    #[tokio::test]
    async fn fixed_submit_url_overrides_site() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/submit"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let config = ToolsConfig {
            submit_url: Some(format!("{}/hooks/submit", server.uri())),
            ..ToolsConfig::default()
        };
        let exec = WebhookExecutor::new(&config, None).unwrap();
        let call = tool_call("call_1", "f", "");
        let out = exec
            .execute(&call, json!({}), &ctx("https://unused.example"))
            .await
            .unwrap();
        assert_eq!(out, "ok");
    }
}
