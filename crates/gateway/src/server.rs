//! HTTP app assembly: router, CORS, rate limiting and backpressure.

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use cr_domain::config::CorsConfig;

use crate::api;
use crate::state::AppState;

/// Build the routed app with every middleware layer applied.
pub fn build_app(state: AppState) -> anyhow::Result<Router> {
    let server = &state.config.server;
    tracing::info!(
        max_concurrent = server.max_concurrent_requests,
        origins = server.cors.allowed_origins.len(),
        "building relay app"
    );

    let router = api::router(state.clone())
        .layer(widget_cors(&server.cors))
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            server.max_concurrent_requests,
        ))
        .layer(TraceLayer::new_for_http());

    let Some(rl) = &server.rate_limit else {
        return Ok(router.with_state(state));
    };
    let governor = GovernorConfigBuilder::default()
        .per_second(rl.requests_per_second)
        .burst_size(rl.burst_size)
        .finish()
        .ok_or_else(|| {
            anyhow::anyhow!("rate_limit: requests_per_second and burst_size must be > 0")
        })?;
    tracing::info!(
        requests_per_second = rl.requests_per_second,
        burst_size = rl.burst_size,
        "per-IP rate limiting enabled"
    );
    Ok(router
        .layer(GovernorLayer {
            config: Arc::new(governor),
        })
        .with_state(state))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CORS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One entry of `server.cors.allowed_origins`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum OriginRule {
    Any,
    Exact(String),
    /// `scheme://host:` followed by any numeric port.
    AnyPort(String),
}

impl OriginRule {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim().trim_end_matches('/');
        if raw == "*" {
            Self::Any
        } else if let Some(prefix) = raw.strip_suffix('*').filter(|p| p.ends_with(':')) {
            Self::AnyPort(prefix.to_owned())
        } else {
            Self::Exact(raw.to_owned())
        }
    }

    fn matches(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(exact) => exact == origin,
            Self::AnyPort(prefix) => origin
                .strip_prefix(prefix.as_str())
                .is_some_and(|port| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())),
        }
    }
}

/// CORS for the embedded widget. Tenant pages call the chat route with a
/// JSON body and no cookies, so credentials are never allowed.
fn widget_cors(cors: &CorsConfig) -> CorsLayer {
    let rules: Vec<OriginRule> = cors
        .allowed_origins
        .iter()
        .map(|o| OriginRule::parse(o))
        .collect();

    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if rules.contains(&OriginRule::Any) {
        tracing::warn!("CORS allows every origin");
        return layer.allow_origin(tower_http::cors::Any);
    }
    layer.allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        origin
            .to_str()
            .is_ok_and(|origin| rules.iter().any(|rule| rule.matches(origin)))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_rules_parse() {
        assert_eq!(OriginRule::parse("*"), OriginRule::Any);
        assert_eq!(
            OriginRule::parse("http://localhost:*"),
            OriginRule::AnyPort("http://localhost:".into())
        );
        assert_eq!(
            OriginRule::parse("https://tenant.example/"),
            OriginRule::Exact("https://tenant.example".into())
        );
    }

    #[test]
    fn any_port_matches_digits_only() {
        let rule = OriginRule::parse("http://localhost:*");
        assert!(rule.matches("http://localhost:8080"));
        assert!(!rule.matches("http://localhost:"));
        assert!(!rule.matches("http://localhost:80.evil.com"));
        assert!(!rule.matches("https://other.example"));
    }

    #[test]
    fn exact_rule_is_exact() {
        let rule = OriginRule::parse("https://tenant.example");
        assert!(rule.matches("https://tenant.example"));
        assert!(!rule.matches("https://tenant.example.evil.com"));
    }
}
