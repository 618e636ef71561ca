//! Per-tenant assistant API key lookup.
//!
//! Each tenant site runs a WordPress plugin that exposes its stored
//! assistant keys by name. The relay never persists keys; every request
//! resolves its own.

use std::time::Instant;

use async_trait::async_trait;
use cr_domain::config::CredentialsConfig;
use cr_domain::error::{Error, Result};
use cr_domain::trace::TraceEvent;

/// Result of a key lookup. Every failure collapses into `NotFound` with a
/// reason for the logs; the caller only ever learns "not found".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialLookup {
    Found(String),
    NotFound(String),
}

#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn resolve(&self, site_url: &str, key_name: &str) -> CredentialLookup;
}

/// Reads keys from `GET {site}{path}?{query_param}={key_name}`.
pub struct WordPressCredentials {
    http: reqwest::Client,
    path: String,
    query_param: String,
    response_field: String,
}

impl WordPressCredentials {
    pub fn new(config: &CredentialsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            path: config.path.clone(),
            query_param: config.query_param.clone(),
            response_field: config.response_field.clone(),
        })
    }

    fn lookup_url(&self, site_url: &str) -> std::result::Result<reqwest::Url, String> {
        let site = site_url.trim().trim_end_matches('/');
        if site.is_empty() {
            return Err("site url is empty".into());
        }
        reqwest::Url::parse(&format!("{site}{}", self.path))
            .map_err(|e| format!("invalid site url: {e}"))
    }

    async fn fetch(&self, site_url: &str, key_name: &str) -> CredentialLookup {
        let url = match self.lookup_url(site_url) {
            Ok(url) => url,
            Err(reason) => return CredentialLookup::NotFound(reason),
        };

        let resp = match self
            .http
            .get(url)
            .query(&[(self.query_param.as_str(), key_name)])
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                return CredentialLookup::NotFound("key lookup timed out".into())
            }
            Err(e) => return CredentialLookup::NotFound(format!("key lookup failed: {e}")),
        };

        let status = resp.status();
        if !status.is_success() {
            return CredentialLookup::NotFound(format!("key lookup returned {status}"));
        }

        let body: serde_json::Value = match resp.json().await {
            Ok(body) => body,
            Err(e) => {
                return CredentialLookup::NotFound(format!("key lookup body is not JSON: {e}"))
            }
        };

        match body.get(&self.response_field).and_then(|v| v.as_str()) {
            Some(key) if !key.trim().is_empty() => CredentialLookup::Found(key.to_owned()),
            _ => CredentialLookup::NotFound(format!(
                "response has no non-empty \"{}\" field",
                self.response_field
            )),
        }
    }
}

#[async_trait]
impl CredentialSource for WordPressCredentials {
    async fn resolve(&self, site_url: &str, key_name: &str) -> CredentialLookup {
        let start = Instant::now();
        let lookup = self.fetch(site_url, key_name).await;

        if let CredentialLookup::NotFound(reason) = &lookup {
            tracing::warn!(site_url, key_name, reason = %reason, "API key lookup failed");
        }
        TraceEvent::CredentialLookup {
            site_url: site_url.to_owned(),
            key_name: key_name.to_owned(),
            found: matches!(lookup, CredentialLookup::Found(_)),
            duration_ms: start.elapsed().as_millis() as u64,
        }
        .emit();

        lookup
    }
}
