use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use serde_json::Value;

/// Supplies bearer tokens for sandbox calls. The audience is the OAuth
/// scope the pool expects, e.g. `https://dynamicsessions.io/.default`.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn bearer_token(&self, audience: &str) -> anyhow::Result<String>;
}

/// Fixed token taken from configuration. Used for self-hosted runners
/// and tests; the token is handed over as-is.
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn bearer_token(&self, _audience: &str) -> anyhow::Result<String> {
        Ok(self.token.clone())
    }
}

/// Token source backed by the platform's managed identity endpoint, as
/// exposed to container workloads via `IDENTITY_ENDPOINT`.
pub struct ManagedIdentityTokenSource {
    endpoint: String,
    header: Option<String>,
    client: reqwest::Client,
}

impl ManagedIdentityTokenSource {
    pub fn new(endpoint: impl Into<String>, header: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            header,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TokenSource for ManagedIdentityTokenSource {
    async fn bearer_token(&self, audience: &str) -> anyhow::Result<String> {
        let mut req = self.client.get(&self.endpoint).query(&[
            ("resource", audience),
            ("api-version", "2019-08-01"),
        ]);
        if let Some(header) = &self.header {
            req = req.header("X-IDENTITY-HEADER", header);
        }
        let resp = req
            .send()
            .await
            .context("managed identity endpoint unreachable")?;
        if !resp.status().is_success() {
            bail!("managed identity endpoint returned {}", resp.status());
        }
        let body: Value = resp
            .json()
            .await
            .context("managed identity response was not JSON")?;
        body.get("access_token")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| anyhow!("managed identity response missing access_token"))
    }
}

/// Placeholder used when no credential source is configured. Every
/// request fails with an actionable message instead of a bare 401.
pub struct UnconfiguredTokenSource;

#[async_trait]
impl TokenSource for UnconfiguredTokenSource {
    async fn bearer_token(&self, _audience: &str) -> anyhow::Result<String> {
        bail!(
            "no sandbox credential source configured; set CRUCIBLE_SANDBOX_TOKEN \
             or run with a managed identity"
        )
    }
}

/// Credential resolution order: explicit token, then managed identity,
/// then the unconfigured placeholder.
pub fn resolve_token_source() -> Arc<dyn TokenSource> {
    if let Ok(token) = std::env::var("CRUCIBLE_SANDBOX_TOKEN") {
        if !token.trim().is_empty() {
            return Arc::new(StaticTokenSource::new(token));
        }
    }
    if let Ok(endpoint) = std::env::var("IDENTITY_ENDPOINT") {
        if !endpoint.trim().is_empty() {
            let header = std::env::var("IDENTITY_HEADER").ok();
            return Arc::new(ManagedIdentityTokenSource::new(endpoint, header));
        }
    }
    Arc::new(UnconfiguredTokenSource)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_source_returns_token_verbatim() {
        let source = StaticTokenSource::new("abc123");
        assert_eq!(source.bearer_token("any").await.unwrap(), "abc123");
    }

    #[tokio::test]
    async fn unconfigured_source_names_the_fix() {
        let err = UnconfiguredTokenSource
            .bearer_token("any")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("CRUCIBLE_SANDBOX_TOKEN"));
    }
}
