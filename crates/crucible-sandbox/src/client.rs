use std::sync::Arc;
use std::time::Duration;

use reqwest::header::LOCATION;
use serde_json::{json, Value};

use crate::auth::TokenSource;

/// Hard cap on a single synchronous execution, matching the timeout
/// advertised to the sandbox in the request payload.
pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(60);
const POLL_ATTEMPTS: u32 = 10;
const POLL_DELAY: Duration = Duration::from_secs(1);
const POLL_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// What the sandbox ultimately said for one execution request.
#[derive(Debug)]
pub enum SandboxOutcome {
    /// HTTP 200 with an execution payload to normalize.
    Completed(Value),
    /// Async acceptance polled through to completion; the extracted
    /// result text is already final.
    Polled(String),
    /// Async acceptance that never reached `Completed` within the
    /// polling budget.
    PollTimedOut,
    /// HTTP 202 without a Location header to poll.
    AcceptedNoLocation,
}

#[derive(Debug)]
pub enum SandboxCallError {
    /// Token acquisition failed; nothing was sent to the sandbox.
    Auth(String),
    /// The request or a poll could not be completed at the HTTP layer.
    Network(String),
    /// The synchronous request exceeded [`EXECUTION_TIMEOUT`].
    Timeout,
    /// The sandbox answered with a status other than 200 or 202.
    HttpStatus { status: u16, body: String },
}

/// HTTP client for a dynamic-sessions style execution endpoint. The
/// session id travels as the `identifier` query parameter; the sandbox
/// keeps interpreter state per identifier.
#[derive(Clone)]
pub struct SandboxClient {
    endpoint: String,
    audience: String,
    tokens: Arc<dyn TokenSource>,
    client: reqwest::Client,
    poll_attempts: u32,
    poll_delay: Duration,
}

impl SandboxClient {
    pub fn new(
        endpoint: impl Into<String>,
        audience: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self {
            endpoint,
            audience: audience.into(),
            tokens,
            client: reqwest::Client::new(),
            poll_attempts: POLL_ATTEMPTS,
            poll_delay: POLL_DELAY,
        }
    }

    /// Overrides the async-acceptance polling budget.
    pub fn with_poll_policy(mut self, attempts: u32, delay: Duration) -> Self {
        self.poll_attempts = attempts;
        self.poll_delay = delay;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn execute(
        &self,
        session_id: &str,
        code: &str,
    ) -> Result<SandboxOutcome, SandboxCallError> {
        let token = self
            .tokens
            .bearer_token(&self.audience)
            .await
            .map_err(|e| SandboxCallError::Auth(e.to_string()))?;

        let url = format!("{}/execute?identifier={}", self.endpoint, session_id);
        // Both payload shapes at once: pool-managed sandboxes read the
        // `properties` object, self-hosted runners read the top level.
        let payload = json!({
            "properties": {
                "codeInputType": "inline",
                "executionType": "synchronous",
                "timeoutInSeconds": EXECUTION_TIMEOUT.as_secs(),
                "code": code,
            },
            "code": code,
            "language": "python",
        });

        tracing::debug!(session_id, url = %url, "dispatching sandbox execution");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&payload)
            .timeout(EXECUTION_TIMEOUT)
            .send()
            .await
            .map_err(classify_transport_error)?;

        match response.status().as_u16() {
            200 => {
                let body: Value = response
                    .json()
                    .await
                    .map_err(|e| SandboxCallError::Network(e.to_string()))?;
                Ok(SandboxOutcome::Completed(body))
            }
            202 => {
                let Some(location) = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(String::from)
                else {
                    return Ok(SandboxOutcome::AcceptedNoLocation);
                };
                // Relative Location headers resolve against the endpoint.
                let location = if location.starts_with('/') {
                    format!("{}{}", self.endpoint, location)
                } else {
                    location
                };
                self.poll(&location, &token).await
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(SandboxCallError::HttpStatus { status, body })
            }
        }
    }

    async fn poll(&self, location: &str, token: &str) -> Result<SandboxOutcome, SandboxCallError> {
        for attempt in 1..=self.poll_attempts {
            tokio::time::sleep(self.poll_delay).await;
            let response = self
                .client
                .get(location)
                .bearer_auth(token)
                .timeout(POLL_REQUEST_TIMEOUT)
                .send()
                .await
                .map_err(classify_transport_error)?;
            if !response.status().is_success() {
                continue;
            }
            let body: Value = response
                .json()
                .await
                .map_err(|e| SandboxCallError::Network(e.to_string()))?;
            let status = body
                .get("properties")
                .and_then(|p| p.get("status"))
                .and_then(Value::as_str);
            if status == Some("Completed") {
                let text = body
                    .get("properties")
                    .and_then(|p| p.get("result"))
                    .and_then(Value::as_str)
                    .map(String::from)
                    .unwrap_or_else(|| body.to_string());
                tracing::debug!(attempt, "sandbox poll completed");
                return Ok(SandboxOutcome::Polled(text));
            }
        }
        Ok(SandboxOutcome::PollTimedOut)
    }
}

fn classify_transport_error(err: reqwest::Error) -> SandboxCallError {
    if err.is_timeout() {
        SandboxCallError::Timeout
    } else {
        SandboxCallError::Network(err.to_string())
    }
}
