use async_trait::async_trait;
use crucible_types::ToolSchema;
use serde_json::{json, Value};

pub mod agent;
pub mod threads;

pub use agent::{ChatAgent, AGENT_INSTRUCTIONS, MAX_TOOL_ITERATIONS};
pub use threads::{Thread, ThreadStore};

/// One tool call requested by the model, with its arguments already
/// parsed out of the wire encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// What a provider produced for one turn: either final text or a batch
/// of tool calls to satisfy before asking again.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn model(&self) -> &str;
    async fn complete(&self, messages: &[Value], tools: &[ToolSchema])
        -> anyhow::Result<Completion>;
}

/// Chat-completions provider for OpenAI-compatible endpoints, including
/// Azure OpenAI deployments exposed behind a compatible base URL.
pub struct OpenAICompatibleProvider {
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl OpenAICompatibleProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Provider for OpenAICompatibleProvider {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[Value],
        tools: &[ToolSchema],
    ) -> anyhow::Result<Completion> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(tool_to_wire).collect());
            body["tool_choice"] = json!("auto");
        }
        let mut req = self.client.post(url).json(&body);
        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key);
        }
        let response = req.send().await?;
        let status = response.status();
        let value: Value = response.json().await?;

        if !status.is_success() {
            let detail = extract_provider_error(&value)
                .unwrap_or_else(|| format!("provider request failed with status {status}"));
            anyhow::bail!(detail);
        }
        if let Some(detail) = extract_provider_error(&value) {
            anyhow::bail!(detail);
        }

        let message = value
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .ok_or_else(|| anyhow::anyhow!("provider response missing choices[0].message"))?;

        if let Some(calls) = parse_tool_calls(message) {
            return Ok(Completion::ToolCalls(calls));
        }
        Ok(Completion::Text(extract_text(message)))
    }
}

/// Offline fallback used by tests and the CLI when no model endpoint is
/// configured. Echoes the last user message.
pub struct LocalEchoProvider;

#[async_trait]
impl Provider for LocalEchoProvider {
    fn model(&self) -> &str {
        "local-echo"
    }

    async fn complete(
        &self,
        messages: &[Value],
        _tools: &[ToolSchema],
    ) -> anyhow::Result<Completion> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.get("role").and_then(Value::as_str) == Some("user"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(Completion::Text(format!("Echo: {last_user}")))
    }
}

fn tool_to_wire(schema: &ToolSchema) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": schema.name,
            "description": schema.description,
            "parameters": schema.input_schema,
        }
    })
}

fn parse_tool_calls(message: &Value) -> Option<Vec<ToolCall>> {
    let calls = message.get("tool_calls")?.as_array()?;
    if calls.is_empty() {
        return None;
    }
    let parsed = calls
        .iter()
        .filter_map(|call| {
            let function = call.get("function")?;
            let arguments = function
                .get("arguments")
                .and_then(Value::as_str)
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or_else(|| json!({}));
            Some(ToolCall {
                id: call.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                name: function
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                arguments,
            })
        })
        .collect::<Vec<_>>();
    if parsed.is_empty() {
        None
    } else {
        Some(parsed)
    }
}

fn extract_text(message: &Value) -> String {
    match message.get("content") {
        Some(Value::String(s)) => s.clone(),
        // Some providers return content as an array of typed parts.
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn extract_provider_error(value: &Value) -> Option<String> {
    value
        .get("error")
        .and_then(|v| v.get("message"))
        .and_then(Value::as_str)
        .map(String::from)
        .or_else(|| {
            value
                .get("error")
                .and_then(Value::as_str)
                .map(String::from)
        })
}

/// Wire-format message constructors. Threads store messages in the
/// provider wire shape so history replays without translation.
pub mod messages {
    use super::*;

    pub fn system(content: &str) -> Value {
        json!({ "role": "system", "content": content })
    }

    pub fn user(content: &str) -> Value {
        json!({ "role": "user", "content": content })
    }

    pub fn assistant_text(content: &str) -> Value {
        json!({ "role": "assistant", "content": content })
    }

    pub fn assistant_tool_calls(calls: &[ToolCall]) -> Value {
        let wire: Vec<Value> = calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments.to_string(),
                    }
                })
            })
            .collect();
        json!({ "role": "assistant", "content": Value::Null, "tool_calls": wire })
    }

    pub fn tool_result(call_id: &str, content: &str) -> Value {
        json!({ "role": "tool", "tool_call_id": call_id, "content": content })
    }
}
