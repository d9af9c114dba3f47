use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use crucible_types::{ToolInfo, ToolInvocation, ToolResult, ToolSchema};
use serde_json::{json, Value};

use crate::classify::{ClassifiedResult, FailureClassifier};
use crate::client::{SandboxCallError, SandboxClient, SandboxOutcome};
use crate::sessions::{RequestTracker, SessionStore};
use crate::wire::{normalize, SandboxResponse};

pub const DISCOVERY_TOOL: &str = "search_tools_available";
pub const EXECUTE_TOOL: &str = "execute_in_dynamic_session";

#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;
    fn info(&self) -> ToolInfo;
    async fn execute(&self, args: Value, tracker: &RequestTracker) -> anyhow::Result<ToolResult>;
}

#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new(execution: ExecutionTool) -> Self {
        let mut map: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        map.insert(DISCOVERY_TOOL.to_string(), Arc::new(DiscoveryTool));
        map.insert(EXECUTE_TOOL.to_string(), Arc::new(execution));
        Self {
            tools: Arc::new(map),
        }
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| t.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn catalog(&self) -> Vec<ToolInfo> {
        let mut infos: Vec<ToolInfo> = self.tools.values().map(|t| t.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        tracker: &RequestTracker,
    ) -> anyhow::Result<ToolResult> {
        let Some(tool) = self.tools.get(name) else {
            return Ok(ToolResult {
                output: format!("Unknown tool: {name}"),
                metadata: json!({}),
            });
        };
        tool.execute(args, tracker).await
    }
}

/// Lists the callable tools. Kept as a tool so the model can answer
/// "what can you do" questions without a round of guessing.
pub struct DiscoveryTool;

#[async_trait]
impl Tool for DiscoveryTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: DISCOVERY_TOOL.to_string(),
            description: "List the tools available to this assistant, with a short description \
                          of each. Call this when asked what you are capable of."
                .to_string(),
            input_schema: json!({ "type": "object", "properties": {} }),
        }
    }

    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: DISCOVERY_TOOL.to_string(),
            description: "Lists the tools available to the assistant".to_string(),
            parameters: vec![],
            example_usage: "What tools do you have?".to_string(),
        }
    }

    async fn execute(&self, _args: Value, tracker: &RequestTracker) -> anyhow::Result<ToolResult> {
        tracker.record(ToolInvocation {
            name: DISCOVERY_TOOL.to_string(),
            icon: "🔧".to_string(),
            description: "Tool discovery".to_string(),
            session_id: None,
        });
        let output = format!(
            "Available tools:\n\
             - {DISCOVERY_TOOL}: lists the tools available to the assistant\n\
             - {EXECUTE_TOOL}: runs Python code in a secure, stateful sandbox session"
        );
        Ok(ToolResult {
            output,
            metadata: json!({}),
        })
    }
}

/// Runs Python code in a remote sandbox session and renders the outcome
/// as a markdown report for the model to relay.
pub struct ExecutionTool {
    client: Option<SandboxClient>,
    store: SessionStore,
    classifier: FailureClassifier,
}

impl ExecutionTool {
    pub fn new(client: Option<SandboxClient>, store: SessionStore) -> Self {
        Self {
            client,
            store,
            classifier: FailureClassifier::default(),
        }
    }

    async fn run(&self, code: &str, tracker: &RequestTracker) -> String {
        let Some(client) = &self.client else {
            return "Configuration Error: no sandbox endpoint configured. Set \
                    CRUCIBLE_SANDBOX_ENDPOINT to enable code execution."
                .to_string();
        };

        let session_id = self.store.pick_or_create_session().await;
        tracker.record(ToolInvocation {
            name: EXECUTE_TOOL.to_string(),
            icon: "📦".to_string(),
            description: "Python Execution".to_string(),
            session_id: Some(session_id.clone()),
        });

        match client.execute(&session_id, code).await {
            Ok(SandboxOutcome::Completed(body)) => {
                let canonical = normalize(SandboxResponse::from_value(&body));
                let classified = self.classifier.classify(canonical);
                self.store.record_execution(&session_id, &classified).await;
                render_report(&session_id, code, &classified)
            }
            Ok(SandboxOutcome::Polled(text)) => {
                format!("Code executed successfully:\n\n{text}")
            }
            Ok(SandboxOutcome::PollTimedOut) => {
                "Timeout Error: code execution was accepted but timed out waiting for \
                 completion. It may still be running in the sandbox."
                    .to_string()
            }
            Ok(SandboxOutcome::AcceptedNoLocation) => {
                "Code execution was accepted but the sandbox provided no status URL to poll."
                    .to_string()
            }
            Err(SandboxCallError::Auth(detail)) => {
                tracing::warn!(%detail, "sandbox token acquisition failed");
                format!("Authentication Error: could not acquire a sandbox token: {detail}")
            }
            Err(SandboxCallError::Timeout) => {
                "Timeout Error: sandbox execution timed out after 60 seconds.".to_string()
            }
            Err(SandboxCallError::Network(detail)) => {
                tracing::warn!(%detail, "sandbox unreachable");
                format!("Network Error: could not reach the sandbox: {detail}")
            }
            Err(SandboxCallError::HttpStatus { status, body }) => {
                format!("Execution Error: sandbox returned HTTP {status}: {body}")
            }
        }
    }
}

#[async_trait]
impl Tool for ExecutionTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: EXECUTE_TOOL.to_string(),
            description: "Execute Python code in a secure sandbox session. Sessions keep \
                          interpreter state, so variables and imports persist across calls \
                          within a conversation. Returns stdout, stderr and the return code."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "Python code to execute in the sandbox session"
                    }
                },
                "required": ["code"]
            }),
        }
    }

    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: EXECUTE_TOOL.to_string(),
            description: "Executes Python code in a secure, stateful sandbox session"
                .to_string(),
            parameters: vec!["code".to_string()],
            example_usage: "Calculate the first 20 Fibonacci numbers".to_string(),
        }
    }

    async fn execute(&self, args: Value, tracker: &RequestTracker) -> anyhow::Result<ToolResult> {
        let code = args.get("code").and_then(Value::as_str).unwrap_or_default();
        let output = self.run(code, tracker).await;
        Ok(ToolResult {
            output,
            metadata: json!({}),
        })
    }
}

/// Session ids are long; reports show a recognizable prefix.
fn session_prefix(session_id: &str) -> &str {
    &session_id[..session_id.len().min(12)]
}

fn render_report(session_id: &str, code: &str, result: &ClassifiedResult) -> String {
    let prefix = session_prefix(session_id);
    if result.status.is_failed() {
        let error = if result.stderr.is_empty() {
            &result.stdout
        } else {
            &result.stderr
        };
        format!(
            "**Code Execution Failed**\n\n\
             **Session ID:** {prefix}...\n\
             **Return Code:** {}\n\n\
             **Code Executed:**\n```python\n{code}\n```\n\n\
             **Error:**\n```\n{error}\n```",
            result.return_code.unwrap_or(0)
        )
    } else {
        let output = if result.stdout.is_empty() {
            "(no output)"
        } else {
            &result.stdout
        };
        format!(
            "**Code Execution Successful**\n\n\
             **Session ID:** {prefix}...\n\n\
             **Code Executed:**\n```python\n{code}\n```\n\n\
             **Output:**\n```\n{output}\n```"
        )
    }
}
