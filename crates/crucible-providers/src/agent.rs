use std::sync::Arc;

use crucible_sandbox::{RequestTracker, ToolRegistry};

use crate::threads::Thread;
use crate::{messages, Completion, Provider};

/// System prompt given to every conversation.
pub const AGENT_INSTRUCTIONS: &str = "You are SmartAssistant, a helpful assistant that can run \
Python code in a secure sandbox session when a question calls for computation, data work, or \
verification. Sessions keep interpreter state, so build on earlier results instead of repeating \
them. Relay execution reports faithfully, including errors. For questions that need no code, \
answer directly.";

/// Upper bound on provider round-trips per prompt. A model that keeps
/// requesting tools past this is looping.
pub const MAX_TOOL_ITERATIONS: usize = 8;

/// Drives the provider/tool loop for one conversation turn.
pub struct ChatAgent {
    provider: Arc<dyn Provider>,
    tools: ToolRegistry,
    instructions: String,
}

impl ChatAgent {
    pub fn new(provider: Arc<dyn Provider>, tools: ToolRegistry) -> Self {
        Self {
            provider,
            tools,
            instructions: AGENT_INSTRUCTIONS.to_string(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Runs one user turn to a final text answer, appending everything
    /// (user message, tool calls, tool results, answer) to the thread.
    pub async fn run(
        &self,
        prompt: &str,
        thread: &mut Thread,
        tracker: &RequestTracker,
    ) -> anyhow::Result<String> {
        if thread.is_empty() {
            thread.push(messages::system(&self.instructions));
        }
        thread.push(messages::user(prompt));

        let schemas = self.tools.schemas();
        for _ in 0..MAX_TOOL_ITERATIONS {
            match self.provider.complete(&thread.messages, &schemas).await? {
                Completion::Text(text) => {
                    thread.push(messages::assistant_text(&text));
                    return Ok(text);
                }
                Completion::ToolCalls(calls) => {
                    tracing::debug!(count = calls.len(), "model requested tool calls");
                    thread.push(messages::assistant_tool_calls(&calls));
                    for call in &calls {
                        let result = self
                            .tools
                            .execute(&call.name, call.arguments.clone(), tracker)
                            .await?;
                        thread.push(messages::tool_result(&call.id, &result.output));
                    }
                }
            }
        }
        anyhow::bail!("model exceeded {MAX_TOOL_ITERATIONS} tool iterations without answering")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LocalEchoProvider, ToolCall};
    use async_trait::async_trait;
    use crucible_sandbox::{ExecutionTool, SessionStore, EXECUTE_TOOL};
    use crucible_types::ToolSchema;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    fn registry() -> ToolRegistry {
        ToolRegistry::new(ExecutionTool::new(None, SessionStore::new()))
    }

    /// Returns each queued completion in order.
    struct Scripted {
        responses: Mutex<Vec<Completion>>,
    }

    impl Scripted {
        fn new(mut responses: Vec<Completion>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl Provider for Scripted {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _messages: &[Value],
            _tools: &[ToolSchema],
        ) -> anyhow::Result<Completion> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow::anyhow!("script exhausted"))
        }
    }

    #[tokio::test]
    async fn plain_answer_builds_a_three_message_thread() {
        let agent = ChatAgent::new(Arc::new(LocalEchoProvider), registry());
        let mut thread = Thread::default();
        let tracker = RequestTracker::default();
        let answer = agent.run("hello", &mut thread, &tracker).await.unwrap();
        assert_eq!(answer, "Echo: hello");
        // system, user, assistant
        assert_eq!(thread.len(), 3);
        assert_eq!(thread.messages[0]["role"], "system");
    }

    #[tokio::test]
    async fn system_message_is_only_inserted_once() {
        let agent = ChatAgent::new(Arc::new(LocalEchoProvider), registry());
        let mut thread = Thread::default();
        let tracker = RequestTracker::default();
        agent.run("one", &mut thread, &tracker).await.unwrap();
        agent.run("two", &mut thread, &tracker).await.unwrap();
        let systems = thread
            .messages
            .iter()
            .filter(|m| m["role"] == "system")
            .count();
        assert_eq!(systems, 1);
        assert_eq!(thread.len(), 5);
    }

    #[tokio::test]
    async fn tool_calls_are_executed_and_fed_back() {
        let provider = Scripted::new(vec![
            Completion::ToolCalls(vec![ToolCall {
                id: "call_1".into(),
                name: EXECUTE_TOOL.into(),
                arguments: json!({ "code": "print(1)" }),
            }]),
            Completion::Text("done".into()),
        ]);
        let agent = ChatAgent::new(Arc::new(provider), registry());
        let mut thread = Thread::default();
        let tracker = RequestTracker::default();
        let answer = agent.run("run it", &mut thread, &tracker).await.unwrap();
        assert_eq!(answer, "done");

        // system, user, assistant tool_calls, tool result, assistant text
        assert_eq!(thread.len(), 5);
        let tool_msg = &thread.messages[3];
        assert_eq!(tool_msg["role"], "tool");
        assert_eq!(tool_msg["tool_call_id"], "call_1");
        // No sandbox configured, so the tool reported that instead.
        assert!(tool_msg["content"]
            .as_str()
            .unwrap()
            .contains("Configuration Error"));
    }

    #[tokio::test]
    async fn endless_tool_requests_hit_the_iteration_cap() {
        let call = Completion::ToolCalls(vec![ToolCall {
            id: "c".into(),
            name: "search_tools_available".into(),
            arguments: json!({}),
        }]);
        let provider = Scripted::new(vec![call; MAX_TOOL_ITERATIONS + 1]);
        let agent = ChatAgent::new(Arc::new(provider), registry());
        let mut thread = Thread::default();
        let tracker = RequestTracker::default();
        let err = agent.run("loop", &mut thread, &tracker).await.unwrap_err();
        assert!(err.to_string().contains("tool iterations"));
    }
}
