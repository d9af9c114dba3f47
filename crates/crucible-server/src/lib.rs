use std::sync::Arc;

use crucible_providers::{ChatAgent, ThreadStore};
use crucible_sandbox::{SessionStore, ToolRegistry};

pub mod http;

pub use http::{app_router, serve};

pub const AGENT_NAME: &str = "Crucible SmartAssistant";

/// Shared state behind every handler. Cheap to clone; everything inside
/// is reference-counted.
#[derive(Clone)]
pub struct AppState {
    /// Absent when no model endpoint is configured; chat then answers
    /// with a configuration error instead of guessing.
    pub agent: Option<Arc<ChatAgent>>,
    pub model: String,
    pub threads: ThreadStore,
    pub sessions: SessionStore,
    pub tools: ToolRegistry,
    pub sandbox_configured: bool,
}

impl AppState {
    pub fn new(
        agent: Option<Arc<ChatAgent>>,
        model: String,
        threads: ThreadStore,
        sessions: SessionStore,
        tools: ToolRegistry,
        sandbox_configured: bool,
    ) -> Self {
        Self {
            agent,
            model,
            threads,
            sessions,
            tools,
            sandbox_configured,
        }
    }

    /// Tool names the current configuration can actually serve.
    pub fn tools_available(&self) -> Vec<&'static str> {
        let mut available = vec![crucible_sandbox::DISCOVERY_TOOL];
        if self.sandbox_configured {
            available.push(crucible_sandbox::EXECUTE_TOOL);
        }
        available
    }
}
