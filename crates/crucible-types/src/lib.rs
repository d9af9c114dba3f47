use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schema advertised to the model for a callable tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Result of one tool invocation, as returned to the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub output: String,
    #[serde(default)]
    pub metadata: Value,
}

/// Human-facing catalog entry for the `/tools` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Vec<String>,
    pub example_usage: String,
}

/// One entry in a chat response's `tools_used` list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolInvocation {
    pub name: String,
    pub icon: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn is_failed(self) -> bool {
        matches!(self, ExecutionStatus::Failed)
    }
}

/// Accounting entry for one remote execution session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub execution_count: u64,
    pub last_status: ExecutionStatus,
    #[serde(rename = "last_returnCode")]
    pub last_return_code: Option<i64>,
    pub last_stdout: String,
    pub last_stderr: String,
}
