pub mod auth;
pub mod classify;
pub mod client;
pub mod sessions;
pub mod tool;
pub mod wire;

pub use auth::{resolve_token_source, StaticTokenSource, TokenSource};
pub use classify::{ClassifiedResult, FailureClassifier, ERROR_MARKERS};
pub use client::{SandboxCallError, SandboxClient, SandboxOutcome};
pub use sessions::{RequestTracker, SessionStore};
pub use tool::{DiscoveryTool, ExecutionTool, Tool, ToolRegistry, DISCOVERY_TOOL, EXECUTE_TOOL};
pub use wire::{normalize, CanonicalResult, SandboxResponse};
