use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crucible_providers::{
    ChatAgent, LocalEchoProvider, OpenAICompatibleProvider, Thread, ThreadStore,
};
use crucible_sandbox::{
    resolve_token_source, ExecutionTool, RequestTracker, SandboxClient, SessionStore, ToolRegistry,
};
use crucible_server::AppState;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_SANDBOX_AUDIENCE: &str = "https://dynamicsessions.io/.default";

#[derive(Parser, Debug)]
#[command(name = "crucible-engine")]
#[command(about = "Chat gateway with sandboxed code execution")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the chat gateway.
    Serve {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Run the self-hosted execution runner.
    Runner {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 8081)]
        port: u16,
    },
    /// Answer a single prompt and exit.
    Run { prompt: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { hostname, port } => {
            let addr = parse_addr(&hostname, port)?;
            let state = build_state();
            if state.agent.is_none() {
                tracing::warn!(
                    "CRUCIBLE_MODEL_ENDPOINT is not set; /chat will answer with an error"
                );
            }
            if !state.sandbox_configured {
                tracing::warn!("CRUCIBLE_SANDBOX_ENDPOINT is not set; code execution is disabled");
            }
            crucible_server::serve(addr, state).await
        }
        Command::Runner { hostname, port } => {
            let addr = parse_addr(&hostname, port)?;
            crucible_runner::serve(addr).await
        }
        Command::Run { prompt } => {
            let state = build_state();
            let agent = match &state.agent {
                Some(agent) => Arc::clone(agent),
                None => {
                    tracing::warn!("no model endpoint configured; using the local echo provider");
                    Arc::new(ChatAgent::new(
                        Arc::new(LocalEchoProvider),
                        state.tools.clone(),
                    ))
                }
            };
            let mut thread = Thread::default();
            let tracker = RequestTracker::default();
            let answer = agent.run(&prompt, &mut thread, &tracker).await?;
            println!("{answer}");
            Ok(())
        }
    }
}

fn parse_addr(hostname: &str, port: u16) -> anyhow::Result<SocketAddr> {
    format!("{hostname}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {hostname}:{port}"))
}

/// Assembles gateway state from the environment. Missing endpoints
/// degrade features instead of failing startup.
fn build_state() -> AppState {
    let sessions = SessionStore::new();

    let sandbox_endpoint = env_nonempty("CRUCIBLE_SANDBOX_ENDPOINT");
    let audience = env_nonempty("CRUCIBLE_SANDBOX_AUDIENCE")
        .unwrap_or_else(|| DEFAULT_SANDBOX_AUDIENCE.to_string());
    let client = sandbox_endpoint
        .as_deref()
        .map(|endpoint| SandboxClient::new(endpoint, audience, resolve_token_source()));
    let sandbox_configured = client.is_some();

    let tools = ToolRegistry::new(ExecutionTool::new(client, sessions.clone()));

    let model = env_nonempty("CRUCIBLE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let agent = env_nonempty("CRUCIBLE_MODEL_ENDPOINT").map(|endpoint| {
        let provider = OpenAICompatibleProvider::new(
            endpoint,
            env_nonempty("CRUCIBLE_MODEL_API_KEY"),
            model.clone(),
        );
        Arc::new(ChatAgent::new(Arc::new(provider), tools.clone()))
    });

    AppState::new(
        agent,
        model,
        ThreadStore::new(),
        sessions,
        tools,
        sandbox_configured,
    )
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_addr_accepts_ipv4_host_and_port() {
        let addr = parse_addr("127.0.0.1", 8080).unwrap();
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn parse_addr_rejects_hostnames() {
        assert!(parse_addr("localhost", 8080).is_err());
    }
}
