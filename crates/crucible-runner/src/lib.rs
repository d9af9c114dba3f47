use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Body accepted by `/execute`. Pool-style clients put everything under
/// `properties`; plain clients use the top level. `properties` wins
/// field by field when both are present.
#[derive(Debug, Default, Deserialize)]
pub struct ExecuteInput {
    #[serde(default)]
    properties: Option<ExecuteProperties>,
    code: Option<String>,
    #[serde(alias = "shellCommand", alias = "command")]
    shell_command: Option<String>,
    language: Option<String>,
    #[serde(alias = "timeoutInSeconds", alias = "timeout")]
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ExecuteProperties {
    code: Option<String>,
    #[serde(rename = "shellCommand")]
    shell_command: Option<String>,
    language: Option<String>,
    #[serde(rename = "timeoutInSeconds")]
    timeout_in_seconds: Option<u64>,
}

struct ResolvedRequest {
    code: Option<String>,
    shell_command: Option<String>,
    language: String,
    timeout: Duration,
}

impl ExecuteInput {
    fn resolve(self) -> ResolvedRequest {
        let props = self.properties.unwrap_or_default();
        ResolvedRequest {
            code: props.code.or(self.code),
            shell_command: props.shell_command.or(self.shell_command),
            language: props
                .language
                .or(self.language)
                .unwrap_or_else(|| "python".to_string())
                .to_lowercase(),
            timeout: Duration::from_secs(
                props
                    .timeout_in_seconds
                    .or(self.timeout_secs)
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
        }
    }
}

pub fn app_router() -> Router {
    Router::new()
        .route("/", get(root))
        .route("/execute", post(execute).get(execute_probe))
        .route("/health", get(health))
}

pub async fn serve(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "crucible runner listening");
    axum::serve(listener, app_router())
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

async fn execute(Json(input): Json<ExecuteInput>) -> Response {
    let request = input.resolve();

    let has_code = request.code.as_deref().is_some_and(|c| !c.trim().is_empty());
    let has_command = request
        .shell_command
        .as_deref()
        .is_some_and(|c| !c.trim().is_empty());
    if !has_code && !has_command {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "No code or command provided" })),
        )
            .into_response();
    }

    let mut command = if has_command {
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(request.shell_command.as_deref().unwrap_or_default());
        cmd
    } else {
        let code = request.code.as_deref().unwrap_or_default();
        match build_language_command(&request.language, code) {
            Ok(cmd) => cmd,
            Err(language) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("Unsupported language: {language}") })),
                )
                    .into_response();
            }
        }
    };
    command.kill_on_drop(true);

    let started = Instant::now();
    match tokio::time::timeout(request.timeout, command.output()).await {
        Ok(Ok(output)) => {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let return_code = output.status.code().unwrap_or(-1);
            let status = if return_code == 0 { "Success" } else { "Failed" };
            tracing::debug!(return_code, elapsed_ms, "execution finished");
            Json(wrapped(
                status,
                &String::from_utf8_lossy(&output.stdout),
                &String::from_utf8_lossy(&output.stderr),
                return_code,
                elapsed_ms,
            ))
            .into_response()
        }
        Ok(Err(e)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(wrapped(
                "Failed",
                "",
                &format!("Execution error: {e}"),
                -1,
                started.elapsed().as_millis() as u64,
            )),
        )
            .into_response(),
        Err(_) => (
            StatusCode::REQUEST_TIMEOUT,
            Json(wrapped(
                "Failed",
                "",
                &format!(
                    "Execution timed out after {} seconds",
                    request.timeout.as_secs()
                ),
                -1,
                request.timeout.as_millis() as u64,
            )),
        )
            .into_response(),
    }
}

fn build_language_command(language: &str, code: &str) -> Result<Command, String> {
    let mut cmd = match language {
        "python" | "python3" => {
            let mut c = Command::new("python3");
            c.arg("-c");
            c
        }
        "javascript" | "js" | "node" => {
            let mut c = Command::new("node");
            c.arg("-e");
            c
        }
        "bash" | "sh" | "shell" => {
            let mut c = Command::new("bash");
            c.arg("-c");
            c
        }
        "powershell" | "pwsh" => {
            let mut c = Command::new("pwsh");
            c.arg("-Command");
            c
        }
        other => return Err(other.to_string()),
    };
    cmd.arg(code);
    Ok(cmd)
}

/// Every result leaves in the wrapped shape the gateway normalizes.
fn wrapped(status: &str, stdout: &str, stderr: &str, return_code: i32, elapsed_ms: u64) -> Value {
    json!({
        "properties": {
            "status": status,
            "stdout": stdout,
            "stderr": stderr,
            "returnCode": return_code,
            "executionTimeInMilliseconds": elapsed_ms,
        }
    })
}

async fn execute_probe() -> Json<Value> {
    Json(json!({ "message": "POST code to this endpoint to execute it" }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "message": "runner is ready" }))
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Crucible execution runner",
        "endpoints": {
            "POST /execute": "Run code or a shell command",
            "GET /health": "Runner health",
        }
    }))
}
