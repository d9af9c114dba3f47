use std::net::SocketAddr;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use crucible_sandbox::RequestTracker;

use crate::{AppState, AGENT_NAME};

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(service_info))
        .route("/chat", post(chat))
        .route("/sessions/{id}", delete(clear_session))
        .route("/health", get(health))
        .route("/tools", get(list_tools))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "crucible gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

#[derive(Debug, Deserialize, Default)]
struct ChatInput {
    prompt: Option<String>,
    session_id: Option<String>,
}

async fn chat(State(state): State<AppState>, Json(input): Json<ChatInput>) -> Response {
    let prompt = input.prompt.unwrap_or_default();
    if prompt.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "No prompt provided" })),
        )
            .into_response();
    }
    let session_id = input
        .session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "default".to_string());

    let Some(agent) = &state.agent else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "model provider not configured; set CRUCIBLE_MODEL_ENDPOINT"
            })),
        )
            .into_response();
    };

    let tracker = RequestTracker::default();
    let mut thread = state.threads.get_or_create(&session_id).await;
    match agent.run(&prompt, &mut thread, &tracker).await {
        Ok(text) => {
            let conversation_length = thread.len();
            state.threads.put(&session_id, thread).await;
            let sessions = state.sessions.snapshot().await;
            let active_sessions = if sessions.is_empty() {
                Value::Null
            } else {
                json!(sessions)
            };
            Json(json!({
                "response": text,
                "session_id": session_id,
                "agent": AGENT_NAME,
                "model": state.model,
                "tools_used": tracker.tools_used(),
                "tools_available": state.tools_available(),
                "conversation_length": conversation_length,
                "active_sessions": active_sessions,
            }))
            .into_response()
        }
        Err(e) => {
            tracing::error!(session_id, error = %e, "chat turn failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn clear_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if state.threads.remove(&id).await {
        Json(json!({ "message": format!("Session {id} cleared") })).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": format!("Session {id} not found") })),
        )
            .into_response()
    }
}

async fn health(State(state): State<AppState>) -> Response {
    if state.agent.is_none() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "status": "configuration_error",
                "error": "model provider not configured",
            })),
        )
            .into_response();
    }
    Json(json!({
        "status": "healthy",
        "agent_name": AGENT_NAME,
        "model": state.model,
        "tools_count": state.tools.len(),
        "active_conversations": state.threads.len().await,
        "dynamic_sessions": state.sessions.len().await,
        "sandbox_configured": state.sandbox_configured,
    }))
    .into_response()
}

async fn list_tools(State(state): State<AppState>) -> Json<Value> {
    let tools = state.tools.catalog();
    Json(json!({
        "total_tools": tools.len(),
        "tools": tools,
    }))
}

async fn service_info(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": AGENT_NAME,
        "model": state.model,
        "endpoints": {
            "POST /chat": "Send a prompt, get the agent's answer",
            "DELETE /sessions/{id}": "Clear a conversation",
            "GET /health": "Service health",
            "GET /tools": "Tool catalog",
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use crucible_providers::{ChatAgent, LocalEchoProvider, ThreadStore};
    use crucible_sandbox::{ExecutionTool, SessionStore, ToolRegistry};
    use tower::ServiceExt;

    fn test_state(with_agent: bool) -> AppState {
        let sessions = SessionStore::new();
        let tools = ToolRegistry::new(ExecutionTool::new(None, sessions.clone()));
        let agent = with_agent
            .then(|| Arc::new(ChatAgent::new(Arc::new(LocalEchoProvider), tools.clone())));
        AppState::new(
            agent,
            "local-echo".to_string(),
            ThreadStore::new(),
            sessions,
            tools,
            false,
        )
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn chat_requires_a_prompt() {
        let app = app_router(test_state(true));
        let response = app
            .oneshot(post_json("/chat", json!({ "prompt": "   " })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "No prompt provided");
    }

    #[tokio::test]
    async fn chat_round_trip_reports_state() {
        let app = app_router(test_state(true));
        let response = app
            .oneshot(post_json("/chat", json!({ "prompt": "hi" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["response"], "Echo: hi");
        assert_eq!(body["session_id"], "default");
        assert_eq!(body["agent"], AGENT_NAME);
        // system + user + assistant
        assert_eq!(body["conversation_length"], 3);
        assert_eq!(body["tools_used"], json!([]));
        // Sandbox unconfigured, so only discovery is advertised.
        assert_eq!(body["tools_available"], json!(["search_tools_available"]));
        assert_eq!(body["active_sessions"], Value::Null);
    }

    #[tokio::test]
    async fn conversations_are_kept_per_session_id() {
        let state = test_state(true);
        let app = app_router(state.clone());
        app.clone()
            .oneshot(post_json(
                "/chat",
                json!({ "prompt": "one", "session_id": "alpha" }),
            ))
            .await
            .unwrap();
        let response = app
            .oneshot(post_json(
                "/chat",
                json!({ "prompt": "two", "session_id": "alpha" }),
            ))
            .await
            .unwrap();
        let body = body_json(response).await;
        // 3 from the first turn, plus user + assistant.
        assert_eq!(body["conversation_length"], 5);
        assert_eq!(state.threads.len().await, 1);
    }

    #[tokio::test]
    async fn chat_without_a_provider_is_a_server_error() {
        let app = app_router(test_state(false));
        let response = app
            .oneshot(post_json("/chat", json!({ "prompt": "hi" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("not configured"));
    }

    #[tokio::test]
    async fn clearing_sessions_is_idempotent_in_status_only() {
        let state = test_state(true);
        let app = app_router(state.clone());
        app.clone()
            .oneshot(post_json(
                "/chat",
                json!({ "prompt": "hi", "session_id": "gone" }),
            ))
            .await
            .unwrap();

        let delete_req = || {
            Request::builder()
                .method("DELETE")
                .uri("/sessions/gone")
                .body(Body::empty())
                .unwrap()
        };
        let response = app.clone().oneshot(delete_req()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app.oneshot(delete_req()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reflects_configuration() {
        let app = app_router(test_state(true));
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["tools_count"], 2);
        assert_eq!(body["sandbox_configured"], false);

        let app = app_router(test_state(false));
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["status"], "configuration_error");
    }

    #[tokio::test]
    async fn tool_catalog_lists_both_tools() {
        let app = app_router(test_state(true));
        let response = app
            .oneshot(Request::get("/tools").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["total_tools"], 2);
        let names: Vec<&str> = body["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"execute_in_dynamic_session"));
        assert!(names.contains(&"search_tools_available"));
    }

    #[tokio::test]
    async fn root_describes_the_service() {
        let app = app_router(test_state(true));
        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["service"], AGENT_NAME);
        assert!(body["endpoints"].get("POST /chat").is_some());
    }
}
