//! HTTP query API: the thin transport over the agent core.
//!
//! One operation: POST /query answers a question; GET /health reports
//! liveness. Conversation sessions live here as an in-memory map, not in
//! the core. `grounded: false` responses are 200s; only invalid input and
//! service failures map to error statuses.

use crate::agent::{Agent, AgentAnswer, ConversationContext, Turn};
use crate::error::{RagentError, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// HTTP server wrapper around the agent.
pub struct QueryServer {
    agent: Arc<Agent>,
    allowed_origins: Vec<String>,
}

#[derive(Clone)]
struct AppState {
    agent: Arc<Agent>,
    sessions: Arc<Mutex<HashMap<String, ConversationContext>>>,
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    question: String,
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    answer: String,
    tools_used: Vec<crate::tools::ToolInvocationRecord>,
    grounded: bool,
    metadata: ResponseMetadata,
}

#[derive(Debug, Serialize)]
struct ResponseMetadata {
    search_type: String,
    timing_ms: u64,
    simplification_steps: usize,
    timed_out: bool,
}

impl From<AgentAnswer> for QueryResponse {
    fn from(answer: AgentAnswer) -> Self {
        Self {
            answer: answer.answer,
            tools_used: answer.tools_used,
            grounded: answer.grounded,
            metadata: ResponseMetadata {
                search_type: answer.metadata.search_type,
                timing_ms: answer.metadata.elapsed_ms,
                simplification_steps: answer.metadata.simplification_steps,
                timed_out: answer.metadata.timed_out,
            },
        }
    }
}

impl QueryServer {
    pub fn new(agent: Arc<Agent>, allowed_origins: Vec<String>) -> Self {
        Self {
            agent,
            allowed_origins,
        }
    }

    /// Run the HTTP server on the given port.
    pub async fn run(&self, port: u16) -> Result<()> {
        let app = self.create_router();

        let addr = format!("127.0.0.1:{}", port);
        log::info!("Starting query server on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            RagentError::Io(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                format!(
                    "Failed to bind to {}: {}. Another process may be using the port; \
                     set http_server.port in config.toml to change it.",
                    addr, e
                ),
            ))
        })?;

        axum::serve(listener, app).await.map_err(|e| {
            RagentError::Io(std::io::Error::other(format!("HTTP server error: {}", e)))
        })?;

        Ok(())
    }

    fn create_router(&self) -> Router {
        // Explicit origin list when configured; permissive for local dev
        let cors = if self.allowed_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<axum::http::HeaderValue> = self
                .allowed_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Router::new()
            .route("/query", post(handle_query))
            .route("/schema/refresh", post(handle_schema_refresh))
            .route("/health", get(handle_health))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
            .with_state(AppState {
                agent: self.agent.clone(),
                sessions: Arc::new(Mutex::new(HashMap::new())),
            })
    }
}

async fn handle_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Response {
    let session_context = request
        .session_id
        .as_ref()
        .and_then(|id| state.sessions.lock().unwrap().get(id).cloned());

    match state
        .agent
        .answer(&request.question, session_context.as_ref())
        .await
    {
        Ok(answer) => {
            if let Some(session_id) = request.session_id {
                let mut sessions = state.sessions.lock().unwrap();
                sessions.entry(session_id).or_default().turns.push(Turn {
                    question: request.question,
                    answer: answer.answer.clone(),
                });
            }
            (StatusCode::OK, Json(QueryResponse::from(answer))).into_response()
        }
        Err(e) => {
            let status = error_status(&e);
            log::warn!("Query failed ({}): {}", status, e);
            (status, Json(json!({"error": e.to_string()}))).into_response()
        }
    }
}

async fn handle_schema_refresh(State(state): State<AppState>) -> Response {
    match state.agent.refresh_schema().await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "refreshed"}))).into_response(),
        Err(e) => {
            let status = error_status(&e);
            (status, Json(json!({"error": e.to_string()}))).into_response()
        }
    }
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Invalid input is the caller's fault; service failures are retryable;
/// everything else is a plain server error.
fn error_status(error: &RagentError) -> StatusCode {
    match error {
        RagentError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        e if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
