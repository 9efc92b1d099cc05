//! HTTP tool server.
//!
//! Exposes a [`Session`]'s tools as a JSON API so an external reasoning loop
//! can call them over the network.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/tools/list` | List all registered tools with schemas |
//! | `POST` | `/tools/{name}` | Call a tool by name |
//! | `GET`  | `/health` | Health check (returns version and readiness) |
//!
//! # Error Contract
//!
//! Tool-level failures are in-band: the response is `200` with
//! `{"result": {"content": "Error: …", "artifact": null}}`, exactly what the
//! loop would see in-process. Only an unknown tool is an HTTP error:
//!
//! ```json
//! { "error": { "code": "not_found", "message": "unknown tool: foo" } }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::session::Session;
use crate::tools::{ToolInfo, ToolOutput};

/// Shared state handed to every handler through Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    /// The session whose tools are served. Ingestion may still be running.
    session: Arc<Session>,
}

/// Build the router with all routes and a permissive CORS layer.
///
/// Split out from [`run_server`] so callers can bind their own listener,
/// e.g. on an ephemeral port.
pub fn router(session: Arc<Session>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { session })
}

/// Serve the session's tools on `bind_addr` until Ctrl-C.
///
/// Returns `Ok(())` after a graceful shutdown so the caller can tear the
/// session down, or an error if binding fails.
pub async fn run_server(session: Arc<Session>, bind_addr: &str) -> anyhow::Result<()> {
    serve_until(session, bind_addr, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        tracing::info!("shutdown signal received");
    })
    .await
}

/// Like [`run_server`], but stops when `shutdown` resolves.
///
/// In-flight requests are allowed to finish before this returns.
pub async fn serve_until<F>(session: Arc<Session>, bind_addr: &str, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    for t in session.tool_infos() {
        tracing::info!(tool = %t.name, "POST /tools/{}", t.name);
    }

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("tool server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(session))
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("tool server stopped");

    Ok(())
}

// ============ Error response ============

/// JSON error body: `{"error": {"code", "message"}}`.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

/// Machine-readable code plus a human-readable message.
#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Transport-level failure, converted into an HTTP response by Axum.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

/// Body of `GET /health`. `ready` turns true once ingestion has succeeded.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    ready: bool,
}

/// `GET /health`: liveness plus whether the tools have data behind them.
async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ready: state.session.is_ready().await,
    })
}

// ============ GET /tools/list ============

/// Body of `GET /tools/list`.
#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

/// `GET /tools/list`: every registered tool with its parameter schema.
async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state.session.tool_infos(),
    })
}

// ============ POST /tools/{name} ============

/// Body of a successful `POST /tools/{name}`, including in-band errors.
#[derive(Serialize)]
struct ToolCallResponse {
    result: ToolOutput,
}

/// `POST /tools/{name}`: call one tool with the JSON body as parameters.
///
/// An empty body means no parameters. A body that is not JSON is reported
/// in-band like any other tool failure; only an unknown tool is a 404.
async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<ToolCallResponse>, AppError> {
    if !state.session.has_tool(&name) {
        return Err(not_found(format!("unknown tool: {}", name)));
    }

    let params = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(e) => {
                return Ok(Json(ToolCallResponse {
                    result: ToolOutput::error(format!("request body is not valid JSON: {}", e)),
                }))
            }
        }
    };
    let result = state.session.call_tool(&name, params).await;
    Ok(Json(ToolCallResponse { result }))
}
