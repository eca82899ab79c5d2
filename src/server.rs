//! JSON HTTP server over a [`SessionManager`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health`   | Status, version, state, open sessions, index manifest |
//! | `POST`   | `/chat`     | `{question, session?}` → `ChatResponse` |
//! | `GET`    | `/history`  | `?session=` → `{session, messages}` |
//! | `DELETE` | `/history`  | `?session=` → `{session, cleared}` |
//! | `POST`   | `/relearn`  | `{clear_history?}` → new manifest |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_ready", "message": "knowledge index is not ready; ..." } }
//! ```
//!
//! A model service failure during `/chat` is not an HTTP error: the
//! response is a normal `ChatResponse` with its `error` field set.
//!
//! Requests are handled one at a time through a mutex around the manager.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use knowledge_chat_core::models::{ChatResponse, Message};

use crate::error::SessionError;
use crate::index::IndexManifest;
use crate::manager::{RelearnOptions, SessionManager, SessionState};

pub type SharedManager = Arc<Mutex<SessionManager>>;

/// Bind `bind_addr` and serve until the process is terminated.
pub async fn run_server(bind_addr: &str, manager: SessionManager) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "knowledge-chat server listening");
    println!("Listening on http://{}", bind_addr);
    serve(listener, Arc::new(Mutex::new(manager))).await
}

/// Serve on an already-bound listener.
pub async fn serve(listener: tokio::net::TcpListener, manager: SharedManager) -> anyhow::Result<()> {
    axum::serve(listener, router(manager)).await?;
    Ok(())
}

pub fn router(manager: SharedManager) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/chat", post(handle_chat))
        .route("/history", get(handle_history).delete(handle_clear_history))
        .route("/relearn", post(handle_relearn))
        .layer(cors)
        .with_state(manager)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        let status = match &err {
            SessionError::EmptyQuestion | SessionError::Config(_) => StatusCode::BAD_REQUEST,
            SessionError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            SessionError::Service(_) => StatusCode::BAD_GATEWAY,
            SessionError::CorpusEmpty { .. } | SessionError::CorpusMissing { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            SessionError::EmbeddingModelMismatch { .. }
            | SessionError::CorruptPersistedState { .. } => StatusCode::CONFLICT,
            SessionError::Filesystem { .. } | SessionError::Index(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    state: SessionState,
    open_sessions: usize,
    index: Option<IndexManifest>,
}

async fn handle_health(State(manager): State<SharedManager>) -> Json<HealthResponse> {
    let manager = manager.lock().await;
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        state: manager.state(),
        open_sessions: manager.open_sessions(),
        index: manager.snapshot().map(|s| s.manifest().clone()),
    })
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    question: String,
    session: Option<String>,
}

async fn handle_chat(
    State(manager): State<SharedManager>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let mut manager = manager.lock().await;
    let key = req
        .session
        .unwrap_or_else(|| manager.default_key().to_string());
    let resp = manager.chat_in(&key, &req.question).await?;
    Ok(Json(resp))
}

// ============ GET/DELETE /history ============

#[derive(Deserialize)]
struct SessionQuery {
    session: Option<String>,
}

#[derive(Serialize)]
struct HistoryResponse {
    session: String,
    messages: Vec<Message>,
}

async fn handle_history(
    State(manager): State<SharedManager>,
    Query(q): Query<SessionQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    let manager = manager.lock().await;
    let session = q
        .session
        .unwrap_or_else(|| manager.default_key().to_string());
    let messages = manager.history_of(&session)?;
    Ok(Json(HistoryResponse { session, messages }))
}

#[derive(Serialize)]
struct ClearedResponse {
    session: String,
    cleared: bool,
}

async fn handle_clear_history(
    State(manager): State<SharedManager>,
    Query(q): Query<SessionQuery>,
) -> Result<Json<ClearedResponse>, AppError> {
    let mut manager = manager.lock().await;
    let session = q
        .session
        .unwrap_or_else(|| manager.default_key().to_string());
    manager.reset_session(&session)?;
    Ok(Json(ClearedResponse {
        session,
        cleared: true,
    }))
}

// ============ POST /relearn ============

#[derive(Deserialize, Default)]
struct RelearnRequest {
    #[serde(default)]
    clear_history: bool,
}

async fn handle_relearn(
    State(manager): State<SharedManager>,
    body: Option<Json<RelearnRequest>>,
) -> Result<Json<IndexManifest>, AppError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let mut manager = manager.lock().await;
    let snapshot = manager
        .relearn_knowledge(RelearnOptions {
            clear_history: req.clear_history,
        })
        .await?;
    Ok(Json(snapshot.manifest().clone()))
}
