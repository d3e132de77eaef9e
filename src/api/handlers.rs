//! HTTP request handlers

use super::assets::{serve_index, serve_static};
use super::sse::sse_stream;
use super::types::{ChatRequest, ChatResponse, ErrorResponse, SessionResponse, SuccessResponse};
use super::AppState;
use crate::persona::PersonaDisplay;
use crate::runtime::{SessionHandle, SubmitError};
use crate::state_machine::TransitionError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Root serves the chat page
        .route("/", get(serve_index))
        .route("/assets/*path", get(serve_static))
        .route("/api/persona", get(get_persona))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(end_session))
        .route("/api/sessions/:id/chat", post(send_chat))
        .route("/api/sessions/:id/stream", get(stream_session))
        .route("/version", get(get_version))
        .with_state(state)
}

async fn get_persona(State(state): State<AppState>) -> Json<PersonaDisplay> {
    Json(state.persona.display())
}

// ============================================================
// Session lifecycle
// ============================================================

async fn session_response(state: &AppState, handle: &SessionHandle) -> SessionResponse {
    let conv_state = handle.state().await;
    SessionResponse {
        id: handle.id.clone(),
        mode: state.sessions.mode().as_str(),
        messages: handle.messages().await,
        agent_working: conv_state.is_working(),
        state: conv_state,
    }
}

async fn lookup(state: &AppState, id: &str) -> Result<SessionHandle, AppError> {
    state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Session not found: {id}")))
}

async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionResponse>) {
    let handle = state.sessions.create().await;
    let body = session_response(&state, &handle).await;
    (StatusCode::CREATED, Json(body))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let handle = lookup(&state, &id).await?;
    handle.touch().await;
    Ok(Json(session_response(&state, &handle).await))
}

async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    if state.sessions.end(&id).await {
        Ok(Json(SuccessResponse { success: true }))
    } else {
        Err(AppError::NotFound(format!("Session not found: {id}")))
    }
}

// ============================================================
// Chat
// ============================================================

async fn send_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let handle = lookup(&state, &id).await?;

    // The runtime decides; two racing posts get one acceptance between them
    match handle.submit(req.text).await {
        Ok(()) => {}
        Err(SubmitError::Rejected(TransitionError::InputRejected)) => {
            return Ok(Json(ChatResponse { queued: false }));
        }
        Err(SubmitError::Rejected(e)) => return Err(AppError::Conflict(e.to_string())),
        Err(e @ SubmitError::Closed) => return Err(AppError::Internal(e.to_string())),
    }

    Ok(Json(ChatResponse { queued: true }))
}

async fn stream_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let handle = lookup(&state, &id).await?;
    handle.touch().await;

    // Subscribe before taking the snapshot so nothing falls in between
    let broadcast_rx = handle.subscribe();
    let init_event = handle.init_event().await;

    Ok(sse_stream(init_event, broadcast_rx))
}

async fn get_version() -> &'static str {
    concat!("advocate-chat ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Errors
// ============================================================

#[derive(Debug)]
enum AppError {
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
