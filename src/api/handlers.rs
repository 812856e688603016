//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{ErrorResponse, FlowsResponse, SessionView, SuccessResponse};
use super::AppState;
use crate::engine::{ChannelAdapter, TurnReport};
use crate::error::DialogError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/events", post(post_event))
        .route("/api/sessions/:id/clear", post(clear_session))
        .route("/api/sessions/:id/stream", get(stream_session))
        .route("/api/flows", get(list_flows))
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Sessions
// ============================================================

async fn post_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<TurnReport>, AppError> {
    let event = state.channel.parse_message(&body)?;
    let report = state.runtime.dispatch(&state.session(&id), event).await?;
    Ok(Json(report))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let lookup = state.session(&id);
    let session = state
        .runtime
        .blocking(move |engine| engine.session(&lookup))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No session {id}")))?;
    Ok(Json(SessionView::from(&session)))
}

async fn clear_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.runtime.clear(&state.session(&id)).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn stream_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    // subscribe first so nothing sent while loading is missed
    let rx = state.channel.subscribe(&id);
    let lookup = state.session(&id);
    let session = state
        .runtime
        .blocking(move |engine| engine.session(&lookup))
        .await?;
    let init = json!({
        "session_id": id,
        "session": session.as_ref().map(SessionView::from),
    });
    Ok(sse_stream(init, rx))
}

// ============================================================
// Flows
// ============================================================

async fn list_flows(State(state): State<AppState>) -> Json<FlowsResponse> {
    let graph = state.runtime.engine().graph();
    Json(FlowsResponse::from(graph.as_ref()))
}

async fn get_version() -> &'static str {
    concat!("dialog-engine ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Errors
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<DialogError> for AppError {
    fn from(e: DialogError) -> Self {
        match e {
            DialogError::Channel(_) | DialogError::InvalidValue(_) => {
                AppError::BadRequest(e.to_string())
            }
            DialogError::SessionBusy(_) | DialogError::SessionVersionMismatch { .. } => {
                AppError::Conflict(e.to_string())
            }
            other => {
                tracing::error!(error = %other, "Request failed");
                AppError::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
