//! Session API endpoints.
//!
//! Provides endpoints for session lifecycle and context documents:
//! - List persisted sessions
//! - Create a session
//! - Load (or reload) a session from disk
//! - Read and replace prompt, design hypothesis, faked data and theories

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use super::routes::AppState;
use super::types::{SessionListResponse, SessionResponse, TextDocument, TheoriesRequest};
use crate::plan::PlanError;
use crate::session::{SessionId, SharedSession};

/// Create session routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_sessions).post(create_session))
        .route("/:id", get(get_session))
        .route("/:id/load", post(load_session))
        .route("/:id/prompt", get(get_prompt).put(set_prompt))
        .route(
            "/:id/design_hypothesis",
            get(get_design_hypothesis).put(set_design_hypothesis),
        )
        .route("/:id/faked_data", get(get_faked_data).put(set_faked_data))
        .route("/:id/theories", get(get_theories).post(add_theories))
        .route(
            "/:id/selected_theories",
            get(get_selected_theories).put(set_selected_theories),
        )
}

pub(crate) type ApiError = (StatusCode, String);

/// Map a domain error onto an HTTP status.
pub(crate) fn error_response(err: PlanError) -> ApiError {
    let status = match &err {
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        PlanError::InvalidIndex { .. } | PlanError::InvalidOperation(_) => StatusCode::BAD_REQUEST,
        PlanError::Desync(_) => StatusCode::CONFLICT,
        PlanError::Generator(crate::generator::GeneratorError::Unavailable(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!("Request failed: {}", err);
    }
    (status, err.to_string())
}

/// Resolve the session named in the path, loading it on first use.
pub(crate) async fn session_for(state: &AppState, raw_id: &str) -> Result<SharedSession, ApiError> {
    let id = SessionId::parse(raw_id).map_err(error_response)?;
    state.registry.get(&id).await.map_err(error_response)
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionListResponse>, ApiError> {
    let sessions = state
        .registry
        .list_persisted()
        .await
        .map_err(error_response)?;
    Ok(Json(SessionListResponse { sessions }))
}

async fn create_session(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let session = state.registry.create().await.map_err(error_response)?;
    let session = session.lock().await;
    Ok((StatusCode::CREATED, Json(SessionResponse::from(&*session))))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = session_for(&state, &id).await?;
    let session = session.lock().await;
    Ok(Json(SessionResponse::from(&*session)))
}

async fn load_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let id = SessionId::parse(&id).map_err(error_response)?;
    let session = state.registry.load(&id).await.map_err(error_response)?;
    let session = session.lock().await;
    Ok(Json(SessionResponse::from(&*session)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Context documents
// ─────────────────────────────────────────────────────────────────────────────

async fn get_prompt(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TextDocument>, ApiError> {
    let session = session_for(&state, &id).await?;
    let text = session.lock().await.context().prompt.clone();
    Ok(Json(TextDocument { text }))
}

async fn set_prompt(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<TextDocument>,
) -> Result<StatusCode, ApiError> {
    let session = session_for(&state, &id).await?;
    session
        .lock()
        .await
        .set_prompt(req.text)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_design_hypothesis(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TextDocument>, ApiError> {
    let session = session_for(&state, &id).await?;
    let text = session.lock().await.context().design_hypothesis.clone();
    Ok(Json(TextDocument { text }))
}

/// Replacing the hypothesis clears the plan and every generated artifact.
async fn set_design_hypothesis(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<TextDocument>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = session_for(&state, &id).await?;
    let mut session = session.lock().await;
    session
        .set_design_hypothesis(req.text)
        .await
        .map_err(error_response)?;
    Ok(Json(SessionResponse::from(&*session)))
}

async fn get_faked_data(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TextDocument>, ApiError> {
    let session = session_for(&state, &id).await?;
    let text = session.lock().await.context().faked_data.clone();
    Ok(Json(TextDocument { text }))
}

async fn set_faked_data(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<TextDocument>,
) -> Result<StatusCode, ApiError> {
    let session = session_for(&state, &id).await?;
    session
        .lock()
        .await
        .set_faked_data(req.text)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_theories(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TheoriesRequest>, ApiError> {
    let session = session_for(&state, &id).await?;
    let theories = session.lock().await.context().theories.clone();
    Ok(Json(TheoriesRequest { theories }))
}

async fn add_theories(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<TheoriesRequest>,
) -> Result<Json<TheoriesRequest>, ApiError> {
    let session = session_for(&state, &id).await?;
    let mut session = session.lock().await;
    session
        .add_theories(req.theories)
        .await
        .map_err(error_response)?;
    Ok(Json(TheoriesRequest {
        theories: session.context().theories.clone(),
    }))
}

async fn get_selected_theories(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TheoriesRequest>, ApiError> {
    let session = session_for(&state, &id).await?;
    let theories = session.lock().await.context().selected_theories.clone();
    Ok(Json(TheoriesRequest { theories }))
}

async fn set_selected_theories(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<TheoriesRequest>,
) -> Result<StatusCode, ApiError> {
    let session = session_for(&state, &id).await?;
    session
        .lock()
        .await
        .set_selected_theories(req.theories)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}
