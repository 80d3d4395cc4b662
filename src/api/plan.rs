//! Plan, code and debug iteration endpoints of a session.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use std::sync::Arc;

use super::routes::AppState;
use super::sessions::{error_response, session_for, ApiError};
use super::types::{
    CodeResponse, InsertStepRequest, IterateRequest, IterationListResponse, IterationRecord,
    IterationStartedResponse, PlanEditResponse, ReplacePlanRequest, SaveCodeRequest,
    UpdateStepRequest,
};
use crate::plan::{task_id_from, IterationNumber, PlanStateDocument, TaskId};
use crate::session::Session;

/// Create plan routes (nested under a session).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:id/plan", get(get_plan).put(replace_plan))
        .route("/:id/plan/generate", post(generate_plan))
        .route("/:id/plan/steps", post(insert_step))
        .route("/:id/plan/steps/:task_id", put(update_step).delete(remove_step))
        .route("/:id/tasks/:task_id/code", get(get_code).put(save_code))
        .route("/:id/tasks/:task_id/code/generate", post(generate_code))
        .route(
            "/:id/tasks/:task_id/iterations",
            get(list_iterations).post(iterate_code),
        )
        .route(
            "/:id/tasks/:task_id/iterations/:n/select",
            post(select_iteration_code),
        )
        .route(
            "/:id/tasks/:task_id/iterations/:n",
            delete(delete_iteration),
        )
}

fn resolve_task_id(session: &Session, raw: i64) -> Result<TaskId, ApiError> {
    task_id_from(raw, session.table().len()).map_err(error_response)
}

fn plan_state(session: &Session) -> PlanStateDocument {
    PlanStateDocument::from_table(session.table(), session.pending_invalidation())
}

// ─────────────────────────────────────────────────────────────────────────────
// Plan
// ─────────────────────────────────────────────────────────────────────────────

async fn get_plan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PlanStateDocument>, ApiError> {
    let session = session_for(&state, &id).await?;
    let session = session.lock().await;
    Ok(Json(plan_state(&session)))
}

async fn replace_plan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ReplacePlanRequest>,
) -> Result<Json<PlanStateDocument>, ApiError> {
    let session = session_for(&state, &id).await?;
    let mut session = session.lock().await;
    session.replace_plan(req.plan).await.map_err(error_response)?;
    Ok(Json(plan_state(&session)))
}

async fn generate_plan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PlanStateDocument>, ApiError> {
    let session = session_for(&state, &id).await?;
    let mut session = session.lock().await;
    session.generate_plan().await.map_err(error_response)?;
    Ok(Json(plan_state(&session)))
}

async fn insert_step(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<InsertStepRequest>,
) -> Result<(StatusCode, Json<PlanEditResponse>), ApiError> {
    let session = session_for(&state, &id).await?;
    let mut session = session.lock().await;
    let after = resolve_task_id(&session, req.after)?;
    let (new_id, invalidated) = session
        .insert_task(after, req.item)
        .await
        .map_err(error_response)?;
    Ok((
        StatusCode::CREATED,
        Json(PlanEditResponse {
            task_id: new_id,
            invalidated: invalidated.ids().collect(),
            plan_length: session.table().len(),
        }),
    ))
}

async fn update_step(
    State(state): State<Arc<AppState>>,
    Path((id, raw_task_id)): Path<(String, i64)>,
    Json(req): Json<UpdateStepRequest>,
) -> Result<Json<PlanEditResponse>, ApiError> {
    let session = session_for(&state, &id).await?;
    let mut session = session.lock().await;
    let task_id = resolve_task_id(&session, raw_task_id)?;
    let invalidated = session
        .update_task(task_id, req.task)
        .await
        .map_err(error_response)?;
    Ok(Json(PlanEditResponse {
        task_id,
        invalidated,
        plan_length: session.table().len(),
    }))
}

async fn remove_step(
    State(state): State<Arc<AppState>>,
    Path((id, raw_task_id)): Path<(String, i64)>,
) -> Result<Json<PlanEditResponse>, ApiError> {
    let session = session_for(&state, &id).await?;
    let mut session = session.lock().await;
    let task_id = resolve_task_id(&session, raw_task_id)?;
    let (_, invalidated) = session.remove_task(task_id).await.map_err(error_response)?;
    Ok(Json(PlanEditResponse {
        task_id,
        invalidated: invalidated.ids().collect(),
        plan_length: session.table().len(),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Code
// ─────────────────────────────────────────────────────────────────────────────

async fn get_code(
    State(state): State<Arc<AppState>>,
    Path((id, raw_task_id)): Path<(String, i64)>,
) -> Result<Json<CodeResponse>, ApiError> {
    let session = session_for(&state, &id).await?;
    let session = session.lock().await;
    let task_id = resolve_task_id(&session, raw_task_id)?;
    let code = session.main_code(task_id).await.map_err(error_response)?;
    Ok(Json(CodeResponse { task_id, code }))
}

async fn save_code(
    State(state): State<Arc<AppState>>,
    Path((id, raw_task_id)): Path<(String, i64)>,
    Json(req): Json<SaveCodeRequest>,
) -> Result<StatusCode, ApiError> {
    let session = session_for(&state, &id).await?;
    let session = session.lock().await;
    let task_id = resolve_task_id(&session, raw_task_id)?;
    session
        .save_main_code(task_id, &req.code)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn generate_code(
    State(state): State<Arc<AppState>>,
    Path((id, raw_task_id)): Path<(String, i64)>,
) -> Result<Json<CodeResponse>, ApiError> {
    let session = session_for(&state, &id).await?;
    let mut session = session.lock().await;
    let task_id = resolve_task_id(&session, raw_task_id)?;
    let code = session
        .generate_code(task_id)
        .await
        .map_err(error_response)?;
    Ok(Json(CodeResponse { task_id, code }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Debug iterations
// ─────────────────────────────────────────────────────────────────────────────

async fn list_iterations(
    State(state): State<Arc<AppState>>,
    Path((id, raw_task_id)): Path<(String, i64)>,
) -> Result<Json<IterationListResponse>, ApiError> {
    let session = session_for(&state, &id).await?;
    let session = session.lock().await;
    let task_id = resolve_task_id(&session, raw_task_id)?;
    let (_, metadata) = session.get(task_id).map_err(error_response)?;
    let iterations = session
        .list_iterations(task_id)
        .map_err(error_response)?
        .into_iter()
        .map(|(iteration, problem)| IterationRecord { iteration, problem })
        .collect();
    Ok(Json(IterationListResponse {
        task_id,
        current_iteration: metadata.current_iteration,
        iterations,
    }))
}

async fn iterate_code(
    State(state): State<Arc<AppState>>,
    Path((id, raw_task_id)): Path<(String, i64)>,
    Json(req): Json<IterateRequest>,
) -> Result<(StatusCode, Json<IterationStartedResponse>), ApiError> {
    let session = session_for(&state, &id).await?;
    let mut session = session.lock().await;
    let task_id = resolve_task_id(&session, raw_task_id)?;
    let iteration = session
        .iterate_code(task_id, req.problem)
        .await
        .map_err(error_response)?;
    Ok((
        StatusCode::CREATED,
        Json(IterationStartedResponse { task_id, iteration }),
    ))
}

async fn select_iteration_code(
    State(state): State<Arc<AppState>>,
    Path((id, raw_task_id, iteration)): Path<(String, i64, IterationNumber)>,
) -> Result<Json<CodeResponse>, ApiError> {
    let session = session_for(&state, &id).await?;
    let session = session.lock().await;
    let task_id = resolve_task_id(&session, raw_task_id)?;
    let code = session
        .select_iteration_code(task_id, iteration)
        .await
        .map_err(error_response)?;
    Ok(Json(CodeResponse { task_id, code }))
}

async fn delete_iteration(
    State(state): State<Arc<AppState>>,
    Path((id, raw_task_id, iteration)): Path<(String, i64, IterationNumber)>,
) -> Result<StatusCode, ApiError> {
    let session = session_for(&state, &id).await?;
    let mut session = session.lock().await;
    let task_id = resolve_task_id(&session, raw_task_id)?;
    session
        .delete_iteration_record(task_id, iteration)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}
