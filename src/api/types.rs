//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::plan::{IterationNumber, PlanItem, PlanStateDocument, TaskId};
use crate::session::{Session, SessionContext, SessionId};

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Sessions currently held in memory
    pub active_sessions: usize,
}

/// Persisted session listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionId>,
}

/// Full view of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub id: SessionId,
    pub context: SessionContext,
    #[serde(flatten)]
    pub state: PlanStateDocument,
}

impl From<&Session> for SessionResponse {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id().clone(),
            context: session.context().clone(),
            state: PlanStateDocument::from_table(session.table(), session.pending_invalidation()),
        }
    }
}

/// Body for the free-text session documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextDocument {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TheoriesRequest {
    pub theories: Vec<String>,
}

/// Replace the whole plan.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplacePlanRequest {
    pub plan: Vec<PlanItem>,
}

/// Insert a step after `after` (`0` inserts at the head).
#[derive(Debug, Clone, Deserialize)]
pub struct InsertStepRequest {
    pub after: i64,
    #[serde(flatten)]
    pub item: PlanItem,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStepRequest {
    pub task: String,
}

/// Result of a structural plan edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanEditResponse {
    /// Id of the inserted, updated or removed step
    pub task_id: TaskId,
    /// Steps whose generated artifacts were discarded
    pub invalidated: Vec<TaskId>,
    pub plan_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeResponse {
    pub task_id: TaskId,
    pub code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaveCodeRequest {
    pub code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IterateRequest {
    pub problem: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: IterationNumber,
    pub problem: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationListResponse {
    pub task_id: TaskId,
    pub current_iteration: IterationNumber,
    pub iterations: Vec<IterationRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationStartedResponse {
    pub task_id: TaskId,
    pub iteration: IterationNumber,
}
