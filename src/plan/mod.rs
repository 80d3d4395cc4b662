//! Implementation plan with per-task debug iteration metadata.
//!
//! # Invariants
//! - Task ids are dense: for every task, `id == position + 1`
//! - The metadata key set always equals the task id set
//! - Per task, issued iteration numbers are never reissued
//!
//! Both collections live inside [`PlanTable`], which only exposes
//! operations that preserve these invariants.

mod document;
mod iteration;
mod table;

pub use document::{Invalidation, MetadataRecord, PlanStateDocument};
pub(crate) use document::table_from_records;
pub use iteration::IterationTracker;
pub use table::PlanTable;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::generator::GeneratorError;
use crate::store::StoreError;

/// Dense, 1-based task identifier.
pub type TaskId = u32;

/// Monotonic, per-task debug iteration number.
pub type IterationNumber = u32;

/// One step of the implementation plan.
///
/// Serialized as `{task_id, task, dep}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "task_id")]
    pub id: TaskId,
    #[serde(rename = "task")]
    pub description: String,
    #[serde(rename = "dep")]
    pub dependencies: BTreeSet<TaskId>,
}

/// A plan step before it has been assigned an id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanItem {
    #[serde(rename = "task")]
    pub description: String,
    #[serde(rename = "dep", default)]
    pub dependencies: BTreeSet<TaskId>,
}

impl PlanItem {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            dependencies: BTreeSet::new(),
        }
    }

    pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies = dependencies.into_iter().collect();
        self
    }
}

impl From<&str> for PlanItem {
    fn from(description: &str) -> Self {
        Self::new(description)
    }
}

impl From<String> for PlanItem {
    fn from(description: String) -> Self {
        Self::new(description)
    }
}

/// Debug iteration state for one task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskMetadata {
    /// Last issued iteration number (0 = none issued yet)
    pub current_iteration: IterationNumber,
    /// Problem description per iteration; sparse once records are deleted
    pub iteration_history: BTreeMap<IterationNumber, String>,
}

/// Errors raised by plan, session, and persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("Task {0} not found")]
    TaskNotFound(TaskId),

    #[error("Iteration {iteration} not found for task {task_id}")]
    IterationNotFound {
        task_id: TaskId,
        iteration: IterationNumber,
    },

    #[error("Session {0} not found")]
    SessionNotFound(String),

    #[error("Invalid index {index}: plan has {len} tasks")]
    InvalidIndex { index: i64, len: usize },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Plan and task metadata out of sync: {0}")]
    Desync(String),

    #[error("Storage failure: {0}")]
    Io(#[from] StoreError),

    #[error("Generator failure: {0}")]
    Generator(#[from] GeneratorError),
}

impl PlanError {
    /// Whether this error refers to an absent task, iteration, or session.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PlanError::TaskNotFound(_)
                | PlanError::IterationNotFound { .. }
                | PlanError::SessionNotFound(_)
        )
    }
}

/// Convert an externally supplied id into a task id.
///
/// Negative or oversized values cannot address a task.
pub fn task_id_from(raw: i64, len: usize) -> Result<TaskId, PlanError> {
    TaskId::try_from(raw).map_err(|_| PlanError::InvalidIndex { index: raw, len })
}
