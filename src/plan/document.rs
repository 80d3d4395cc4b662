//! Persisted form of a [`PlanTable`].
//!
//! ```json
//! {
//!   "plan": [{"task_id": 1, "task": "...", "dep": []}],
//!   "task_map": {
//!     "1": {"task": "...", "current_debug_iteration": 2, "debug_iteration_map": {"2": "..."}}
//!   },
//!   "pending_invalidation": {"from": 1, "through": 3}
//! }
//! ```
//!
//! `plan` and `task_map` live in one document so a crash can never persist
//! one without the other.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use super::{IterationNumber, PlanError, PlanTable, Task, TaskId, TaskMetadata};

/// Metadata document entry for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub task: String,
    pub current_debug_iteration: IterationNumber,
    pub debug_iteration_map: BTreeMap<IterationNumber, String>,
}

/// An artifact invalidation that has been decided but not yet confirmed done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invalidation {
    pub from: TaskId,
    pub through: TaskId,
}

impl Invalidation {
    pub fn new(from: TaskId, through: TaskId) -> Self {
        Self { from, through }
    }

    /// Smallest range covering both.
    pub fn merge(self, other: Invalidation) -> Invalidation {
        Invalidation {
            from: self.from.min(other.from),
            through: self.through.max(other.through),
        }
    }

    pub fn ids(&self) -> RangeInclusive<TaskId> {
        self.from..=self.through
    }

    pub fn is_empty(&self) -> bool {
        self.from > self.through
    }
}

/// Combined plan + metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStateDocument {
    pub plan: Vec<Task>,
    pub task_map: BTreeMap<TaskId, MetadataRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_invalidation: Option<Invalidation>,
}

impl PlanStateDocument {
    pub fn from_table(table: &PlanTable, pending_invalidation: Option<Invalidation>) -> Self {
        let (tasks, metadata) = table.snapshot();
        Self {
            plan: tasks.to_vec(),
            task_map: metadata_records(tasks, metadata),
            pending_invalidation,
        }
    }

    /// Validate and rebuild the in-memory table.
    pub fn into_table(self) -> Result<(PlanTable, Option<Invalidation>), PlanError> {
        let table = table_from_records(self.plan, self.task_map)?;
        Ok((table, self.pending_invalidation))
    }
}

fn metadata_records(
    tasks: &[Task],
    metadata: &BTreeMap<TaskId, TaskMetadata>,
) -> BTreeMap<TaskId, MetadataRecord> {
    tasks
        .iter()
        .filter_map(|task| {
            metadata.get(&task.id).map(|entry| {
                (
                    task.id,
                    MetadataRecord {
                        task: task.description.clone(),
                        current_debug_iteration: entry.current_iteration,
                        debug_iteration_map: entry.iteration_history.clone(),
                    },
                )
            })
        })
        .collect()
}

/// Rebuild a table from a plan document and a metadata document.
pub(crate) fn table_from_records(
    plan: Vec<Task>,
    task_map: BTreeMap<TaskId, MetadataRecord>,
) -> Result<PlanTable, PlanError> {
    for task in &plan {
        if let Some(record) = task_map.get(&task.id) {
            if record.task != task.description {
                return Err(PlanError::Desync(format!(
                    "task {} text differs between plan and metadata",
                    task.id
                )));
            }
        }
    }
    let metadata = task_map
        .into_iter()
        .map(|(id, record)| {
            (
                id,
                TaskMetadata {
                    current_iteration: record.current_debug_iteration,
                    iteration_history: record.debug_iteration_map,
                },
            )
        })
        .collect();
    PlanTable::from_parts(plan, metadata)
}
