//! Ordered task list kept in lock-step with its metadata table.

use std::collections::{BTreeMap, BTreeSet};

use super::{PlanError, PlanItem, Task, TaskId, TaskMetadata};

/// The plan and its per-task metadata as one synchronized unit.
///
/// # Invariants
/// - `tasks[i].id == i + 1` for every position `i`
/// - `metadata.keys() == {1..=tasks.len()}`
/// - every history key is `<= current_iteration` of its task
///
/// Every mutating call runs against a staged copy, re-checks the invariants,
/// and only then replaces `self`. A failed check leaves the table untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanTable {
    tasks: Vec<Task>,
    metadata: BTreeMap<TaskId, TaskMetadata>,
}

impl PlanTable {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a plan with fresh ids `1..=N` and empty metadata.
    ///
    /// A task may only depend on tasks listed before it.
    pub fn from_items<I, T>(items: I) -> Result<Self, PlanError>
    where
        I: IntoIterator<Item = T>,
        T: Into<PlanItem>,
    {
        let tasks: Vec<Task> = items
            .into_iter()
            .map(Into::into)
            .enumerate()
            .map(|(pos, item)| Task {
                id: pos as TaskId + 1,
                description: item.description,
                dependencies: item.dependencies,
            })
            .collect();
        for task in &tasks {
            check_dependencies(task.id, &task.dependencies, tasks.len())?;
        }
        let metadata = tasks
            .iter()
            .map(|task| (task.id, TaskMetadata::default()))
            .collect();
        Ok(Self { tasks, metadata })
    }

    /// Rebuild a table from loaded parts, rejecting any that disagree.
    pub fn from_parts(
        tasks: Vec<Task>,
        metadata: BTreeMap<TaskId, TaskMetadata>,
    ) -> Result<Self, PlanError> {
        let table = Self { tasks, metadata };
        table.verify()?;
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn metadata(&self) -> &BTreeMap<TaskId, TaskMetadata> {
        &self.metadata
    }

    /// Read-only view for persistence.
    pub fn snapshot(&self) -> (&[Task], &BTreeMap<TaskId, TaskMetadata>) {
        (&self.tasks, &self.metadata)
    }

    pub fn get(&self, id: TaskId) -> Result<(&Task, &TaskMetadata), PlanError> {
        let task = self.task(id)?;
        let metadata = self
            .metadata
            .get(&id)
            .ok_or_else(|| PlanError::Desync(format!("task {} has no metadata entry", id)))?;
        Ok((task, metadata))
    }

    pub fn task(&self, id: TaskId) -> Result<&Task, PlanError> {
        let index = self.index_of(id)?;
        Ok(&self.tasks[index])
    }

    /// Insert a task immediately after `after_id` (`0` inserts at the head).
    ///
    /// The new task gets id `after_id + 1`; every task at or above that id
    /// moves up by one in both representations.
    pub fn insert_task(
        &mut self,
        after_id: TaskId,
        description: impl Into<String>,
    ) -> Result<TaskId, PlanError> {
        self.insert_item(after_id, PlanItem::new(description))
    }

    /// Insert a task with dependencies. Dependencies are read in post-insert
    /// numbering and must name tasks before the new one.
    pub fn insert_item(&mut self, after_id: TaskId, item: PlanItem) -> Result<TaskId, PlanError> {
        if after_id as usize > self.tasks.len() {
            return Err(PlanError::InvalidIndex {
                index: i64::from(after_id),
                len: self.tasks.len(),
            });
        }
        let new_id = after_id + 1;
        check_dependencies(new_id, &item.dependencies, self.tasks.len())?;

        self.mutate(|table| {
            for task in &mut table.tasks {
                task.dependencies = shift_dependencies_up(&task.dependencies, new_id);
            }
            table.tasks.insert(
                after_id as usize,
                Task {
                    id: new_id,
                    description: item.description,
                    dependencies: item.dependencies,
                },
            );
            table.renumber_from(after_id as usize);

            // Descending, so a shifted entry never lands on a key not yet moved.
            let to_shift: Vec<TaskId> = table.metadata.range(new_id..).map(|(k, _)| *k).rev().collect();
            for key in to_shift {
                if let Some(entry) = table.metadata.remove(&key) {
                    table.metadata.insert(key + 1, entry);
                }
            }
            table.metadata.insert(new_id, TaskMetadata::default());
            Ok(new_id)
        })
    }

    /// Remove the task at `id`; every later task moves down by one.
    ///
    /// The removed task's metadata is discarded. Removing the last task
    /// yields an empty plan.
    pub fn remove_task(&mut self, id: TaskId) -> Result<Task, PlanError> {
        let index = self.index_of(id)?;

        self.mutate(|table| {
            let removed = table.tasks.remove(index);
            table.renumber_from(index);
            for task in &mut table.tasks {
                task.dependencies = shift_dependencies_down(&task.dependencies, id);
            }

            table.metadata.remove(&id);
            // Ascending, mirroring the descending order used on insert.
            let to_shift: Vec<TaskId> = table.metadata.range(id + 1..).map(|(k, _)| *k).collect();
            for key in to_shift {
                if let Some(entry) = table.metadata.remove(&key) {
                    table.metadata.insert(key - 1, entry);
                }
            }
            Ok(removed)
        })
    }

    /// Replace the text of task `id` in place.
    ///
    /// Returns the ids from `id` to the end of the plan, whose generated
    /// artifacts may depend on the old text.
    pub fn update_task(
        &mut self,
        id: TaskId,
        description: impl Into<String>,
    ) -> Result<Vec<TaskId>, PlanError> {
        let index = self.index_of(id)?;
        let description = description.into();

        self.mutate(|table| {
            table.tasks[index].description = description;
            Ok((id..=table.tasks.len() as TaskId).collect())
        })
    }

    /// Check every structural invariant.
    pub fn verify(&self) -> Result<(), PlanError> {
        for (pos, task) in self.tasks.iter().enumerate() {
            if task.id as usize != pos + 1 {
                return Err(PlanError::Desync(format!(
                    "task at position {} has id {}",
                    pos + 1,
                    task.id
                )));
            }
        }

        let plan_ids: BTreeSet<TaskId> = self.tasks.iter().map(|t| t.id).collect();
        let metadata_ids: BTreeSet<TaskId> = self.metadata.keys().copied().collect();
        if plan_ids != metadata_ids {
            let missing: Vec<_> = plan_ids.difference(&metadata_ids).collect();
            let orphaned: Vec<_> = metadata_ids.difference(&plan_ids).collect();
            return Err(PlanError::Desync(format!(
                "metadata missing for tasks {:?}, orphaned metadata for {:?}",
                missing, orphaned
            )));
        }

        for task in &self.tasks {
            if let Some(&dep) = task.dependencies.iter().find(|&&d| d == 0 || d >= task.id) {
                return Err(PlanError::Desync(format!(
                    "task {} depends on task {}",
                    task.id, dep
                )));
            }
        }

        for (id, metadata) in &self.metadata {
            if let Some((&last, _)) = metadata.iteration_history.iter().next_back() {
                if last > metadata.current_iteration {
                    return Err(PlanError::Desync(format!(
                        "task {} records iteration {} beyond counter {}",
                        id, last, metadata.current_iteration
                    )));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn metadata_mut(&mut self, id: TaskId) -> Result<&mut TaskMetadata, PlanError> {
        self.metadata.get_mut(&id).ok_or(PlanError::TaskNotFound(id))
    }

    fn index_of(&self, id: TaskId) -> Result<usize, PlanError> {
        if id == 0 || id as usize > self.tasks.len() {
            return Err(PlanError::TaskNotFound(id));
        }
        Ok(id as usize - 1)
    }

    fn renumber_from(&mut self, index: usize) {
        for (pos, task) in self.tasks.iter_mut().enumerate().skip(index) {
            task.id = pos as TaskId + 1;
        }
    }

    fn mutate<R>(
        &mut self,
        apply: impl FnOnce(&mut PlanTable) -> Result<R, PlanError>,
    ) -> Result<R, PlanError> {
        let mut staged = self.clone();
        let result = apply(&mut staged)?;
        if let Err(e) = staged.verify() {
            tracing::error!("Rejected plan mutation: {}", e);
            return Err(e);
        }
        *self = staged;
        Ok(result)
    }
}

/// Dependencies must point strictly backwards: `1 <= dep < id`.
fn check_dependencies(id: TaskId, deps: &BTreeSet<TaskId>, len: usize) -> Result<(), PlanError> {
    match deps.iter().find(|&&d| d == 0 || d >= id) {
        Some(&dep) => Err(PlanError::InvalidIndex {
            index: i64::from(dep),
            len,
        }),
        None => Ok(()),
    }
}

fn shift_dependencies_up(deps: &BTreeSet<TaskId>, from: TaskId) -> BTreeSet<TaskId> {
    deps.iter()
        .map(|&d| if d >= from { d + 1 } else { d })
        .collect()
}

fn shift_dependencies_down(deps: &BTreeSet<TaskId>, removed: TaskId) -> BTreeSet<TaskId> {
    deps.iter()
        .filter(|&&d| d != removed)
        .map(|&d| if d > removed { d - 1 } else { d })
        .collect()
}
