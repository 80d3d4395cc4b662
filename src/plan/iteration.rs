//! Debug iteration bookkeeping for a single task.

use super::{IterationNumber, PlanError, PlanTable, TaskId, TaskMetadata};

/// Borrowed view over one task's iteration counter and history.
///
/// # Invariants
/// - `current_iteration` only ever increases
/// - deleting a record never frees its number for reuse
pub struct IterationTracker<'a> {
    task_id: TaskId,
    metadata: &'a mut TaskMetadata,
}

impl PlanTable {
    /// Iteration tracker for `task_id`.
    pub fn iterations(&mut self, task_id: TaskId) -> Result<IterationTracker<'_>, PlanError> {
        let metadata = self.metadata_mut(task_id)?;
        Ok(IterationTracker { task_id, metadata })
    }

    /// Recorded iterations for `task_id`, ascending by number. May contain gaps.
    pub fn list_iterations(
        &self,
        task_id: TaskId,
    ) -> Result<Vec<(IterationNumber, String)>, PlanError> {
        let (_, metadata) = self.get(task_id)?;
        Ok(metadata
            .iteration_history
            .iter()
            .map(|(n, problem)| (*n, problem.clone()))
            .collect())
    }
}

impl IterationTracker<'_> {
    /// Issue the next iteration number and record `problem` under it.
    ///
    /// Fails without touching the counter once every number is used up.
    pub fn start(&mut self, problem: impl Into<String>) -> Result<IterationNumber, PlanError> {
        let number = self.metadata.current_iteration.checked_add(1).ok_or_else(|| {
            PlanError::InvalidOperation(format!(
                "task {} has exhausted its iteration numbers",
                self.task_id
            ))
        })?;
        self.metadata.current_iteration = number;
        self.metadata.iteration_history.insert(number, problem.into());
        tracing::debug!("Task {} started iteration {}", self.task_id, number);
        Ok(number)
    }

    /// Drop the history entry for `iteration`. The counter is left alone.
    pub fn delete_record(&mut self, iteration: IterationNumber) -> Result<String, PlanError> {
        self.metadata
            .iteration_history
            .remove(&iteration)
            .ok_or(PlanError::IterationNotFound {
                task_id: self.task_id,
                iteration,
            })
    }

    pub fn current(&self) -> IterationNumber {
        self.metadata.current_iteration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_monotonic_across_deletes() {
        let mut table = PlanTable::from_items(["task"]).unwrap();
        let mut tracker = table.iterations(1).unwrap();

        assert_eq!(tracker.start("first").unwrap(), 1);
        assert_eq!(tracker.start("second").unwrap(), 2);
        assert_eq!(tracker.start("third").unwrap(), 3);
        assert_eq!(tracker.delete_record(2).unwrap(), "second");
        assert_eq!(tracker.start("fourth").unwrap(), 4);
        assert_eq!(tracker.current(), 4);

        let listed = table.list_iterations(1).unwrap();
        let numbers: Vec<IterationNumber> = listed.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 3, 4]);
        assert_eq!(listed[2].1, "fourth");
    }

    #[test]
    fn deleting_missing_record_is_not_found() {
        let mut table = PlanTable::from_items(["task"]).unwrap();
        let mut tracker = table.iterations(1).unwrap();
        tracker.start("only").unwrap();
        tracker.delete_record(1).unwrap();

        let err = tracker.delete_record(1).unwrap_err();
        assert!(matches!(
            err,
            PlanError::IterationNotFound {
                task_id: 1,
                iteration: 1
            }
        ));
        assert_eq!(tracker.current(), 1);
    }

    #[test]
    fn unknown_task_is_not_found() {
        let mut table = PlanTable::from_items(["task"]).unwrap();
        assert!(matches!(table.iterations(2), Err(PlanError::TaskNotFound(2))));
        assert!(matches!(
            table.list_iterations(0),
            Err(PlanError::TaskNotFound(0))
        ));
    }

    #[test]
    fn history_survives_plan_edits() {
        let mut table = PlanTable::from_items(["a", "b"]).unwrap();
        table.iterations(2).unwrap().start("flaky parser").unwrap();
        table.insert_task(0, "setup").unwrap();

        let listed = table.list_iterations(3).unwrap();
        assert_eq!(listed, vec![(1, "flaky parser".to_string())]);
        assert!(table.verify().is_ok());
    }

    #[test]
    fn exhausted_counter_is_rejected_unchanged() {
        let mut table = PlanTable::from_items(["task"]).unwrap();
        table.metadata_mut(1).unwrap().current_iteration = IterationNumber::MAX;

        let mut tracker = table.iterations(1).unwrap();
        let err = tracker.start("one too many").unwrap_err();
        assert!(matches!(err, PlanError::InvalidOperation(_)));
        assert_eq!(tracker.current(), IterationNumber::MAX);
        assert!(table.list_iterations(1).unwrap().is_empty());
    }
}
