//! Cascading invalidation of generated artifacts.

use futures::future::try_join_all;

use super::ArtifactLayout;
use crate::plan::{Invalidation, PlanError, TaskId};
use crate::store::DocumentStore;

/// Deletes the artifact folders of a contiguous range of tasks.
///
/// Only touches the store; the plan table and metadata are never modified here.
pub struct WipeoutCoordinator<'a> {
    store: &'a dyn DocumentStore,
    layout: &'a ArtifactLayout,
}

impl<'a> WipeoutCoordinator<'a> {
    pub fn new(store: &'a dyn DocumentStore, layout: &'a ArtifactLayout) -> Self {
        Self { store, layout }
    }

    /// Delete the main code and iteration tree of every task in `[from_id, through]`.
    ///
    /// Returns how many task folders existed. Missing folders are skipped.
    pub async fn invalidate_from(&self, from_id: TaskId, through: TaskId) -> Result<usize, PlanError> {
        self.invalidate(Invalidation::new(from_id.max(1), through)).await
    }

    pub async fn invalidate(&self, range: Invalidation) -> Result<usize, PlanError> {
        if range.is_empty() {
            return Ok(0);
        }
        let store = self.store;
        let deletions = range.ids().map(|task_id| {
            let folder = self.layout.task_folder(task_id);
            async move { store.delete_path(&folder).await }
        });
        let removed = try_join_all(deletions)
            .await?
            .into_iter()
            .filter(|existed| *existed)
            .count();
        tracing::info!(
            "Wiped artifacts for tasks {}..={} in {} ({} folders removed)",
            range.from,
            range.through,
            self.layout.session_path(),
            removed
        );
        Ok(removed)
    }
}
