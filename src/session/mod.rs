//! Sessions: one plan, its metadata, and the documents around it.
//!
//! A session owns exactly one [`PlanTable`]. Every mutation follows the same
//! commit protocol:
//!
//! 1. apply the edit to the in-memory table (rejected edits change nothing)
//! 2. persist `plan_state.json`, recording any artifact invalidation as pending
//! 3. run the wipeout for the pending range
//! 4. persist again with the pending marker cleared
//!
//! A failure in step 2 restores the previous table. A crash or failure after
//! step 2 leaves the pending marker on disk; it is replayed on the next
//! commit or on rehydrate, which is safe because wipeouts are idempotent.

mod layout;
mod registry;
mod wipeout;

#[cfg(test)]
pub(crate) mod testing;

pub use layout::{ArtifactLayout, SessionId};
pub use registry::{SessionRegistry, SharedSession};
pub use wipeout::WipeoutCoordinator;

use serde::Serialize;

use crate::generator::{IterationRequest, SharedGenerator};
use crate::plan::{
    table_from_records, Invalidation, IterationNumber, MetadataRecord, PlanError, PlanItem,
    PlanStateDocument, PlanTable, Task, TaskId, TaskMetadata,
};
use crate::store::{self, DocumentStore, SharedDocumentStore};
use layout::{
    DESIGN_HYPOTHESIS_FILE_NAME, FAKED_DATA_FILE_NAME, LEGACY_PLAN_FILE_NAME,
    LEGACY_TASK_MAP_FILE_NAME, PLAN_STATE_FILE_NAME, SELECTED_THEORIES_FILE_NAME,
    THEORIES_FILE_NAME, USER_INPUT_FILE_NAME,
};

/// Caller-side rules applied on top of the plan table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionPolicy {
    /// Refuse to remove the last remaining task.
    pub require_nonempty_plan: bool,
}

/// Free-text context that the plan was derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionContext {
    pub prompt: String,
    pub design_hypothesis: String,
    pub faked_data: String,
    pub theories: Vec<String>,
    pub selected_theories: Vec<String>,
}

pub struct Session {
    id: SessionId,
    layout: ArtifactLayout,
    table: PlanTable,
    context: SessionContext,
    pending_invalidation: Option<Invalidation>,
    policy: SessionPolicy,
    store: SharedDocumentStore,
    generator: SharedGenerator,
}

impl Session {
    /// Start a new session with an empty plan and persist it.
    pub async fn create(
        id: SessionId,
        store: SharedDocumentStore,
        generator: SharedGenerator,
        policy: SessionPolicy,
    ) -> Result<Self, PlanError> {
        let session = Self {
            layout: ArtifactLayout::new(id.clone()),
            id,
            table: PlanTable::new(),
            context: SessionContext::default(),
            pending_invalidation: None,
            policy,
            store,
            generator,
        };
        session.persist().await?;
        tracing::info!("Created session {}", session.id);
        Ok(session)
    }

    /// Load a persisted session.
    ///
    /// Fails with `Desync` if the stored plan and metadata disagree, and
    /// replays any invalidation that was pending when the session was last written.
    pub async fn rehydrate(
        id: SessionId,
        store: SharedDocumentStore,
        generator: SharedGenerator,
        policy: SessionPolicy,
    ) -> Result<Self, PlanError> {
        if !store.exists(id.as_str()).await? {
            return Err(PlanError::SessionNotFound(id.to_string()));
        }
        let layout = ArtifactLayout::new(id.clone());
        let context = load_context(store.as_ref(), &layout).await?;
        let (table, pending_invalidation) = load_plan_state(store.as_ref(), &layout).await?;

        let mut session = Self {
            id,
            layout,
            table,
            context,
            pending_invalidation,
            policy,
            store,
            generator,
        };
        if let Some(range) = session.pending_invalidation {
            tracing::warn!(
                "Session {} has an unfinished wipeout for tasks {}..={}, replaying",
                session.id,
                range.from,
                range.through
            );
            session.finish_invalidation(range).await?;
        }
        tracing::info!(
            "Rehydrated session {} with {} tasks",
            session.id,
            session.table.len()
        );
        Ok(session)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub fn table(&self) -> &PlanTable {
        &self.table
    }

    pub fn tasks(&self) -> &[Task] {
        self.table.tasks()
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn pending_invalidation(&self) -> Option<Invalidation> {
        self.pending_invalidation
    }

    pub fn get(&self, task_id: TaskId) -> Result<(&Task, &TaskMetadata), PlanError> {
        self.table.get(task_id)
    }

    /// Write the plan and metadata as one atomic document.
    pub async fn persist(&self) -> Result<(), PlanError> {
        self.write_plan_state(self.pending_invalidation).await
    }

    pub fn wipeout(&self) -> WipeoutCoordinator<'_> {
        WipeoutCoordinator::new(self.store.as_ref(), &self.layout)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Plan structure
    // ─────────────────────────────────────────────────────────────────────

    /// Discard the plan and rebuild it from `items` with ids `1..=N`.
    pub async fn replace_plan(&mut self, items: Vec<PlanItem>) -> Result<(), PlanError> {
        let table = PlanTable::from_items(items)?;
        let previous = std::mem::replace(&mut self.table, table);
        let through = previous.len().max(self.table.len()) as TaskId;
        tracing::info!(
            "Session {}: replaced plan ({} -> {} tasks)",
            self.id,
            previous.len(),
            self.table.len()
        );
        self.commit(previous, Some(Invalidation::new(1, through)))
            .await
    }

    /// Returns the new task's id and the range whose artifacts were wiped.
    pub async fn insert_task(
        &mut self,
        after_id: TaskId,
        item: PlanItem,
    ) -> Result<(TaskId, Invalidation), PlanError> {
        let previous = self.table.clone();
        let new_id = self.table.insert_item(after_id, item)?;
        let invalidated = Invalidation::new(new_id, self.table.len() as TaskId);
        tracing::info!("Session {}: inserted task {}", self.id, new_id);
        self.commit(previous, Some(invalidated)).await?;
        Ok((new_id, invalidated))
    }

    /// Returns the removed task and the range whose artifacts were wiped.
    pub async fn remove_task(&mut self, task_id: TaskId) -> Result<(Task, Invalidation), PlanError> {
        self.table.task(task_id)?;
        if self.policy.require_nonempty_plan && self.table.len() == 1 {
            return Err(PlanError::InvalidOperation(
                "cannot remove the only remaining task".to_string(),
            ));
        }
        let previous = self.table.clone();
        let invalidated = Invalidation::new(task_id, self.table.len() as TaskId);
        let removed = self.table.remove_task(task_id)?;
        tracing::info!("Session {}: removed task {}", self.id, task_id);
        self.commit(previous, Some(invalidated)).await?;
        Ok((removed, invalidated))
    }

    /// Returns the ids whose artifacts were invalidated.
    pub async fn update_task(
        &mut self,
        task_id: TaskId,
        description: impl Into<String>,
    ) -> Result<Vec<TaskId>, PlanError> {
        let previous = self.table.clone();
        let affected = self.table.update_task(task_id, description)?;
        let through = self.table.len() as TaskId;
        tracing::info!("Session {}: updated task {}", self.id, task_id);
        self.commit(previous, Some(Invalidation::new(task_id, through)))
            .await?;
        Ok(affected)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Debug iterations
    // ─────────────────────────────────────────────────────────────────────

    pub async fn start_iteration(
        &mut self,
        task_id: TaskId,
        problem: impl Into<String>,
    ) -> Result<IterationNumber, PlanError> {
        let previous = self.table.clone();
        let iteration = self.table.iterations(task_id)?.start(problem)?;
        self.commit(previous, None).await?;
        Ok(iteration)
    }

    pub async fn delete_iteration_record(
        &mut self,
        task_id: TaskId,
        iteration: IterationNumber,
    ) -> Result<(), PlanError> {
        let previous = self.table.clone();
        self.table.iterations(task_id)?.delete_record(iteration)?;
        tracing::info!(
            "Session {}: deleted iteration {} of task {}",
            self.id,
            iteration,
            task_id
        );
        self.commit(previous, None).await
    }

    pub fn list_iterations(
        &self,
        task_id: TaskId,
    ) -> Result<Vec<(IterationNumber, String)>, PlanError> {
        self.table.list_iterations(task_id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Context documents
    // ─────────────────────────────────────────────────────────────────────

    pub async fn set_prompt(&mut self, prompt: impl Into<String>) -> Result<(), PlanError> {
        let prompt = prompt.into();
        self.write_text(USER_INPUT_FILE_NAME, &prompt).await?;
        self.context.prompt = prompt;
        Ok(())
    }

    /// Store a new design hypothesis. The plan is reset and every artifact invalidated.
    ///
    /// If the plan reset cannot be persisted, the previous hypothesis is
    /// written back and the session is left as it was.
    pub async fn set_design_hypothesis(
        &mut self,
        hypothesis: impl Into<String>,
    ) -> Result<(), PlanError> {
        let hypothesis = hypothesis.into();
        self.write_text(DESIGN_HYPOTHESIS_FILE_NAME, &hypothesis)
            .await?;
        let previous_hypothesis =
            std::mem::replace(&mut self.context.design_hypothesis, hypothesis);

        let previous = std::mem::take(&mut self.table);
        let invalidated = Invalidation::new(1, previous.len() as TaskId);
        tracing::info!(
            "Session {}: new design hypothesis, cleared {} tasks",
            self.id,
            previous.len()
        );
        let pending = match self.record(previous, Some(invalidated)).await {
            Ok(pending) => pending,
            Err(e) => {
                if let Err(restore) = self
                    .write_text(DESIGN_HYPOTHESIS_FILE_NAME, &previous_hypothesis)
                    .await
                {
                    tracing::error!(
                        "Session {}: could not restore design hypothesis: {}",
                        self.id,
                        restore
                    );
                }
                self.context.design_hypothesis = previous_hypothesis;
                return Err(e);
            }
        };
        if let Some(range) = pending {
            self.finish_invalidation(range).await?;
        }
        Ok(())
    }

    pub async fn set_faked_data(&mut self, data: impl Into<String>) -> Result<(), PlanError> {
        let data = data.into();
        self.write_text(FAKED_DATA_FILE_NAME, &data).await?;
        self.context.faked_data = data;
        Ok(())
    }

    pub async fn add_theories(&mut self, theories: Vec<String>) -> Result<(), PlanError> {
        let mut updated = self.context.theories.clone();
        updated.extend(theories);
        store::write_json(
            self.store.as_ref(),
            &self.layout.document(THEORIES_FILE_NAME),
            &updated,
        )
        .await?;
        self.context.theories = updated;
        Ok(())
    }

    pub async fn set_selected_theories(&mut self, selected: Vec<String>) -> Result<(), PlanError> {
        store::write_json(
            self.store.as_ref(),
            &self.layout.document(SELECTED_THEORIES_FILE_NAME),
            &selected,
        )
        .await?;
        self.context.selected_theories = selected;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Generation and code artifacts
    // ─────────────────────────────────────────────────────────────────────

    /// Ask the generator for a plan and replace the current one with it.
    pub async fn generate_plan(&mut self) -> Result<(), PlanError> {
        let items = self
            .generator
            .generate_plan(&self.context.design_hypothesis)
            .await?;
        self.replace_plan(items).await
    }

    /// Regenerate the main code of `task_id`, invalidating it and every later task first.
    pub async fn generate_code(&mut self, task_id: TaskId) -> Result<String, PlanError> {
        self.table.task(task_id)?;
        let through = self.table.len() as TaskId;
        self.commit(
            self.table.clone(),
            Some(Invalidation::new(task_id, through)),
        )
        .await?;

        self.generator
            .generate_code(
                &self.context.design_hypothesis,
                self.table.tasks(),
                self.layout.session_path(),
                task_id,
            )
            .await?;
        tracing::info!("Session {}: generated code for task {}", self.id, task_id);
        self.main_code(task_id).await
    }

    /// Record a debug iteration for `problem` and ask the generator for a fix.
    ///
    /// The iteration stays recorded even if generation fails.
    pub async fn iterate_code(
        &mut self,
        task_id: TaskId,
        problem: impl Into<String>,
    ) -> Result<IterationNumber, PlanError> {
        let problem = problem.into();
        let iteration = self.start_iteration(task_id, problem.clone()).await?;
        let task_description = self.table.task(task_id)?.description.clone();
        let task_folder = self.layout.task_folder(task_id);
        let iteration_folder = self.layout.iteration_folder(task_id, iteration);

        self.generator
            .generate_iteration(IterationRequest {
                problem: &problem,
                task_description: &task_description,
                task_folder: &task_folder,
                iteration_folder: &iteration_folder,
                design_hypothesis: &self.context.design_hypothesis,
            })
            .await?;
        tracing::info!(
            "Session {}: generated iteration {} for task {}",
            self.id,
            iteration,
            task_id
        );
        Ok(iteration)
    }

    /// Current main code of a task (empty if none has been generated).
    pub async fn main_code(&self, task_id: TaskId) -> Result<String, PlanError> {
        self.table.task(task_id)?;
        Ok(
            store::read_text(self.store.as_ref(), &self.layout.main_code(task_id))
                .await?
                .unwrap_or_default(),
        )
    }

    pub async fn save_main_code(&self, task_id: TaskId, code: &str) -> Result<(), PlanError> {
        self.table.task(task_id)?;
        self.store
            .write_document(&self.layout.main_code(task_id), code.as_bytes())
            .await?;
        Ok(())
    }

    /// Make an iteration's cleaned code the task's main code and return it.
    ///
    /// Iteration `0` is the originally generated code.
    pub async fn select_iteration_code(
        &self,
        task_id: TaskId,
        iteration: IterationNumber,
    ) -> Result<String, PlanError> {
        let (_, metadata) = self.table.get(task_id)?;
        if iteration > metadata.current_iteration {
            return Err(PlanError::IterationNotFound { task_id, iteration });
        }
        let source = if iteration == 0 {
            self.layout.cleaned_code(task_id)
        } else {
            self.layout.iteration_cleaned_code(task_id, iteration)
        };
        let code = store::read_text(self.store.as_ref(), &source)
            .await?
            .unwrap_or_default();
        self.save_main_code(task_id, &code).await?;
        Ok(code)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Commit protocol
    // ─────────────────────────────────────────────────────────────────────

    async fn commit(
        &mut self,
        previous: PlanTable,
        invalidation: Option<Invalidation>,
    ) -> Result<(), PlanError> {
        if let Some(range) = self.record(previous, invalidation).await? {
            self.finish_invalidation(range).await?;
        }
        Ok(())
    }

    /// Persist the edited table with its pending range, restoring `previous`
    /// if the write fails. Returns the range still to be wiped.
    async fn record(
        &mut self,
        previous: PlanTable,
        invalidation: Option<Invalidation>,
    ) -> Result<Option<Invalidation>, PlanError> {
        let pending = match (self.pending_invalidation, invalidation) {
            (Some(a), Some(b)) => Some(a.merge(b)),
            (a, b) => a.or(b),
        }
        .filter(|range| !range.is_empty());

        if let Err(e) = self.write_plan_state(pending).await {
            tracing::warn!("Session {}: rolling back unpersisted edit: {}", self.id, e);
            self.table = previous;
            return Err(e);
        }
        self.pending_invalidation = pending;
        Ok(pending)
    }

    async fn finish_invalidation(&mut self, range: Invalidation) -> Result<(), PlanError> {
        self.wipeout().invalidate(range).await?;
        self.write_plan_state(None).await?;
        self.pending_invalidation = None;
        Ok(())
    }

    async fn write_plan_state(&self, pending: Option<Invalidation>) -> Result<(), PlanError> {
        let document = PlanStateDocument::from_table(&self.table, pending);
        store::write_json(
            self.store.as_ref(),
            &self.layout.document(PLAN_STATE_FILE_NAME),
            &document,
        )
        .await?;
        tracing::debug!(
            "Session {}: persisted {} tasks",
            self.id,
            self.table.len()
        );
        Ok(())
    }

    async fn write_text(&self, name: &str, text: &str) -> Result<(), PlanError> {
        self.store
            .write_document(&self.layout.document(name), text.as_bytes())
            .await?;
        Ok(())
    }
}

async fn load_context(
    store: &dyn DocumentStore,
    layout: &ArtifactLayout,
) -> Result<SessionContext, PlanError> {
    Ok(SessionContext {
        prompt: read_or_default(store, layout, USER_INPUT_FILE_NAME).await?,
        design_hypothesis: read_or_default(store, layout, DESIGN_HYPOTHESIS_FILE_NAME).await?,
        faked_data: read_or_default(store, layout, FAKED_DATA_FILE_NAME).await?,
        theories: read_list(store, layout, THEORIES_FILE_NAME).await?,
        selected_theories: read_list(store, layout, SELECTED_THEORIES_FILE_NAME).await?,
    })
}

async fn read_or_default(
    store: &dyn DocumentStore,
    layout: &ArtifactLayout,
    name: &str,
) -> Result<String, PlanError> {
    Ok(store::read_text(store, &layout.document(name))
        .await?
        .unwrap_or_default())
}

async fn read_list(
    store: &dyn DocumentStore,
    layout: &ArtifactLayout,
    name: &str,
) -> Result<Vec<String>, PlanError> {
    Ok(store::read_json(store, &layout.document(name))
        .await?
        .unwrap_or_default())
}

async fn load_plan_state(
    store: &dyn DocumentStore,
    layout: &ArtifactLayout,
) -> Result<(PlanTable, Option<Invalidation>), PlanError> {
    let combined = layout.document(PLAN_STATE_FILE_NAME);
    if let Some(document) = store::read_json::<PlanStateDocument>(store, &combined).await? {
        return document.into_table();
    }

    // Sessions written before the combined document kept plan and metadata apart.
    let plan = store::read_json::<Vec<Task>>(store, &layout.document(LEGACY_PLAN_FILE_NAME))
        .await?;
    let task_map = store::read_json::<std::collections::BTreeMap<TaskId, MetadataRecord>>(
        store,
        &layout.document(LEGACY_TASK_MAP_FILE_NAME),
    )
    .await?;
    match (plan, task_map) {
        (Some(plan), Some(task_map)) => {
            tracing::info!("Loading legacy plan documents for {}", layout.session_path());
            Ok((table_from_records(plan, task_map)?, None))
        }
        (None, None) => Ok((PlanTable::new(), None)),
        (Some(_), None) => Err(PlanError::Desync(format!(
            "{} exists without {}",
            LEGACY_PLAN_FILE_NAME, LEGACY_TASK_MAP_FILE_NAME
        ))),
        (None, Some(_)) => Err(PlanError::Desync(format!(
            "{} exists without {}",
            LEGACY_TASK_MAP_FILE_NAME, LEGACY_PLAN_FILE_NAME
        ))),
    }
}
