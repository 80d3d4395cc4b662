//! Code and plan generation collaborator.
//!
//! Generators write their output into the session's artifact folders
//! (see [`crate::session::ArtifactLayout`]); the session only addresses
//! those folders and reads back the main code.

use async_trait::async_trait;
use std::sync::Arc;

use crate::plan::{PlanItem, Task, TaskId};

#[derive(Debug, Clone, thiserror::Error)]
pub enum GeneratorError {
    #[error("Generator unavailable: {0}")]
    Unavailable(String),

    #[error("Generation failed: {0}")]
    Failed(String),
}

/// Inputs for regenerating a task after a reported problem.
#[derive(Debug, Clone, Copy)]
pub struct IterationRequest<'a> {
    pub problem: &'a str,
    pub task_description: &'a str,
    /// Folder holding the task's main code
    pub task_folder: &'a str,
    /// Folder reserved for this iteration's output
    pub iteration_folder: &'a str,
    pub design_hypothesis: &'a str,
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Break a design hypothesis into ordered plan steps.
    async fn generate_plan(&self, design_hypothesis: &str) -> Result<Vec<PlanItem>, GeneratorError>;

    /// Generate the main code for `task_id` under `session_path/{task_id}/`.
    async fn generate_code(
        &self,
        design_hypothesis: &str,
        plan: &[Task],
        session_path: &str,
        task_id: TaskId,
    ) -> Result<(), GeneratorError>;

    /// Generate a debug iteration into `request.iteration_folder`.
    async fn generate_iteration(&self, request: IterationRequest<'_>) -> Result<(), GeneratorError>;
}

pub type SharedGenerator = Arc<dyn Generator>;

/// Generator used when no backend is configured. Every call fails with `Unavailable`.
#[derive(Debug, Clone, Default)]
pub struct UnavailableGenerator;

impl UnavailableGenerator {
    const REASON: &'static str = "no generation backend configured";
}

#[async_trait]
impl Generator for UnavailableGenerator {
    async fn generate_plan(&self, _design_hypothesis: &str) -> Result<Vec<PlanItem>, GeneratorError> {
        Err(GeneratorError::Unavailable(Self::REASON.to_string()))
    }

    async fn generate_code(
        &self,
        _design_hypothesis: &str,
        _plan: &[Task],
        _session_path: &str,
        _task_id: TaskId,
    ) -> Result<(), GeneratorError> {
        Err(GeneratorError::Unavailable(Self::REASON.to_string()))
    }

    async fn generate_iteration(&self, _request: IterationRequest<'_>) -> Result<(), GeneratorError> {
        Err(GeneratorError::Unavailable(Self::REASON.to_string()))
    }
}
