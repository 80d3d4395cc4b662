//! Session identifiers and where a session's documents and artifacts live.
//!
//! ```text
//! {session}/plan_state.json
//! {session}/design_hypothesis.txt
//! {session}/{task_id}/main_code
//! {session}/{task_id}/cleaned_code
//! {session}/{task_id}/iterations/{n}/iteration_code
//! {session}/{task_id}/iterations/{n}/iteration_cleaned_code
//! ```

use serde::{Deserialize, Serialize};

use crate::plan::{IterationNumber, PlanError, TaskId};
use crate::util::is_safe_path_segment;

pub const PLAN_STATE_FILE_NAME: &str = "plan_state.json";
pub const LEGACY_PLAN_FILE_NAME: &str = "plan.json";
pub const LEGACY_TASK_MAP_FILE_NAME: &str = "task_map.json";
pub const USER_INPUT_FILE_NAME: &str = "user_input.txt";
pub const DESIGN_HYPOTHESIS_FILE_NAME: &str = "design_hypothesis.txt";
pub const FAKED_DATA_FILE_NAME: &str = "faked_data.txt";
pub const THEORIES_FILE_NAME: &str = "theories.json";
pub const SELECTED_THEORIES_FILE_NAME: &str = "selected_theories.json";

pub const MAIN_CODE_FILE_NAME: &str = "main_code";
pub const CLEANED_CODE_FILE_NAME: &str = "cleaned_code";
pub const ITERATION_FOLDER_NAME: &str = "iterations";
pub const ITERATION_CODE_FILE_NAME: &str = "iteration_code";
pub const ITERATION_CLEANED_FILE_NAME: &str = "iteration_cleaned_code";

/// Folder name identifying one session in the document store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// `generations_{YYYY-mm-dd_HH-MM-SS}_{uuid}`
    pub fn generate() -> Self {
        let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        Self(format!("generations_{}_{}", stamp, uuid::Uuid::new_v4()))
    }

    /// Accept an explicit identifier, e.g. for rehydration.
    pub fn parse(raw: &str) -> Result<Self, PlanError> {
        if is_safe_path_segment(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(PlanError::SessionNotFound(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = PlanError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// Paths of one session's documents and generated artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    session: SessionId,
}

impl ArtifactLayout {
    pub fn new(session: SessionId) -> Self {
        Self { session }
    }

    pub fn session_path(&self) -> &str {
        self.session.as_str()
    }

    pub fn document(&self, name: &str) -> String {
        format!("{}/{}", self.session, name)
    }

    pub fn task_folder(&self, task_id: TaskId) -> String {
        format!("{}/{}", self.session, task_id)
    }

    pub fn main_code(&self, task_id: TaskId) -> String {
        format!("{}/{}", self.task_folder(task_id), MAIN_CODE_FILE_NAME)
    }

    pub fn cleaned_code(&self, task_id: TaskId) -> String {
        format!("{}/{}", self.task_folder(task_id), CLEANED_CODE_FILE_NAME)
    }

    pub fn iteration_folder(&self, task_id: TaskId, iteration: IterationNumber) -> String {
        format!(
            "{}/{}/{}",
            self.task_folder(task_id),
            ITERATION_FOLDER_NAME,
            iteration
        )
    }

    pub fn iteration_code(&self, task_id: TaskId, iteration: IterationNumber) -> String {
        format!(
            "{}/{}",
            self.iteration_folder(task_id, iteration),
            ITERATION_CODE_FILE_NAME
        )
    }

    pub fn iteration_cleaned_code(&self, task_id: TaskId, iteration: IterationNumber) -> String {
        format!(
            "{}/{}",
            self.iteration_folder(task_id, iteration),
            ITERATION_CLEANED_FILE_NAME
        )
    }
}
