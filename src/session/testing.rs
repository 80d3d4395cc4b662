//! Test doubles for sessions and the HTTP layer.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::generator::{Generator, GeneratorError, IterationRequest};
use crate::plan::{PlanItem, Task, TaskId};
use crate::session::layout::{ITERATION_CLEANED_FILE_NAME, MAIN_CODE_FILE_NAME};
use crate::store::{DocumentStore, InMemoryDocumentStore, StoreError};

/// Generator that writes deterministic text into the shared in-memory store.
#[derive(Clone)]
pub(crate) struct ScriptedGenerator {
    store: InMemoryDocumentStore,
    plan: Vec<PlanItem>,
}

impl ScriptedGenerator {
    pub(crate) fn new(store: InMemoryDocumentStore, plan: &[&str]) -> Self {
        Self {
            store,
            plan: plan.iter().copied().map(PlanItem::from).collect(),
        }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate_plan(&self, _design_hypothesis: &str) -> Result<Vec<PlanItem>, GeneratorError> {
        Ok(self.plan.clone())
    }

    async fn generate_code(
        &self,
        design_hypothesis: &str,
        plan: &[Task],
        session_path: &str,
        task_id: TaskId,
    ) -> Result<(), GeneratorError> {
        let task = plan
            .iter()
            .find(|t| t.id == task_id)
            .ok_or_else(|| GeneratorError::Failed(format!("no task {}", task_id)))?;
        let code = format!("# {}\n# {}\n", design_hypothesis, task.description);
        self.store
            .write_document(
                &format!("{}/{}/{}", session_path, task_id, MAIN_CODE_FILE_NAME),
                code.as_bytes(),
            )
            .await
            .map_err(|e| GeneratorError::Failed(e.to_string()))
    }

    async fn generate_iteration(&self, request: IterationRequest<'_>) -> Result<(), GeneratorError> {
        let code = format!("# fix: {}\n# {}\n", request.problem, request.task_description);
        self.store
            .write_document(
                &format!("{}/{}", request.iteration_folder, ITERATION_CLEANED_FILE_NAME),
                code.as_bytes(),
            )
            .await
            .map_err(|e| GeneratorError::Failed(e.to_string()))
    }
}

/// In-memory store whose writes and deletes can be switched to fail, and
/// whose reads under a prefix can be parked until released.
#[derive(Clone, Default)]
pub(crate) struct FlakyStore {
    pub(crate) inner: InMemoryDocumentStore,
    fail_writes: Arc<AtomicBool>,
    fail_writes_to: Arc<Mutex<Option<String>>>,
    fail_deletes: Arc<AtomicBool>,
    held_prefix: Arc<Mutex<Option<String>>>,
    read_parked: Arc<Notify>,
    release: Arc<Notify>,
}

impl FlakyStore {
    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail only writes whose path ends with `suffix`.
    pub(crate) fn fail_writes_to(&self, suffix: Option<&str>) {
        *self.fail_writes_to.lock().unwrap() = suffix.map(str::to_string);
    }

    pub(crate) fn hold_reads_under(&self, prefix: &str) {
        *self.held_prefix.lock().unwrap() = Some(prefix.to_string());
    }

    /// Resolves once a read has been parked by `hold_reads_under`.
    pub(crate) async fn parked_read(&self) {
        self.read_parked.notified().await;
    }

    pub(crate) fn release_reads(&self) {
        *self.held_prefix.lock().unwrap() = None;
        self.release.notify_one();
    }

    fn write_fails(&self, path: &str) -> bool {
        if self.fail_writes.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_writes_to
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|suffix| path.ends_with(suffix))
    }

    fn read_is_held(&self, path: &str) -> bool {
        self.held_prefix
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|prefix| path.starts_with(prefix))
    }

    pub(crate) fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    fn injected(action: &'static str, path: &str) -> StoreError {
        StoreError::io(
            action,
            path,
            std::io::Error::new(std::io::ErrorKind::Other, "injected failure"),
        )
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn read_document(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if self.read_is_held(path) {
            self.read_parked.notify_one();
            self.release.notified().await;
        }
        self.inner.read_document(path).await
    }

    async fn write_document(&self, path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        if self.write_fails(path) {
            return Err(Self::injected("write", path));
        }
        self.inner.write_document(path, bytes).await
    }

    async fn delete_path(&self, path: &str) -> Result<bool, StoreError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::injected("delete", path));
        }
        self.inner.delete_path(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        self.inner.exists(path).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.list(prefix).await
    }
}
