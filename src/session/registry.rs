//! Registry of live sessions keyed by [`SessionId`].

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, RwLock};

use super::{Session, SessionId, SessionPolicy};
use crate::generator::SharedGenerator;
use crate::plan::PlanError;
use crate::store::{DocumentStore, SharedDocumentStore};
use crate::util::is_safe_path_segment;

/// A session guarded for exclusive mutation.
pub type SharedSession = Arc<Mutex<Session>>;

/// One entry per known id. The cell is filled at most once, so every caller
/// shares the same session mutex.
type Slot = Arc<OnceCell<SharedSession>>;

/// Owns every loaded session. Each session is behind its own lock, so edits
/// to one session never wait on another. The map lock is only held for
/// lookups and inserts, never across store I/O.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Slot>>,
    store: SharedDocumentStore,
    generator: SharedGenerator,
    policy: SessionPolicy,
}

impl SessionRegistry {
    pub fn new(store: SharedDocumentStore, generator: SharedGenerator, policy: SessionPolicy) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
            generator,
            policy,
        }
    }

    /// Create and persist a fresh session.
    pub async fn create(&self) -> Result<SharedSession, PlanError> {
        let id = SessionId::generate();
        let session = Session::create(
            id.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.generator),
            self.policy,
        )
        .await?;
        let shared = Arc::new(Mutex::new(session));
        let slot = Arc::new(OnceCell::new_with(Some(Arc::clone(&shared))));
        self.sessions.write().await.insert(id, slot);
        Ok(shared)
    }

    /// Look up a session, rehydrating it from the store on first access.
    ///
    /// Concurrent first lookups of one id share a single rehydrate.
    pub async fn get(&self, id: &SessionId) -> Result<SharedSession, PlanError> {
        let slot = self.slot(id).await;
        self.fill(id, &slot).await
    }

    /// Reload a session from the store.
    ///
    /// A cached session is reloaded in place under its own lock, so handles
    /// obtained earlier observe the reloaded state. On failure the cached
    /// state is kept.
    pub async fn load(&self, id: &SessionId) -> Result<SharedSession, PlanError> {
        let slot = self.slot(id).await;
        let Some(shared) = slot.get().cloned() else {
            return self.fill(id, &slot).await;
        };
        {
            let mut session = shared.lock().await;
            *session = self.rehydrate(id).await?;
        }
        tracing::info!("Reloaded session {}", id);
        Ok(shared)
    }

    /// Identifiers of every session folder in the store, sorted.
    pub async fn list_persisted(&self) -> Result<Vec<SessionId>, PlanError> {
        let names = self.store.list("").await?;
        Ok(names
            .into_iter()
            .filter(|name| is_safe_path_segment(name))
            .filter_map(|name| SessionId::parse(&name).ok())
            .collect())
    }

    pub async fn active_count(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    async fn slot(&self, id: &SessionId) -> Slot {
        if let Some(slot) = self.sessions.read().await.get(id) {
            return Arc::clone(slot);
        }
        let mut sessions = self.sessions.write().await;
        Arc::clone(sessions.entry(id.clone()).or_default())
    }

    async fn fill(&self, id: &SessionId, slot: &Slot) -> Result<SharedSession, PlanError> {
        let result = slot
            .get_or_try_init(|| async {
                let session = self.rehydrate(id).await?;
                Ok::<_, PlanError>(Arc::new(Mutex::new(session)))
            })
            .await
            .map(Arc::clone);
        if result.is_err() {
            // Drop the empty slot so unknown ids do not accumulate.
            let mut sessions = self.sessions.write().await;
            if sessions
                .get(id)
                .is_some_and(|cached| Arc::ptr_eq(cached, slot) && !cached.initialized())
            {
                sessions.remove(id);
            }
        }
        result
    }

    async fn rehydrate(&self, id: &SessionId) -> Result<Session, PlanError> {
        Session::rehydrate(
            id.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.generator),
            self.policy,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanItem;
    use crate::session::testing::{FlakyStore, ScriptedGenerator};
    use crate::store::{FileDocumentStore, InMemoryDocumentStore};
    use std::time::Duration;

    fn registry(store: InMemoryDocumentStore) -> SessionRegistry {
        let generator = Arc::new(ScriptedGenerator::new(store.clone(), &["a", "b"]));
        SessionRegistry::new(Arc::new(store), generator, SessionPolicy::default())
    }

    #[tokio::test]
    async fn get_returns_the_cached_session() {
        let registry = registry(InMemoryDocumentStore::new());
        let created = registry.create().await.unwrap();
        let id = created.lock().await.id().clone();

        let fetched = registry.get(&id).await.unwrap();
        assert!(Arc::ptr_eq(&created, &fetched));
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let registry = registry(InMemoryDocumentStore::new());
        let id = SessionId::parse("missing").unwrap();
        assert!(matches!(
            registry.get(&id).await,
            Err(PlanError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn sessions_survive_a_new_registry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store: SharedDocumentStore = Arc::new(
            FileDocumentStore::new(dir.path().to_path_buf())
                .await
                .expect("store"),
        );
        let generator: SharedGenerator = Arc::new(crate::generator::UnavailableGenerator);

        let first = SessionRegistry::new(
            Arc::clone(&store),
            Arc::clone(&generator),
            SessionPolicy::default(),
        );
        let session = first.create().await.unwrap();
        let id = {
            let mut session = session.lock().await;
            session
                .replace_plan(vec![PlanItem::new("a"), PlanItem::new("b")])
                .await
                .unwrap();
            session.start_iteration(2, "crash").await.unwrap();
            session.id().clone()
        };

        let second = SessionRegistry::new(store, generator, SessionPolicy::default());
        assert_eq!(second.list_persisted().await.unwrap(), vec![id.clone()]);
        let restored = second.get(&id).await.unwrap();
        let restored = restored.lock().await;
        assert_eq!(restored.table().len(), 2);
        assert_eq!(restored.list_iterations(2).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn load_reloads_in_place_for_existing_handles() {
        let store = InMemoryDocumentStore::new();
        let live = registry(store.clone());
        let held = live.create().await.unwrap();
        let id = held.lock().await.id().clone();
        held.lock()
            .await
            .replace_plan(vec![PlanItem::new("root")])
            .await
            .unwrap();

        // Another process edits the session on disk.
        let elsewhere = registry(store.clone());
        elsewhere
            .get(&id)
            .await
            .unwrap()
            .lock()
            .await
            .insert_task(1, PlanItem::new("from disk"))
            .await
            .unwrap();

        let reloaded = live.load(&id).await.unwrap();
        assert!(Arc::ptr_eq(&held, &reloaded));
        assert_eq!(held.lock().await.table().len(), 2);

        held.lock()
            .await
            .insert_task(2, PlanItem::new("from held"))
            .await
            .unwrap();
        reloaded
            .lock()
            .await
            .insert_task(3, PlanItem::new("from reloaded"))
            .await
            .unwrap();

        let fresh = registry(store).get(&id).await.unwrap();
        let fresh = fresh.lock().await;
        let descriptions: Vec<&str> = fresh
            .tasks()
            .iter()
            .map(|t| t.description.as_str())
            .collect();
        assert_eq!(
            descriptions,
            vec!["root", "from disk", "from held", "from reloaded"]
        );
    }

    #[tokio::test]
    async fn failed_load_keeps_the_cached_session() {
        let store = InMemoryDocumentStore::new();
        let registry = registry(store.clone());
        let held = registry.create().await.unwrap();
        let id = held.lock().await.id().clone();
        held.lock()
            .await
            .replace_plan(vec![PlanItem::new("a")])
            .await
            .unwrap();
        store
            .write_document(&format!("{}/plan_state.json", id), b"{\"plan\": 3}")
            .await
            .unwrap();

        assert!(matches!(registry.load(&id).await, Err(PlanError::Io(_))));
        assert_eq!(held.lock().await.table().len(), 1);
        assert!(Arc::ptr_eq(&held, &registry.get(&id).await.unwrap()));
    }

    #[tokio::test]
    async fn lookups_do_not_wait_on_another_sessions_rehydrate() {
        let flaky = FlakyStore::default();
        let generator: SharedGenerator =
            Arc::new(ScriptedGenerator::new(flaky.inner.clone(), &[]));
        let writer = SessionRegistry::new(
            Arc::new(flaky.clone()),
            Arc::clone(&generator),
            SessionPolicy::default(),
        );
        let slow_id = writer.create().await.unwrap().lock().await.id().clone();
        let fast_id = writer.create().await.unwrap().lock().await.id().clone();

        let registry = Arc::new(SessionRegistry::new(
            Arc::new(flaky.clone()),
            generator,
            SessionPolicy::default(),
        ));
        registry.get(&fast_id).await.unwrap();

        flaky.hold_reads_under(&format!("{}/", slow_id));
        let slow = {
            let registry = Arc::clone(&registry);
            let id = slow_id.clone();
            tokio::spawn(async move { registry.get(&id).await.map(|_| ()) })
        };
        flaky.parked_read().await;

        let fast = tokio::time::timeout(Duration::from_secs(5), registry.get(&fast_id))
            .await
            .expect("cached lookup waited on another session")
            .unwrap();
        assert_eq!(fast.lock().await.id(), &fast_id);
        tokio::time::timeout(Duration::from_secs(5), registry.create())
            .await
            .expect("create waited on another session")
            .unwrap();

        flaky.release_reads();
        slow.await.unwrap().unwrap();
        assert_eq!(registry.active_count().await, 3);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_cached() {
        let registry = registry(InMemoryDocumentStore::new());
        let id = SessionId::parse("missing").unwrap();
        assert!(registry.get(&id).await.is_err());
        assert!(registry.load(&id).await.is_err());
        assert_eq!(registry.active_count().await, 0);
        assert!(registry.sessions.read().await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_edits_are_serialized_per_session() {
        let registry = Arc::new(registry(InMemoryDocumentStore::new()));
        let session = registry.create().await.unwrap();
        let id = session.lock().await.id().clone();
        session
            .lock()
            .await
            .replace_plan(vec![PlanItem::new("root")])
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                let session = registry.get(&id).await.unwrap();
                let mut session = session.lock().await;
                session
                    .insert_task(1, PlanItem::new(format!("child {}", i)))
                    .await
                    .unwrap();
                session.start_iteration(1, format!("p{}", i)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let session = session.lock().await;
        assert_eq!(session.table().len(), 9);
        assert!(session.table().verify().is_ok());
        assert_eq!(session.table().metadata()[&1].current_iteration, 8);
    }
}
