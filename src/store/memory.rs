//! In-memory document store (non-persistent).

use super::{path_segments, DocumentStore, StoreError};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    documents: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All document paths currently stored.
    pub async fn paths(&self) -> Vec<String> {
        self.documents.read().await.keys().cloned().collect()
    }
}

fn normalize(path: &str) -> Result<String, StoreError> {
    Ok(path_segments(path)?.join("/"))
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn read_document(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let key = normalize(path)?;
        Ok(self.documents.read().await.get(&key).cloned())
    }

    async fn write_document(&self, path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let key = normalize(path)?;
        self.documents.write().await.insert(key, bytes.to_vec());
        Ok(())
    }

    async fn delete_path(&self, path: &str) -> Result<bool, StoreError> {
        let key = normalize(path)?;
        let folder = format!("{}/", key);
        let mut documents = self.documents.write().await;
        let before = documents.len();
        documents.retain(|k, _| *k != key && !k.starts_with(&folder));
        Ok(documents.len() != before)
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        let key = normalize(path)?;
        let folder = format!("{}/", key);
        Ok(self
            .documents
            .read()
            .await
            .keys()
            .any(|k| *k == key || k.starts_with(&folder)))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let folder = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", normalize(prefix)?)
        };
        let names: BTreeSet<String> = self
            .documents
            .read()
            .await
            .keys()
            .filter_map(|k| k.strip_prefix(folder.as_str()))
            .filter_map(|rest| rest.split('/').next())
            .map(|s| s.to_string())
            .collect();
        Ok(names.into_iter().collect())
    }
}
