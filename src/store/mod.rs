//! Document storage with pluggable backends.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `file`: Directory-rooted storage with atomic replace on write
//!
//! Documents are addressed by `/`-separated relative paths such as
//! `generations_2024-07-11_11-34-47_<uuid>/plan_state.json`.

mod file;
mod memory;

pub use file::FileDocumentStore;
pub use memory::InMemoryDocumentStore;

use async_trait::async_trait;
use std::sync::Arc;

/// Errors raised by document storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed document {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("Invalid document path: {0}")]
    InvalidPath(String),
}

impl StoreError {
    pub fn io(action: &'static str, path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    pub fn malformed(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::Malformed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Document store trait - implemented by all storage backends.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a document. Returns `Ok(None)` when it does not exist.
    async fn read_document(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace a document atomically, creating parent folders as needed.
    async fn write_document(&self, path: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Delete a document or a whole folder tree.
    ///
    /// Returns whether anything existed at `path`. Deleting a missing path is not an error.
    async fn delete_path(&self, path: &str) -> Result<bool, StoreError>;

    /// Whether a document or folder exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool, StoreError>;

    /// Names of the direct children of a folder, sorted. Empty when the folder is missing.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Shared store handle.
pub type SharedDocumentStore = Arc<dyn DocumentStore>;

/// Read a UTF-8 text document.
pub async fn read_text(store: &dyn DocumentStore, path: &str) -> Result<Option<String>, StoreError> {
    match store.read_document(path).await? {
        Some(bytes) => String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| StoreError::malformed(path, e)),
        None => Ok(None),
    }
}

/// Read and decode a JSON document.
pub async fn read_json<T: serde::de::DeserializeOwned>(
    store: &dyn DocumentStore,
    path: &str,
) -> Result<Option<T>, StoreError> {
    match store.read_document(path).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::malformed(path, e)),
        None => Ok(None),
    }
}

/// Encode and write a JSON document.
pub async fn write_json<T: serde::Serialize + ?Sized>(
    store: &dyn DocumentStore,
    path: &str,
    value: &T,
) -> Result<(), StoreError> {
    let data = serde_json::to_vec_pretty(value).map_err(|e| StoreError::malformed(path, e))?;
    store.write_document(path, &data).await
}

/// Split a document path into its segments, rejecting anything that could escape the store root.
pub(crate) fn path_segments(path: &str) -> Result<Vec<&str>, StoreError> {
    if path.starts_with('/') || path.contains('\\') {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() || segments.iter().any(|s| *s == "." || *s == "..") {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}
