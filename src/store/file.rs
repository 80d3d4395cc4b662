//! Directory-backed document store.

use super::{path_segments, DocumentStore, StoreError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct FileDocumentStore {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileDocumentStore {
    pub async fn new(root: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::io("create store dir", root.display().to_string(), e))?;
        tracing::info!("Document store rooted at {}", root.display());
        Ok(Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let mut resolved = self.root.clone();
        for segment in path_segments(path)? {
            resolved.push(segment);
        }
        Ok(resolved)
    }
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn read_document(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let full = self.resolve(path)?;
        match fs::read(&full).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::io("read", path, err)),
        }
    }

    async fn write_document(&self, path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let full = self.resolve(path)?;
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io("create folder for", path, e))?;
        }
        let mut tmp_name = full.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        fs::write(&tmp_path, bytes)
            .await
            .map_err(|e| StoreError::io("write", path, e))?;
        fs::rename(&tmp_path, &full)
            .await
            .map_err(|e| StoreError::io("finalize", path, e))?;
        tracing::debug!("Wrote {} ({} bytes)", path, bytes.len());
        Ok(())
    }

    async fn delete_path(&self, path: &str) -> Result<bool, StoreError> {
        let full = self.resolve(path)?;
        let metadata = match fs::metadata(&full).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(StoreError::io("inspect", path, err)),
        };
        let result = if metadata.is_dir() {
            fs::remove_dir_all(&full).await
        } else {
            fs::remove_file(&full).await
        };
        match result {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StoreError::io("delete", path, err)),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        let full = self.resolve(path)?;
        fs::try_exists(&full)
            .await
            .map_err(|e| StoreError::io("inspect", path, e))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let full = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.resolve(prefix)?
        };
        let mut entries = match fs::read_dir(&full).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io("list", prefix, err)),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io("list", prefix, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(".tmp") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}
