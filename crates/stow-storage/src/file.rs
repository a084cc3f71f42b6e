//! File-backed storage: the whole key space in one JSON document.
//!
//! Every mutating operation reads the document, applies the change, and
//! replaces the file through a temporary file plus rename. Each operation
//! therefore happens completely or not at all, including `multi_set`, even
//! if the process dies mid-write.
//!
//! On-disk format: a JSON object mapping storage keys to their string
//! values, keys sorted.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::traits::Storage;

type Entries = BTreeMap<String, String>;

/// Key-value storage persisted to a single JSON file.
///
/// Writers are serialized through an async mutex; readers see either the
/// previous or the next complete document, never a torn one.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStorage {
    /// Open storage at `path`. The file is created on first write; its
    /// parent directory is created now.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_entries(&self) -> StorageResult<Entries> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || load_entries(&path))
            .await
            .map_err(|e| StorageError::Backend(format!("storage task failed: {e}")))?
    }

    async fn update<F>(&self, apply: F) -> StorageResult<()>
    where
        F: FnOnce(&mut Entries) + Send + 'static,
    {
        let _guard = self.write_lock.lock().await;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut entries = load_entries(&path)?;
            apply(&mut entries);
            store_entries(&path, &entries)
        })
        .await
        .map_err(|e| StorageError::Backend(format!("storage task failed: {e}")))?
    }
}

fn load_entries(path: &Path) -> StorageResult<Entries> {
    match fs::read(path) {
        Ok(bytes) if bytes.is_empty() => Ok(Entries::new()),
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::Serialization(format!("{}: {e}", path.display()))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Entries::new()),
        Err(e) => Err(e.into()),
    }
}

fn store_entries(path: &Path, entries: &Entries) -> StorageResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let bytes = serde_json::to_vec(entries)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StorageError::Io(e.error))?;

    debug!(path = %path.display(), keys = entries.len(), "storage file replaced");
    Ok(())
}

#[async_trait]
impl Storage for FileStorage {
    async fn get_all_keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.read_entries().await?.into_keys().collect())
    }

    async fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.read_entries().await?.remove(key))
    }

    async fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.update(move |entries| {
            entries.insert(key, value);
        })
        .await
    }

    async fn remove_item(&self, key: &str) -> StorageResult<()> {
        let key = key.to_string();
        self.update(move |entries| {
            entries.remove(&key);
        })
        .await
    }

    async fn multi_set(&self, pairs: &[(String, String)]) -> StorageResult<()> {
        let pairs = pairs.to_vec();
        self.update(move |entries| entries.extend(pairs)).await
    }

    async fn clear(&self) -> StorageResult<()> {
        self.update(|entries| entries.clear()).await
    }
}
