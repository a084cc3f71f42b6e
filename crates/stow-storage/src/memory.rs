use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::traits::Storage;

/// In-memory, `BTreeMap`-based key-value store.
///
/// Intended for tests and embedding. All entries live behind a `RwLock`;
/// `multi_set` takes the lock once, so a batch is applied atomically.
pub struct InMemoryStorage {
    entries: RwLock<BTreeMap<String, String>>,
}

impl InMemoryStorage {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a store pre-populated with the given pairs.
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: RwLock::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().expect("lock poisoned").is_empty()
    }

    /// Synchronous read of a single value, for inspection outside a runtime.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries.read().expect("lock poisoned").get(key).cloned()
    }

    /// A sorted copy of every stored pair.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.read().expect("lock poisoned").clone()
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get_all_keys(&self) -> StorageResult<Vec<String>> {
        let map = self.entries.read().expect("lock poisoned");
        Ok(map.keys().cloned().collect())
    }

    async fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        let map = self.entries.read().expect("lock poisoned");
        Ok(map.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut map = self.entries.write().expect("lock poisoned");
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> StorageResult<()> {
        let mut map = self.entries.write().expect("lock poisoned");
        map.remove(key);
        Ok(())
    }

    async fn multi_set(&self, pairs: &[(String, String)]) -> StorageResult<()> {
        let mut map = self.entries.write().expect("lock poisoned");
        for (key, value) in pairs {
            map.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn clear(&self) -> StorageResult<()> {
        self.entries.write().expect("lock poisoned").clear();
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStorage")
            .field("key_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Core operations
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn set_and_get() {
        let storage = InMemoryStorage::new();
        storage.set_item("reduxPersist:a", "1").await.unwrap();
        assert_eq!(
            storage.get_item("reduxPersist:a").await.unwrap().as_deref(),
            Some("1")
        );
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let storage = InMemoryStorage::new();
        assert!(storage.get_item("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_overwrites() {
        let storage = InMemoryStorage::new();
        storage.set_item("k", "\"old\"").await.unwrap();
        storage.set_item("k", "\"new\"").await.unwrap();
        assert_eq!(storage.peek("k").as_deref(), Some("\"new\""));
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn remove_missing_is_ok() {
        let storage = InMemoryStorage::new();
        storage.remove_item("never-written").await.unwrap();
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn remove_present() {
        let storage = InMemoryStorage::with_entries([("a", "1"), ("b", "2")]);
        storage.remove_item("a").await.unwrap();
        assert_eq!(storage.get_all_keys().await.unwrap(), vec!["b".to_string()]);
    }

    // -----------------------------------------------------------------------
    // Batch operations
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn multi_set_writes_every_pair() {
        let storage = InMemoryStorage::new();
        let pairs = vec![
            ("p:a".to_string(), "1".to_string()),
            ("p:b".to_string(), "2".to_string()),
        ];
        storage.multi_set(&pairs).await.unwrap();
        let snapshot = storage.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["p:a"], "1");
        assert_eq!(snapshot["p:b"], "2");
    }

    #[tokio::test]
    async fn clear_removes_all() {
        let storage = InMemoryStorage::with_entries([("a", "1"), ("b", "2")]);
        storage.clear().await.unwrap();
        assert!(storage.is_empty());
        assert!(storage.get_all_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn arc_forwards_to_inner() {
        use std::sync::Arc;

        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        storage.set_item("k", "true").await.unwrap();
        assert_eq!(storage.get_item("k").await.unwrap().as_deref(), Some("true"));
    }

    // -----------------------------------------------------------------------
    // Debug
    // -----------------------------------------------------------------------

    #[test]
    fn debug_format() {
        let storage = InMemoryStorage::with_entries([("x", "1")]);
        let debug = format!("{storage:?}");
        assert!(debug.contains("InMemoryStorage"));
        assert!(debug.contains("key_count"));
    }
}
