use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StorageResult;

/// Asynchronous string key-value storage.
///
/// All implementations must satisfy these invariants:
/// - Values are opaque: what `set_item` stores, `get_item` returns verbatim.
/// - `remove_item` on a missing key succeeds.
/// - `multi_set` applies every pair or fails; a failure may leave any
///   subset of the pairs written unless the backend documents atomicity.
/// - All I/O errors are propagated, never silently ignored.
#[async_trait]
pub trait Storage: Send + Sync {
    /// List every key currently stored, in no particular order.
    async fn get_all_keys(&self) -> StorageResult<Vec<String>>;

    /// Read the value stored under `key`.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    async fn get_item(&self, key: &str) -> StorageResult<Option<String>>;

    /// Write `value` under `key`, replacing any previous value.
    async fn set_item(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Delete `key`. Missing keys are not an error.
    async fn remove_item(&self, key: &str) -> StorageResult<()>;

    /// Write several pairs in one batch.
    ///
    /// Default implementation calls `set_item()` for each pair, stopping at
    /// the first failure. Backends may override for fewer round-trips or
    /// atomicity.
    async fn multi_set(&self, pairs: &[(String, String)]) -> StorageResult<()> {
        for (key, value) in pairs {
            self.set_item(key, value).await?;
        }
        Ok(())
    }

    /// Delete every key.
    ///
    /// Default implementation lists all keys and removes them one by one.
    async fn clear(&self) -> StorageResult<()> {
        for key in self.get_all_keys().await? {
            self.remove_item(&key).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S: Storage + ?Sized> Storage for Arc<S> {
    async fn get_all_keys(&self) -> StorageResult<Vec<String>> {
        (**self).get_all_keys().await
    }

    async fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        (**self).get_item(key).await
    }

    async fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        (**self).set_item(key, value).await
    }

    async fn remove_item(&self, key: &str) -> StorageResult<()> {
        (**self).remove_item(key).await
    }

    async fn multi_set(&self, pairs: &[(String, String)]) -> StorageResult<()> {
        (**self).multi_set(pairs).await
    }

    async fn clear(&self) -> StorageResult<()> {
        (**self).clear().await
    }
}
