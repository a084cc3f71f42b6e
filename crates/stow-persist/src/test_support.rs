//! Storage and reducer doubles shared by the unit tests.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use stow_state::{reducer, Action, Reducer, State};
use stow_storage::{InMemoryStorage, Storage, StorageError, StorageResult};
use tokio::sync::Semaphore;

/// In-memory storage with failure injection and call accounting.
#[derive(Default)]
pub struct TestStorage {
    pub inner: InMemoryStorage,
    batches: Mutex<Vec<Vec<(String, String)>>>,
    removed: Mutex<Vec<String>>,
    fail_multi_set: AtomicUsize,
    fail_listing: AtomicBool,
    fail_get: Mutex<BTreeSet<String>>,
    fail_remove: Mutex<BTreeSet<String>>,
    panic_remove: Mutex<BTreeSet<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    write_delay: Option<Duration>,
}

impl TestStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_entries<I, K, V>(entries: I) -> Arc<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Arc::new(Self {
            inner: InMemoryStorage::with_entries(entries),
            ..Self::default()
        })
    }

    /// Every `multi_set` waits for one permit from the returned semaphore.
    pub fn gated() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let storage = Arc::new(Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::default()
        });
        (storage, gate)
    }

    /// Every `multi_set` sleeps for `delay` before writing.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            write_delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn fail_next_multi_sets(&self, count: usize) {
        self.fail_multi_set.store(count, Ordering::SeqCst);
    }

    pub fn fail_listing(&self) {
        self.fail_listing.store(true, Ordering::SeqCst);
    }

    pub fn fail_get(&self, key: &str) {
        self.fail_get.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_remove(&self, key: &str) {
        self.fail_remove.lock().unwrap().insert(key.to_string());
    }

    /// Removing `key` panics inside the storage call.
    pub fn panic_on_remove(&self, key: &str) {
        self.panic_remove.lock().unwrap().insert(key.to_string());
    }

    /// Successful and failed `multi_set` calls, in order.
    pub fn batches(&self) -> Vec<Vec<(String, String)>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn peek(&self, key: &str) -> Option<String> {
        self.inner.peek(key)
    }
}

#[async_trait]
impl Storage for TestStorage {
    async fn get_all_keys(&self) -> StorageResult<Vec<String>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("listing unavailable".into()));
        }
        self.inner.get_all_keys().await
    }

    async fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        if self.fail_get.lock().unwrap().contains(key) {
            return Err(StorageError::Backend(format!("cannot read {key}")));
        }
        self.inner.get_item(key).await
    }

    async fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        self.inner.set_item(key, value).await
    }

    async fn remove_item(&self, key: &str) -> StorageResult<()> {
        self.removed.lock().unwrap().push(key.to_string());
        if self.panic_remove.lock().unwrap().contains(key) {
            panic!("storage crashed removing {key}");
        }
        if self.fail_remove.lock().unwrap().contains(key) {
            return Err(StorageError::Backend(format!("cannot remove {key}")));
        }
        self.inner.remove_item(key).await
    }

    async fn multi_set(&self, pairs: &[(String, String)]) -> StorageResult<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.batches.lock().unwrap().push(pairs.to_vec());

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }

        let fail = self
            .fail_multi_set
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let result = if fail {
            Err(StorageError::Backend("write rejected".into()))
        } else {
            self.inner.multi_set(pairs).await
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Reducer understanding `set` (payload `{"key": k, "value": v}`) and
/// `unset` (payload `{"key": k}`) actions.
pub fn set_reducer() -> Reducer {
    reducer(|state: &State, action: &Action| match action {
        Action::Custom { kind, payload } if kind == "set" => {
            let key = payload["key"].as_str().unwrap_or_default();
            state.with(key, payload["value"].clone())
        }
        Action::Custom { kind, payload } if kind == "unset" => {
            state.without(payload["key"].as_str().unwrap_or_default())
        }
        _ => state.clone(),
    })
}

pub fn set(key: &str, value: Value) -> Action {
    Action::custom("set", json!({ "key": key, "value": value }))
}

pub fn unset(key: &str) -> Action {
    Action::custom("unset", json!({ "key": key }))
}
