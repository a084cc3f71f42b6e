//! Reading persisted subtrees back out of storage.

use std::collections::BTreeMap;
use std::sync::Arc;

use stow_state::{State, Subtree};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::config::PersistConfig;
use crate::error::PersistResult;

/// Load every persisted, whitelisted subtree.
///
/// Keys are fetched concurrently. A key that cannot be read or decoded is
/// logged and left out; only a failure to list keys fails the whole load.
pub async fn load_stored_state(config: &PersistConfig) -> PersistResult<State> {
    let storage = config.storage();
    let all_keys = storage.get_all_keys().await.map_err(|e| {
        error!(error = %e, "cannot list persisted keys");
        e
    })?;

    let wanted: Vec<(String, String)> = all_keys
        .iter()
        .filter_map(|storage_key| {
            let key = config.state_key(storage_key)?;
            config
                .passes(key)
                .then(|| (storage_key.clone(), key.to_string()))
        })
        .collect();

    if wanted.is_empty() {
        debug!(listed = all_keys.len(), "no persisted keys to restore");
        return Ok(State::new());
    }

    let mut tasks = JoinSet::new();
    for (storage_key, key) in wanted {
        let storage = Arc::clone(storage);
        let codec = Arc::clone(config.codec());
        tasks.spawn(async move {
            let loaded = match storage.get_item(&storage_key).await {
                Ok(Some(raw)) => codec.deserialize(&key, &raw).map(Some),
                Ok(None) => Ok(None),
                Err(e) => Err(e.into()),
            };
            (key, loaded)
        });
    }

    let mut restored: BTreeMap<String, Subtree> = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((key, Ok(Some(value)))) => {
                restored.insert(key, Arc::new(value));
            }
            Ok((key, Ok(None))) => {
                debug!(key = %key, "key vanished before it could be read");
            }
            Ok((key, Err(e))) => {
                warn!(key = %key, error = %e, "cannot restore key, skipping");
            }
            Err(e) => {
                warn!(error = %e, "restore task failed");
            }
        }
    }

    debug!(keys = restored.len(), "stored state loaded");
    Ok(State::from_subtrees(restored))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersistError;
    use crate::test_support::TestStorage;
    use serde_json::json;
    use stow_storage::Storage;

    fn config(storage: Arc<TestStorage>, whitelist: &[&str]) -> PersistConfig {
        PersistConfig::builder()
            .whitelist(whitelist.iter().copied())
            .storage(storage)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn filters_by_prefix_and_whitelist() {
        let storage = TestStorage::with_entries([
            ("reduxPersist:a", r#""1""#),
            ("reduxPersist:b", "2"),
            ("other", "3"),
        ]);
        let state = load_stored_state(&config(storage, &["a"])).await.unwrap();
        assert_eq!(state.len(), 1);
        assert_eq!(**state.get("a").unwrap(), json!("1"));
    }

    #[tokio::test]
    async fn nothing_stored_completes_empty() {
        let storage = TestStorage::with_entries([("unrelated", "1")]);
        let state = load_stored_state(&config(storage, &["a"])).await.unwrap();
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn one_bad_key_does_not_sink_the_rest() {
        let storage = TestStorage::with_entries([
            ("reduxPersist:good", r#"{"n":1}"#),
            ("reduxPersist:garbled", "{not json"),
            ("reduxPersist:unreadable", "1"),
        ]);
        storage.fail_get("reduxPersist:unreadable");
        let state = load_stored_state(&config(storage, &["good", "garbled", "unreadable"]))
            .await
            .unwrap();
        assert_eq!(state.keys().collect::<Vec<_>>(), vec!["good"]);
        assert_eq!(**state.get("good").unwrap(), json!({"n": 1}));
    }

    #[tokio::test]
    async fn blacklisted_keys_are_not_loaded() {
        let storage = TestStorage::with_entries([("reduxPersist:a", "1"), ("reduxPersist:b", "2")]);
        let config = PersistConfig::builder()
            .whitelist(["a", "b"])
            .blacklist(["b"])
            .storage(storage)
            .build()
            .unwrap();
        let state = load_stored_state(&config).await.unwrap();
        assert!(state.contains_key("a"));
        assert!(!state.contains_key("b"));
    }

    #[tokio::test]
    async fn listing_failure_fails_the_load() {
        let storage = TestStorage::new();
        storage.fail_listing();
        let err = load_stored_state(&config(storage, &["a"])).await.unwrap_err();
        assert!(matches!(err, PersistError::Storage(_)));
    }

    #[tokio::test]
    async fn custom_prefix_is_honoured() {
        let storage = TestStorage::new();
        storage.set_item("app:a", "true").await.unwrap();
        storage.set_item("reduxPersist:a", "false").await.unwrap();
        let config = PersistConfig::builder()
            .whitelist(["a"])
            .key_prefix("app:")
            .storage(storage)
            .build()
            .unwrap();
        let state = load_stored_state(&config).await.unwrap();
        assert_eq!(**state.get("a").unwrap(), json!(true));
    }
}
