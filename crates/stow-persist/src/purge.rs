//! Removing persisted keys.

use std::collections::BTreeSet;
use std::sync::Arc;

use stow_storage::Storage;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::error::{PersistError, PersistResult};

/// Remove persisted state.
///
/// With `keys = None`, every storage key under `key_prefix` is removed;
/// otherwise only the named state keys are. All removals are attempted
/// even if some fail, and the failures are reported together.
pub async fn purge_stored_state(
    storage: &Arc<dyn Storage>,
    key_prefix: &str,
    keys: Option<&[String]>,
) -> PersistResult<()> {
    let targets: Vec<String> = match keys {
        Some(keys) => keys.iter().map(|k| format!("{key_prefix}{k}")).collect(),
        None => storage
            .get_all_keys()
            .await?
            .into_iter()
            .filter(|k| k.starts_with(key_prefix))
            .collect(),
    };

    let mut tasks = JoinSet::new();
    for storage_key in targets.iter().cloned() {
        let storage = Arc::clone(storage);
        tasks.spawn(async move {
            let result = storage.remove_item(&storage_key).await;
            (storage_key, result)
        });
    }

    let mut removed = BTreeSet::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((storage_key, Ok(()))) => {
                removed.insert(storage_key);
            }
            Ok((storage_key, Err(e))) => {
                warn!(key = %storage_key, error = %e, "cannot purge key");
            }
            Err(e) => warn!(error = %e, "purge task failed"),
        }
    }

    // Anything not confirmed removed failed, including keys whose task died.
    let mut failed: Vec<String> = targets
        .into_iter()
        .filter(|key| !removed.contains(key))
        .collect();
    if failed.is_empty() {
        info!(removed = removed.len(), "persisted state purged");
        Ok(())
    } else {
        failed.sort();
        failed.dedup();
        Err(PersistError::PurgeFailed { keys: failed })
    }
}
