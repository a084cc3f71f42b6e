//! Startup sequencing: pause, load, migrate, dispatch, reset, resume.

use std::sync::Arc;

use stow_state::{Action, RestoreAction, Store};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::PersistConfig;
use crate::loader::load_stored_state;
use crate::persistor::Persistor;

/// What a restore delivered to the store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Keys present in the dispatched payload, sorted.
    pub restored_keys: Vec<String>,
    /// Set when stored state could not be listed at all.
    pub error: Option<String>,
}

impl RestoreReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Called once a startup restore has finished and the persistor resumed.
pub type OnComplete = Box<dyn FnOnce(&RestoreReport) + Send>;

impl Persistor {
    /// Reload stored state into `store` on demand.
    ///
    /// `store` must be the state source this persistor was created with.
    /// The persistor is paused for the duration and returned to its prior
    /// pause state afterwards.
    pub async fn rehydrate(&self, store: &Store) -> RestoreReport {
        let was_paused = self.is_paused();
        self.pause();
        let _resume = ResumeOnDrop {
            persistor: self,
            armed: !was_paused,
        };
        self.restore_into(store).await
    }

    async fn restore_into(&self, store: &Store) -> RestoreReport {
        let config = self.config();
        let action = match load_stored_state(config).await {
            Ok(restored) => {
                let restored = match config.migrations() {
                    Some(migrations) => migrations.migrate(restored),
                    None => restored,
                };
                RestoreAction::restored(restored)
            }
            Err(e) => {
                warn!(error = %e, "restore failed, continuing with initial state");
                RestoreAction::failed(e.to_string())
            }
        };

        let report = RestoreReport {
            restored_keys: action.payload.keys().map(str::to_string).collect(),
            error: action.error.clone(),
        };
        let rehydrated = store.dispatch(Action::Rehydrate(action));
        self.reset_baseline(rehydrated);

        info!(
            keys = report.restored_keys.len(),
            failed = !report.is_ok(),
            "state rehydrated"
        );
        report
    }
}

/// A persistor wired to a store, with its restore running.
#[derive(Debug)]
pub struct Bootstrap {
    pub persistor: Persistor,
    /// Resolves once the startup restore is done and persistence resumed.
    pub restore: JoinHandle<RestoreReport>,
    /// Forwards store changes to the persistor.
    pub listener: JoinHandle<()>,
}

impl Bootstrap {
    /// Stop listening for store changes and abandon a pending restore.
    pub fn shutdown(&self) {
        self.restore.abort();
        self.listener.abort();
    }
}

/// Create a persistor for `store` and restore stored state into it.
///
/// The persistor starts paused, so nothing dispatched before the restore
/// completes is written. Must be called inside a Tokio runtime.
pub fn persist_store(
    store: Arc<Store>,
    config: PersistConfig,
    on_complete: Option<OnComplete>,
) -> Bootstrap {
    let persistor = Persistor::new(store.clone(), config);
    persistor.pause();
    let listener = persistor.watch(store.subscribe());

    let restoring = persistor.clone();
    let restore = tokio::spawn(async move {
        let report = {
            let _resume = ResumeOnDrop {
                persistor: &restoring,
                armed: true,
            };
            restoring.restore_into(&store).await
        };
        if let Some(on_complete) = on_complete {
            on_complete(&report);
        }
        report
    });

    Bootstrap {
        persistor,
        restore,
        listener,
    }
}

/// Resumes the persistor and catches up on changes made while paused.
struct ResumeOnDrop<'a> {
    persistor: &'a Persistor,
    armed: bool,
}

impl Drop for ResumeOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.persistor.resume();
            self.persistor.notify_changed();
        }
    }
}
