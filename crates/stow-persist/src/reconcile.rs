//! Merging restored state into live state.
//!
//! [`AutoRehydrate`] is a [`StoreEnhancer`]: it lifts the application
//! reducer so that a restore action is first reduced normally and the
//! result is then reconciled, key by key, with the restored payload.
//!
//! Default policy for each restored key `k`, given the state before the
//! action (`prior`), the payload (`inbound`), and the reducer's output
//! (`reduced`):
//!
//! 1. `k` not in `prior`: skipped, unknown keys are never introduced.
//! 2. `prior[k]` is structured and `inbound[k]` is null: skipped.
//! 3. `reduced[k]` is not `prior[k]` (by identity): the reducer wins.
//! 4. both objects: shallow merge, inbound fields over prior fields.
//! 5. otherwise: `inbound[k]` replaces the value.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use stow_state::{reducer, same_subtree, Action, Reducer, State, StoreEnhancer};
use tracing::{debug, warn};

use crate::config::PersistConfig;

/// Combines restored state with the state the reducer produced for the
/// same restore action.
pub trait StateReconciler: Send + Sync {
    fn reconcile(&self, prior: &State, inbound: &State, reduced: &State, log: bool) -> State;
}

/// The per-key policy described in the module docs.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultReconciler;

fn is_structured(value: &Value) -> bool {
    value.is_object() || value.is_array()
}

impl StateReconciler for DefaultReconciler {
    fn reconcile(&self, prior: &State, inbound: &State, reduced: &State, log: bool) -> State {
        let mut next = reduced.to_subtrees();

        for (key, incoming) in inbound.iter() {
            let Some(initial) = prior.get(key) else {
                continue;
            };

            if is_structured(initial) && incoming.is_null() {
                if log {
                    warn!(key, "restored subtree is null but initial state is structured, skipping");
                }
                continue;
            }

            if !reduced.get(key).is_some_and(|r| same_subtree(r, initial)) {
                if log {
                    warn!(key, "subtree modified by reducer during restore, keeping reducer's value");
                }
                continue;
            }

            let merged = match (initial.as_object(), incoming.as_object()) {
                (Some(base), Some(overlay)) => {
                    let mut fields = base.clone();
                    fields.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
                    Arc::new(Value::Object(fields))
                }
                _ => Arc::clone(incoming),
            };
            next.insert(key.to_string(), merged);

            if log {
                debug!(key, "subtree rehydrated");
            }
        }

        State::from_subtrees(next)
    }
}

/// Store enhancer that reconciles restore actions into live state.
#[derive(Clone)]
pub struct AutoRehydrate {
    reconciler: Arc<dyn StateReconciler>,
    log: bool,
}

impl AutoRehydrate {
    /// Default policy, diagnostics off.
    pub fn new() -> Self {
        Self {
            reconciler: Arc::new(DefaultReconciler),
            log: false,
        }
    }

    /// Take the reconciler override and `log` flag from `config`.
    pub fn from_config(config: &PersistConfig) -> Self {
        Self {
            reconciler: config
                .reconciler()
                .cloned()
                .unwrap_or_else(|| Arc::new(DefaultReconciler)),
            log: config.log(),
        }
    }

    pub fn with_reconciler(mut self, reconciler: Arc<dyn StateReconciler>) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn with_log(mut self, log: bool) -> Self {
        self.log = log;
        self
    }
}

impl Default for AutoRehydrate {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreEnhancer for AutoRehydrate {
    fn lift(&self, inner: Reducer) -> Reducer {
        let reconciler = Arc::clone(&self.reconciler);
        let log = self.log;
        let tracker = RestoreTracker::default();

        reducer(move |state, action| match action {
            Action::Rehydrate(restore) => {
                let early = tracker.finish();
                if log && !early.is_empty() {
                    warn!(
                        count = early.len(),
                        kinds = ?early,
                        "actions were dispatched before rehydration completed; \
                         the restore may overwrite the state they produced. \
                         Consider dispatching them after rehydration."
                    );
                }
                let reduced = inner(state, action);
                reconciler.reconcile(state, &restore.payload, &reduced, log)
            }
            Action::Init => inner(state, action),
            other => {
                if log {
                    tracker.record(other.kind());
                }
                inner(state, other)
            }
        })
    }
}

/// Remembers which actions ran before the first restore.
#[derive(Default)]
struct RestoreTracker {
    rehydrated: AtomicBool,
    early: Mutex<Vec<String>>,
}

impl RestoreTracker {
    fn record(&self, kind: &str) {
        if !self.rehydrated.load(Ordering::Acquire) {
            self.early
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(kind.to_string());
        }
    }

    /// Mark restore as done and hand back the early action kinds, once.
    fn finish(&self) -> Vec<String> {
        if self.rehydrated.swap(true, Ordering::AcqRel) {
            return Vec::new();
        }
        std::mem::take(&mut *self.early.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
