//! Versioned migrations applied to restored state before it reaches the
//! reducers.
//!
//! The stored version lives at `state[version_key].version`. On restore:
//!
//! - no stored version (first launch): stamp the current version, run nothing
//! - stored == current: untouched
//! - otherwise: run every migration newer than the stored version, in
//!   ascending order, then stamp the current version

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use stow_state::State;
use tracing::{debug, warn};

/// Default state key holding `{ "version": N }`.
pub const DEFAULT_VERSION_KEY: &str = "migrations";

/// One migration step.
pub type MigrationFn = Arc<dyn Fn(State) -> State + Send + Sync>;

/// An ordered manifest of migrations keyed by the version they produce.
#[derive(Clone)]
pub struct Migrations {
    steps: BTreeMap<u32, MigrationFn>,
    version_key: String,
}

impl Migrations {
    pub fn new() -> Self {
        Self {
            steps: BTreeMap::new(),
            version_key: DEFAULT_VERSION_KEY.to_string(),
        }
    }

    pub fn with_version_key(mut self, key: impl Into<String>) -> Self {
        self.version_key = key.into();
        self
    }

    /// Register the migration that brings state up to `version`.
    pub fn add<F>(mut self, version: u32, step: F) -> Self
    where
        F: Fn(State) -> State + Send + Sync + 'static,
    {
        self.steps.insert(version, Arc::new(step));
        self
    }

    pub fn version_key(&self) -> &str {
        &self.version_key
    }

    /// The newest registered version, if any.
    pub fn current_version(&self) -> Option<u32> {
        self.steps.keys().next_back().copied()
    }

    /// The version recorded in `state`. Accepts integers and integer strings.
    pub fn stored_version(&self, state: &State) -> Option<u32> {
        let version = state.get(&self.version_key)?.get("version")?;
        match version {
            Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Bring restored `state` up to the current version.
    pub fn migrate(&self, state: State) -> State {
        let Some(current) = self.current_version() else {
            return state;
        };

        let state = match self.stored_version(&state) {
            Some(stored) if stored == current => return state,
            Some(stored) => {
                debug!(from = stored, to = current, "migrating restored state");
                self.steps
                    .range(stored.saturating_add(1)..)
                    .fold(state, |state, (_, step)| step(state))
            }
            None => state,
        };
        self.stamp(state, current)
    }

    fn stamp(&self, state: State, version: u32) -> State {
        let stamped = match state.get(&self.version_key).map(|subtree| &**subtree) {
            None => json!({ "version": version }),
            Some(Value::Object(fields)) => {
                let mut fields = fields.clone();
                fields.insert("version".to_string(), json!(version));
                Value::Object(fields)
            }
            Some(_) => {
                warn!(
                    key = %self.version_key,
                    "version subtree is not an object; leaving it unstamped"
                );
                return state;
            }
        };
        state.with(self.version_key.clone(), stamped)
    }
}

impl Default for Migrations {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Migrations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrations")
            .field("versions", &self.steps.keys().collect::<Vec<_>>())
            .field("version_key", &self.version_key)
            .finish()
    }
}
