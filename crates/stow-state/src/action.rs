//! Actions dispatched to the [`Store`](crate::Store).

use serde_json::Value;

use crate::state::State;

/// Type identifier of the restore action.
pub const REHYDRATE: &str = "persist/REHYDRATE";

/// Type identifier of the action a store dispatches to itself on creation.
pub const INIT: &str = "@@stow/INIT";

/// The one-shot message that carries restored state into the reducers.
#[derive(Clone, Debug, PartialEq)]
pub struct RestoreAction {
    /// Restored key → subtree mapping. Empty when loading failed.
    pub payload: State,
    /// Set when loading failed outright.
    pub error: Option<String>,
}

impl RestoreAction {
    /// A successful restore carrying `payload`.
    pub fn restored(payload: State) -> Self {
        Self {
            payload,
            error: None,
        }
    }

    /// A failed restore: empty payload, `error` set.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            payload: State::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Something that happened, handed to the reducer.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Dispatched once when a store is created.
    Init,
    /// Restored state from storage.
    Rehydrate(RestoreAction),
    /// Any application-defined action.
    Custom { kind: String, payload: Value },
}

impl Action {
    pub fn custom(kind: impl Into<String>, payload: Value) -> Self {
        Self::Custom {
            kind: kind.into(),
            payload,
        }
    }

    /// The action's type identifier.
    pub fn kind(&self) -> &str {
        match self {
            Self::Init => INIT,
            Self::Rehydrate(_) => REHYDRATE,
            Self::Custom { kind, .. } => kind,
        }
    }

    pub fn as_restore(&self) -> Option<&RestoreAction> {
        match self {
            Self::Rehydrate(restore) => Some(restore),
            _ => None,
        }
    }
}
