//! The central store: holds the current [`State`], applies actions through a
//! reducer, and announces every change on a coalescing channel.

use std::sync::{Arc, RwLock};

use tokio::sync::watch;
use tracing::trace;

use crate::action::Action;
use crate::state::State;

/// A pure function from (state, action) to the next state.
///
/// Reducers must return subtrees they did not change by identity (clone the
/// `Arc`, never rebuild the value); persistence depends on it.
pub type Reducer = Arc<dyn Fn(&State, &Action) -> State + Send + Sync>;

/// Wrap a closure as a [`Reducer`].
pub fn reducer<F>(f: F) -> Reducer
where
    F: Fn(&State, &Action) -> State + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wraps a reducer with extra behavior, applied at store creation and again
/// on every [`Store::replace_reducer`].
pub trait StoreEnhancer: Send + Sync {
    fn lift(&self, reducer: Reducer) -> Reducer;
}

/// Read access to the current state snapshot.
pub trait StateSource: Send + Sync {
    fn snapshot(&self) -> State;
}

/// The single owner of application state.
pub struct Store {
    state: RwLock<State>,
    reducer: RwLock<Reducer>,
    enhancer: Option<Arc<dyn StoreEnhancer>>,
    changes: watch::Sender<u64>,
}

impl Store {
    /// Create a store and dispatch [`Action::Init`] against `initial`.
    pub fn new(reducer: Reducer, initial: State) -> Self {
        Self::build(reducer, initial, None)
    }

    /// Create a store whose reducer is wrapped by `enhancer`.
    pub fn with_enhancer(
        reducer: Reducer,
        initial: State,
        enhancer: Arc<dyn StoreEnhancer>,
    ) -> Self {
        Self::build(reducer, initial, Some(enhancer))
    }

    fn build(reducer: Reducer, initial: State, enhancer: Option<Arc<dyn StoreEnhancer>>) -> Self {
        let reducer = match &enhancer {
            Some(enhancer) => enhancer.lift(reducer),
            None => reducer,
        };
        let state = reducer(&initial, &Action::Init);
        let (changes, _) = watch::channel(0);
        Self {
            state: RwLock::new(state),
            reducer: RwLock::new(reducer),
            enhancer,
            changes,
        }
    }

    /// Apply `action` and return the resulting state.
    ///
    /// The new state is visible through [`StateSource::snapshot`] before the
    /// change is announced to subscribers.
    pub fn dispatch(&self, action: Action) -> State {
        let reducer = self.reducer.read().expect("reducer lock poisoned").clone();
        let next = {
            let mut state = self.state.write().expect("state lock poisoned");
            let next = reducer(&*state, &action);
            *state = next.clone();
            next
        };
        self.changes.send_modify(|version| *version += 1);
        trace!(kind = action.kind(), "action dispatched");
        next
    }

    /// Subscribe to change notifications.
    ///
    /// The channel carries a counter of dispatched actions; changes that
    /// arrive while the receiver is busy coalesce into one wake-up.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Number of actions dispatched since creation (excluding init).
    pub fn version(&self) -> u64 {
        *self.changes.borrow()
    }

    /// Swap the reducer, re-applying the store's enhancer.
    pub fn replace_reducer(&self, reducer: Reducer) {
        let reducer = match &self.enhancer {
            Some(enhancer) => enhancer.lift(reducer),
            None => reducer,
        };
        *self.reducer.write().expect("reducer lock poisoned") = reducer;
    }
}

impl StateSource for Store {
    fn snapshot(&self) -> State {
        self.state.read().expect("state lock poisoned").clone()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("version", &self.version())
            .field("enhanced", &self.enhancer.is_some())
            .finish()
    }
}
