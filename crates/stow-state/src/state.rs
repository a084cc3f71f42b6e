use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

/// One top-level subtree of the state.
pub type Subtree = Arc<Value>;

/// Returns `true` if both handles point at the same subtree allocation.
pub fn same_subtree(a: &Subtree, b: &Subtree) -> bool {
    Arc::ptr_eq(a, b)
}

/// An immutable snapshot of the application state.
///
/// Cloning is O(1). Every "modifying" method returns a new `State` that
/// shares all untouched subtrees with `self`, which is what makes the
/// identity-based change detection in the persistence layer sound.
///
/// `PartialEq` compares contents; use [`State::same`] for identity.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct State {
    entries: Arc<BTreeMap<String, Subtree>>,
}

impl State {
    /// An empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a state from plain values, wrapping each in a fresh subtree.
    pub fn from_values<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        values
            .into_iter()
            .map(|(k, v)| (k.into(), Arc::new(v)))
            .collect()
    }

    /// Build a state from existing subtrees, keeping their identity.
    pub fn from_subtrees(entries: BTreeMap<String, Subtree>) -> Self {
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Returns `true` if `self` and `other` are the same snapshot.
    pub fn same(&self, other: &State) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }

    pub fn get(&self, key: &str) -> Option<&Subtree> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Subtree)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A copy of the key → subtree map. Subtrees are shared, not cloned.
    pub fn to_subtrees(&self) -> BTreeMap<String, Subtree> {
        (*self.entries).clone()
    }

    /// A new state with `key` set to a fresh subtree holding `value`.
    pub fn with(&self, key: impl Into<String>, value: Value) -> State {
        self.with_subtree(key, Arc::new(value))
    }

    /// A new state with `key` pointing at `subtree`.
    pub fn with_subtree(&self, key: impl Into<String>, subtree: Subtree) -> State {
        let mut entries = self.to_subtrees();
        entries.insert(key.into(), subtree);
        Self::from_subtrees(entries)
    }

    /// A new state without `key`. Returns `self` unchanged (same identity)
    /// if the key is absent.
    pub fn without(&self, key: &str) -> State {
        if !self.contains_key(key) {
            return self.clone();
        }
        let mut entries = self.to_subtrees();
        entries.remove(key);
        Self::from_subtrees(entries)
    }

    /// Render the whole state as one JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), (**v).clone()))
                .collect::<Map<String, Value>>(),
        )
    }
}

impl FromIterator<(String, Subtree)> for State {
    fn from_iter<I: IntoIterator<Item = (String, Subtree)>>(iter: I) -> Self {
        Self::from_subtrees(iter.into_iter().collect())
    }
}
