//! State tree and central store for Stow.
//!
//! The application state is a map from top-level key to a subtree. Subtrees
//! are reference-counted JSON values and the map itself is copy-on-write,
//! so an update that touches one key leaves every other subtree pointing at
//! the same allocation. Persistence relies on that: a key is "changed" iff
//! its `Arc` differs from the one last written.
//!
//! # Modules
//!
//! - [`state`] -- [`State`] and [`Subtree`]
//! - [`action`] -- [`Action`] and the one-shot [`RestoreAction`]
//! - [`store`] -- the [`Store`], its [`Reducer`], and the [`StoreEnhancer`] seam

pub mod action;
pub mod state;
pub mod store;

pub use action::{Action, RestoreAction, INIT, REHYDRATE};
pub use state::{same_subtree, State, Subtree};
pub use store::{reducer, Reducer, StateSource, Store, StoreEnhancer};
