//! Incremental persistence of a Stow store.
//!
//! A [`Persistor`] watches a store and writes the whitelisted top-level
//! subtrees that changed since its last write, one coalesced batch at a
//! time. At startup [`persist_store`] loads what was saved, dispatches it as
//! a restore action, and only then lets the persistor resume. The
//! [`AutoRehydrate`] enhancer merges that restore into live state.
//!
//! # Modules
//!
//! - [`config`] -- [`PersistConfig`], its builder, and TOML-loadable [`PersistOptions`]
//! - [`codec`] -- per-subtree serialization, [`JsonCodec`] by default
//! - [`persistor`] -- the single-flight write loop
//! - [`loader`] -- reading stored subtrees back
//! - [`reconcile`] -- [`AutoRehydrate`] and the per-key merge policy
//! - [`purge`] -- removing persisted keys
//! - [`migrate`] -- versioned migrations of restored state
//! - [`bootstrap`] -- the startup sequence
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stow_persist::{persist_store, AutoRehydrate, PersistConfig};
//! use stow_state::{reducer, State, Store};
//! use stow_storage::InMemoryStorage;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PersistConfig::builder()
//!     .whitelist(["accounts", "settings"])
//!     .storage(Arc::new(InMemoryStorage::new()))
//!     .build()?;
//!
//! let store = Arc::new(Store::with_enhancer(
//!     reducer(|state, _| state.clone()),
//!     State::new(),
//!     Arc::new(AutoRehydrate::from_config(&config)),
//! ));
//!
//! let boot = persist_store(store, config, None);
//! let report = boot.restore.await?;
//! println!("restored {} keys", report.restored_keys.len());
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod codec;
pub mod config;
pub mod error;
pub mod loader;
pub mod migrate;
pub mod persistor;
pub mod purge;
pub mod reconcile;

#[cfg(test)]
mod test_support;

pub use bootstrap::{persist_store, Bootstrap, OnComplete, RestoreReport};
pub use codec::{Codec, JsonCodec};
pub use config::{
    PersistConfig, PersistConfigBuilder, PersistOptions, RetryOptions, RetryPolicy,
    DEFAULT_KEY_PREFIX,
};
pub use error::{ConfigError, PersistError, PersistResult};
pub use loader::load_stored_state;
pub use migrate::{MigrationFn, Migrations, DEFAULT_VERSION_KEY};
pub use persistor::{FlushOutcome, Persistor};
pub use purge::purge_stored_state;
pub use reconcile::{AutoRehydrate, DefaultReconciler, StateReconciler};
