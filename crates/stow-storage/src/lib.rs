//! Asynchronous key-value storage for Stow.
//!
//! This crate defines the storage port that the persistence layer writes
//! state subtrees through. Values are opaque strings; the port never
//! interprets them. There is no transactional guarantee across keys unless
//! a backend documents one.
//!
//! # Storage Backends
//!
//! All backends implement the [`Storage`] trait:
//!
//! - [`InMemoryStorage`] -- `BTreeMap`-based store for tests and embedding
//! - [`FileStorage`] -- single JSON file, every operation applied atomically
//! - [`CompressedStorage`] -- zstd wrapper around any other backend
//!
//! # Design Rules
//!
//! 1. Keys and values are plain strings; the port never parses values.
//! 2. `multi_set` is a batch, not a transaction, unless the backend says so.
//! 3. Removing a missing key is not an error.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod compressed;
pub mod error;
pub mod file;
pub mod memory;
pub mod traits;

pub use compressed::{CompressedStorage, COMPRESSION_HEADER};
pub use error::{StorageError, StorageResult};
pub use file::FileStorage;
pub use memory::InMemoryStorage;
pub use traits::Storage;
