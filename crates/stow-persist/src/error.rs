use std::time::Duration;

use stow_storage::StorageError;
use thiserror::Error;

/// Configuration mistakes, reported synchronously at setup time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no storage backend configured")]
    MissingStorage,

    #[error("whitelist is empty: nothing would be persisted")]
    EmptyWhitelist,

    #[error("key prefix must not be empty")]
    EmptyKeyPrefix,

    #[error("retry policy needs at least one attempt")]
    InvalidRetry,

    #[error("invalid options: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot read options file: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("codec error for key {key}: {reason}")]
    Codec { key: String, reason: String },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage write for keys {keys:?} timed out after {timeout:?}")]
    WriteTimeout { keys: Vec<String>, timeout: Duration },

    #[error("failed to purge keys {keys:?}")]
    PurgeFailed { keys: Vec<String> },
}

/// Result alias for persistence operations.
pub type PersistResult<T> = Result<T, PersistError>;
