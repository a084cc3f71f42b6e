/// Errors from storage port operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error from the underlying storage medium.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backend rejected or failed the operation.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored value carries a compression header this build cannot read.
    #[error("no decompression available for format {header:?}")]
    UnknownCompression { header: String },

    /// A value handed to a compressing backend was not JSON-encoded.
    #[error("value for {key} is not JSON-encoded")]
    NotJson { key: String },

    /// Compressing a value failed.
    #[error("compression failed: {0}")]
    CompressionFailed(String),

    /// A compressed value could not be restored.
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
