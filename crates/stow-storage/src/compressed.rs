//! Transparent zstd compression over any [`Storage`] backend.
//!
//! Compressed values look like `z|zstd hex|DATA`: the header names the
//! transforms applied, in order, to produce DATA. Anything not starting with
//! `z` is passed through untouched, which keeps values written before
//! compression was enabled readable. Valid JSON never starts with `z`, so
//! the two formats cannot collide as long as only JSON is written.

use async_trait::async_trait;
use tracing::error;

use crate::error::{StorageError, StorageResult};
use crate::traits::Storage;

/// Header prefixed to every value this wrapper writes.
pub const COMPRESSION_HEADER: &str = "z|zstd hex|";

const DEFAULT_LEVEL: i32 = 3;

/// A storage wrapper that compresses values on write and decompresses on read.
#[derive(Debug)]
pub struct CompressedStorage<S> {
    inner: S,
    level: i32,
}

impl<S: Storage> CompressedStorage<S> {
    /// Wrap `inner` using the default zstd level.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            level: DEFAULT_LEVEL,
        }
    }

    /// Use a specific zstd compression level.
    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Unwrap into the inner backend.
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn encode(&self, key: &str, value: &str) -> StorageResult<String> {
        if !is_plausibly_json(value) {
            return Err(StorageError::NotJson {
                key: key.to_string(),
            });
        }
        let compressed = zstd::encode_all(value.as_bytes(), self.level)
            .map_err(|e| StorageError::CompressionFailed(e.to_string()))?;
        Ok(format!("{COMPRESSION_HEADER}{}", hex::encode(compressed)))
    }
}

/// Cheap check that `value` could be a JSON encoding: looks at the first
/// character only.
pub fn is_plausibly_json(value: &str) -> bool {
    matches!(
        value.chars().next(),
        Some('n' | 't' | 'f' | '-' | '0'..='9' | '"' | '[' | '{')
    )
}

/// The `z|TRANSFORMS|` prefix of a compressed value, or the whole value if
/// it has no complete header.
fn header_of(raw: &str) -> &str {
    raw.find('|')
        .and_then(|first| raw[first + 1..].find('|').map(|second| first + second + 2))
        .map_or(raw, |end| &raw[..end])
}

fn decode(raw: String) -> StorageResult<String> {
    if !raw.starts_with('z') {
        return Ok(raw);
    }
    let header = header_of(&raw);
    if header != COMPRESSION_HEADER {
        error!(header, "no decompression available for stored value");
        return Err(StorageError::UnknownCompression {
            header: header.to_string(),
        });
    }
    let bytes = hex::decode(&raw[COMPRESSION_HEADER.len()..])
        .map_err(|e| StorageError::DecompressionFailed(e.to_string()))?;
    let data = zstd::decode_all(bytes.as_slice())
        .map_err(|e| StorageError::DecompressionFailed(e.to_string()))?;
    String::from_utf8(data).map_err(|e| StorageError::DecompressionFailed(e.to_string()))
}

#[async_trait]
impl<S: Storage> Storage for CompressedStorage<S> {
    async fn get_all_keys(&self) -> StorageResult<Vec<String>> {
        self.inner.get_all_keys().await
    }

    async fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        self.inner.get_item(key).await?.map(decode).transpose()
    }

    async fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        let encoded = self.encode(key, value)?;
        self.inner.set_item(key, &encoded).await
    }

    async fn remove_item(&self, key: &str) -> StorageResult<()> {
        self.inner.remove_item(key).await
    }

    async fn multi_set(&self, pairs: &[(String, String)]) -> StorageResult<()> {
        let encoded = pairs
            .iter()
            .map(|(key, value)| self.encode(key, value).map(|encoded| (key.clone(), encoded)))
            .collect::<StorageResult<Vec<_>>>()?;
        self.inner.multi_set(&encoded).await
    }

    async fn clear(&self) -> StorageResult<()> {
        self.inner.clear().await
    }
}
