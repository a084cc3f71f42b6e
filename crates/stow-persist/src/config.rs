//! Persistence configuration.
//!
//! [`PersistOptions`] holds the data-only settings and can be loaded from
//! TOML. [`PersistConfig`] adds the live collaborators (storage, codec,
//! reconciler, migrations) and is validated once, synchronously, by
//! [`PersistConfigBuilder::build`].

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stow_storage::Storage;

use crate::codec::{Codec, JsonCodec};
use crate::error::ConfigError;
use crate::migrate::Migrations;
use crate::reconcile::StateReconciler;

/// Prefix that namespaces persisted keys in shared storage.
pub const DEFAULT_KEY_PREFIX: &str = "reduxPersist:";

/// Serializable persistence options.
///
/// ```toml
/// whitelist = ["accounts", "drafts", "settings"]
/// key_prefix = "reduxPersist:"
/// log = true
/// write_timeout_ms = 5000
///
/// [retry]
/// delay_ms = 1000
/// max_attempts = 3
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistOptions {
    /// Top-level keys that are persisted and restored.
    pub whitelist: Vec<String>,
    /// Keys excluded even if whitelisted.
    pub blacklist: Vec<String>,
    /// Overrides [`DEFAULT_KEY_PREFIX`].
    pub key_prefix: Option<String>,
    /// Emit diagnostic warnings for restore races and skipped merges.
    pub log: bool,
    /// Upper bound on a single batch write.
    pub write_timeout_ms: Option<u64>,
    /// Retry failed background flushes.
    pub retry: Option<RetryOptions>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryOptions {
    pub delay_ms: u64,
    pub max_attempts: u32,
}

impl PersistOptions {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }
}

/// How a failed background flush is retried.
///
/// `max_attempts` counts the first attempt, so `1` means no retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

/// Validated, immutable persistence configuration.
#[derive(Clone)]
pub struct PersistConfig {
    whitelist: BTreeSet<String>,
    blacklist: BTreeSet<String>,
    storage: Arc<dyn Storage>,
    codec: Arc<dyn Codec>,
    key_prefix: String,
    reconciler: Option<Arc<dyn StateReconciler>>,
    migrations: Option<Arc<Migrations>>,
    log: bool,
    write_timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
}

impl PersistConfig {
    pub fn builder() -> PersistConfigBuilder {
        PersistConfigBuilder::default()
    }

    /// Returns `true` if `key` is persisted: whitelisted and not blacklisted.
    pub fn passes(&self, key: &str) -> bool {
        self.whitelist.contains(key) && !self.blacklist.contains(key)
    }

    /// Keys eligible for persistence, sorted.
    pub fn persisted_keys(&self) -> impl Iterator<Item = &str> {
        self.whitelist
            .iter()
            .map(String::as_str)
            .filter(|key| !self.blacklist.contains(*key))
    }

    /// The string actually used against storage for state key `key`.
    pub fn storage_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    /// Inverse of [`Self::storage_key`]; `None` for keys outside the prefix.
    pub fn state_key<'a>(&self, storage_key: &'a str) -> Option<&'a str> {
        storage_key.strip_prefix(self.key_prefix.as_str())
    }

    pub fn whitelist(&self) -> &BTreeSet<String> {
        &self.whitelist
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn reconciler(&self) -> Option<&Arc<dyn StateReconciler>> {
        self.reconciler.as_ref()
    }

    pub fn migrations(&self) -> Option<&Arc<Migrations>> {
        self.migrations.as_ref()
    }

    pub fn log(&self) -> bool {
        self.log
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    pub fn retry(&self) -> Option<RetryPolicy> {
        self.retry
    }
}

impl std::fmt::Debug for PersistConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistConfig")
            .field("whitelist", &self.whitelist)
            .field("blacklist", &self.blacklist)
            .field("key_prefix", &self.key_prefix)
            .field("custom_reconciler", &self.reconciler.is_some())
            .field("migrations", &self.migrations.is_some())
            .field("log", &self.log)
            .field("write_timeout", &self.write_timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Builder for [`PersistConfig`].
#[derive(Default)]
pub struct PersistConfigBuilder {
    whitelist: BTreeSet<String>,
    blacklist: BTreeSet<String>,
    storage: Option<Arc<dyn Storage>>,
    codec: Option<Arc<dyn Codec>>,
    key_prefix: Option<String>,
    reconciler: Option<Arc<dyn StateReconciler>>,
    migrations: Option<Arc<Migrations>>,
    log: bool,
    write_timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
}

impl PersistConfigBuilder {
    /// Apply every setting from `options`, replacing earlier values.
    pub fn options(mut self, options: PersistOptions) -> Self {
        self.whitelist = options.whitelist.into_iter().collect();
        self.blacklist = options.blacklist.into_iter().collect();
        self.key_prefix = options.key_prefix;
        self.log = options.log;
        self.write_timeout = options.write_timeout_ms.map(Duration::from_millis);
        self.retry = options.retry.map(|r| RetryPolicy {
            delay: Duration::from_millis(r.delay_ms),
            max_attempts: r.max_attempts,
        });
        self
    }

    pub fn whitelist<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.whitelist = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn blacklist<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.blacklist = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Defaults to [`JsonCodec`].
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Replace the default per-key merge policy.
    pub fn reconciler(mut self, reconciler: Arc<dyn StateReconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn migrations(mut self, migrations: Migrations) -> Self {
        self.migrations = Some(Arc::new(migrations));
        self
    }

    pub fn log(mut self, log: bool) -> Self {
        self.log = log;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<PersistConfig, ConfigError> {
        let storage = self.storage.ok_or(ConfigError::MissingStorage)?;
        if self.whitelist.is_empty() {
            return Err(ConfigError::EmptyWhitelist);
        }
        let key_prefix = self
            .key_prefix
            .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string());
        if key_prefix.is_empty() {
            return Err(ConfigError::EmptyKeyPrefix);
        }
        if matches!(self.retry, Some(policy) if policy.max_attempts == 0) {
            return Err(ConfigError::InvalidRetry);
        }

        Ok(PersistConfig {
            whitelist: self.whitelist,
            blacklist: self.blacklist,
            storage,
            codec: self.codec.unwrap_or_else(|| Arc::new(JsonCodec)),
            key_prefix,
            reconciler: self.reconciler,
            migrations: self.migrations,
            log: self.log,
            write_timeout: self.write_timeout,
            retry: self.retry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stow_storage::InMemoryStorage;

    fn storage() -> Arc<dyn Storage> {
        Arc::new(InMemoryStorage::new())
    }

    #[test]
    fn defaults() {
        let config = PersistConfig::builder()
            .whitelist(["a"])
            .storage(storage())
            .build()
            .unwrap();
        assert_eq!(config.key_prefix(), DEFAULT_KEY_PREFIX);
        assert!(!config.log());
        assert!(config.write_timeout().is_none());
        assert!(config.retry().is_none());
        assert_eq!(config.storage_key("a"), "reduxPersist:a");
    }

    #[test]
    fn missing_storage_fails_at_build() {
        let err = PersistConfig::builder().whitelist(["a"]).build().unwrap_err();
        assert!(matches!(err, ConfigError::MissingStorage));
    }

    #[test]
    fn empty_whitelist_fails_at_build() {
        let err = PersistConfig::builder().storage(storage()).build().unwrap_err();
        assert!(matches!(err, ConfigError::EmptyWhitelist));
    }

    #[test]
    fn empty_prefix_fails_at_build() {
        let err = PersistConfig::builder()
            .whitelist(["a"])
            .storage(storage())
            .key_prefix("")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyKeyPrefix));
    }

    #[test]
    fn zero_attempt_retry_is_rejected() {
        let err = PersistConfig::builder()
            .whitelist(["a"])
            .storage(storage())
            .retry(RetryPolicy {
                delay: Duration::from_millis(10),
                max_attempts: 0,
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRetry));
    }

    #[test]
    fn blacklist_overrides_whitelist() {
        let config = PersistConfig::builder()
            .whitelist(["a", "b"])
            .blacklist(["b"])
            .storage(storage())
            .build()
            .unwrap();
        assert!(config.passes("a"));
        assert!(!config.passes("b"));
        assert!(!config.passes("c"));
        assert_eq!(config.persisted_keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn state_key_strips_prefix() {
        let config = PersistConfig::builder()
            .whitelist(["a"])
            .storage(storage())
            .key_prefix("app:")
            .build()
            .unwrap();
        assert_eq!(config.state_key("app:drafts"), Some("drafts"));
        assert_eq!(config.state_key("other:drafts"), None);
    }

    #[test]
    fn options_from_toml() {
        let options = PersistOptions::from_toml_str(
            r#"
            whitelist = ["accounts", "settings"]
            key_prefix = "app:"
            log = true
            write_timeout_ms = 250

            [retry]
            delay_ms = 100
            max_attempts = 3
            "#,
        )
        .unwrap();

        let config = PersistConfig::builder()
            .options(options)
            .storage(storage())
            .build()
            .unwrap();
        assert!(config.passes("accounts"));
        assert_eq!(config.key_prefix(), "app:");
        assert!(config.log());
        assert_eq!(config.write_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(
            config.retry(),
            Some(RetryPolicy {
                delay: Duration::from_millis(100),
                max_attempts: 3
            })
        );
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = PersistOptions::from_toml_str("whitelist = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
