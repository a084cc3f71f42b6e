//! The coalescing, single-flight write loop.
//!
//! A [`Persistor`] keeps storage eventually consistent with the persisted
//! keys of a [`StateSource`]. Each change notification schedules at most one
//! background flush; a running flush keeps sampling the source until it
//! sees the state it last wrote, so changes arriving mid-write are picked up
//! by the same flush rather than by a second concurrent one.
//!
//! Diffing is by subtree identity (`Arc::ptr_eq`), which relies on the
//! source keeping the same `Arc` for every subtree it did not change.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use stow_state::{same_subtree, State, StateSource, Subtree};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::PersistConfig;
use crate::error::{PersistError, PersistResult};
use crate::purge::purge_stored_state;

/// How a call to [`Persistor::flush`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Another flush was already running and will pick up the change.
    Coalesced,
    /// This call ran the loop until storage caught up.
    Completed { batches: usize, keys_written: usize },
}

/// Handle to one persistence engine. Clones share the same state.
#[derive(Clone)]
pub struct Persistor {
    inner: Arc<Inner>,
}

struct Inner {
    config: PersistConfig,
    source: Arc<dyn StateSource>,
    paused: AtomicBool,
    flush: Mutex<FlushState>,
}

struct FlushState {
    running: bool,
    /// Last state the loop attempted to write.
    last_written: State,
    /// Keys whose stored value may not match `last_written`.
    outstanding: BTreeSet<String>,
}

impl Persistor {
    pub fn new(source: Arc<dyn StateSource>, config: PersistConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                source,
                paused: AtomicBool::new(false),
                flush: Mutex::new(FlushState {
                    running: false,
                    last_written: State::new(),
                    outstanding: BTreeSet::new(),
                }),
            }),
        }
    }

    pub fn config(&self) -> &PersistConfig {
        &self.inner.config
    }

    /// Stop scheduling flushes. A flush already running is not interrupted.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
        debug!("persistor paused");
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        debug!("persistor resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn is_flushing(&self) -> bool {
        self.lock().running
    }

    /// Keys queued for writing or left over from a failed write.
    pub fn outstanding_keys(&self) -> Vec<String> {
        self.lock().outstanding.iter().cloned().collect()
    }

    /// Treat `state` as already written.
    ///
    /// Used after a restore so the restored values are not written straight
    /// back. `state` must be a value the source produced, such as the result
    /// of dispatching the restore. Outstanding keys are kept.
    pub fn reset_baseline(&self, state: State) {
        let mut flush = self.lock();
        flush.last_written = state;
        trace!(keys = flush.last_written.len(), "baseline reset");
    }

    /// Remove persisted keys: all under the prefix, or just `keys`.
    pub async fn purge(&self, keys: Option<&[String]>) -> PersistResult<()> {
        let config = &self.inner.config;
        purge_stored_state(config.storage(), config.key_prefix(), keys).await
    }

    /// Schedule a background flush in response to a state change.
    ///
    /// Returns `None` when paused or when a flush is already running (that
    /// flush will observe the change).
    pub fn notify_changed(&self) -> Option<JoinHandle<PersistResult<FlushOutcome>>> {
        if self.is_paused() {
            trace!("change ignored while paused");
            return None;
        }
        if self.lock().running {
            trace!("change coalesced into running flush");
            return None;
        }
        let persistor = self.clone();
        Some(tokio::spawn(async move { persistor.flush_with_retry().await }))
    }

    /// Forward every notification from `changes` to [`Self::notify_changed`].
    pub fn watch(&self, mut changes: watch::Receiver<u64>) -> JoinHandle<()> {
        let persistor = self.clone();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                persistor.notify_changed();
            }
            debug!("change channel closed, persistor listener stopped");
        })
    }

    /// Run the write loop until storage reflects the current state.
    ///
    /// Returns [`FlushOutcome::Coalesced`] immediately if a flush is already
    /// running. On a write failure the affected keys stay outstanding and
    /// are retried by the next flush.
    pub async fn flush(&self) -> PersistResult<FlushOutcome> {
        {
            let mut flush = self.lock();
            if flush.running {
                return Ok(FlushOutcome::Coalesced);
            }
            flush.running = true;
        }
        let mut guard = RunningGuard {
            inner: &self.inner,
            armed: true,
        };

        // Let the notifying caller return before any work happens.
        tokio::task::yield_now().await;

        let mut batches = 0;
        let mut keys_written = 0;
        loop {
            let pending = {
                let mut flush = self.lock();
                let snapshot = self.inner.source.snapshot();
                if snapshot.same(&flush.last_written) && flush.outstanding.is_empty() {
                    flush.running = false;
                    guard.armed = false;
                    break;
                }

                let changed: Vec<String> = self
                    .inner
                    .config
                    .persisted_keys()
                    .filter(|key| match (snapshot.get(key), flush.last_written.get(key)) {
                        (Some(now), Some(before)) => !same_subtree(now, before),
                        (Some(_), None) => true,
                        (None, _) => false,
                    })
                    .map(str::to_string)
                    .collect();
                flush.outstanding.extend(changed);
                flush.last_written = snapshot.clone();

                // Keys no longer in state have nothing to write.
                flush.outstanding.retain(|key| {
                    let present = snapshot.contains_key(key);
                    if !present {
                        debug!(key = %key, "outstanding key left the state, dropping it");
                    }
                    present
                });
                if flush.outstanding.is_empty() {
                    continue;
                }
                flush
                    .outstanding
                    .iter()
                    .filter_map(|key| Some((key.clone(), Arc::clone(snapshot.get(key)?))))
                    .collect::<Vec<_>>()
            };

            let keys: Vec<String> = pending.iter().map(|(key, _)| key.clone()).collect();
            if let Err(e) = self.write_batch(pending).await {
                warn!(keys = ?keys, error = %e, "failed to persist keys, will retry on next flush");
                return Err(e);
            }

            let mut flush = self.lock();
            for key in &keys {
                flush.outstanding.remove(key);
            }
            batches += 1;
            keys_written += keys.len();
            debug!(keys = ?keys, "batch persisted");
        }

        Ok(FlushOutcome::Completed {
            batches,
            keys_written,
        })
    }

    async fn flush_with_retry(&self) -> PersistResult<FlushOutcome> {
        let Some(policy) = self.inner.config.retry() else {
            return self.flush().await;
        };
        let mut attempt = 1;
        loop {
            match self.flush().await {
                Err(e) if attempt < policy.max_attempts => {
                    debug!(attempt, error = %e, delay = ?policy.delay, "retrying flush");
                    tokio::time::sleep(policy.delay).await;
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    /// Serialize `pending` and write it in one batch.
    async fn write_batch(&self, pending: Vec<(String, Subtree)>) -> PersistResult<()> {
        let config = &self.inner.config;
        let mut pairs = Vec::with_capacity(pending.len());
        for (key, subtree) in &pending {
            pairs.push((config.storage_key(key), config.codec().serialize(key, subtree)?));
            tokio::task::yield_now().await;
        }

        let write = config.storage().multi_set(&pairs);
        match config.write_timeout() {
            Some(timeout) => match tokio::time::timeout(timeout, write).await {
                Ok(result) => result.map_err(PersistError::from),
                Err(_) => Err(PersistError::WriteTimeout {
                    keys: pending.into_iter().map(|(key, _)| key).collect(),
                    timeout,
                }),
            },
            None => write.await.map_err(PersistError::from),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FlushState> {
        self.inner.flush.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Persistor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let flush = self.lock();
        f.debug_struct("Persistor")
            .field("paused", &self.is_paused())
            .field("running", &flush.running)
            .field("outstanding", &flush.outstanding)
            .finish()
    }
}

/// Clears the running flag if a flush ends early (error or cancellation).
struct RunningGuard<'a> {
    inner: &'a Inner,
    armed: bool,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner
                .flush
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .running = false;
        }
    }
}
