//! # Retry Queue
//!
//! Rate-limited, deduplicating work queue of `namespace/name` keys.
//!
//! Guarantees:
//! - a key is queued at most once, no matter how often it is enqueued
//! - a key is never handed to two workers at once; enqueueing a key that is
//!   being processed marks it dirty and it is queued again on [`RetryQueue::done`]
//! - retries are delayed by per-key exponential backoff on a timer task
//!
//! Watch tasks only call [`RetryQueue::enqueue`]; workers drive the rest.

use crate::controller::backoff::ExponentialFailureRateLimiter;
use crate::crd::ManagedResource;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

#[derive(Debug, Default)]
struct QueueState {
    /// Keys waiting for a worker, in arrival order
    queue: VecDeque<String>,
    /// Keys that need processing (queued, or re-enqueued while in flight)
    dirty: HashSet<String>,
    /// Keys currently held by a worker
    processing: HashSet<String>,
    shutting_down: bool,
}

#[derive(Debug)]
struct Inner {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
    limiter: ExponentialFailureRateLimiter,
    max_retries: u32,
}

/// Cloneable handle to a shared work queue
#[derive(Debug, Clone)]
pub struct RetryQueue {
    inner: Arc<Inner>,
}

impl RetryQueue {
    /// Create a queue
    ///
    /// # Arguments
    ///
    /// * `name` - Queue name, used in logs and as metric label
    /// * `max_retries` - Failures allowed before a key is dropped
    /// * `base` / `max` - Per-key backoff bounds
    #[must_use]
    pub fn new(name: &str, max_retries: u32, base: Duration, max: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                limiter: ExponentialFailureRateLimiter::new(base, max),
                max_retries,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.inner.max_retries
    }

    /// Add `key`; a no-op if it is already waiting or the queue is shut down
    pub fn enqueue(&self, key: impl Into<String>) {
        let key = key.into();
        let mut state = self.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            trace!(queue = %self.inner.name, key = %key, "Key in flight, marked dirty");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Wait for the next key
    ///
    /// Returns `None` once the queue is shut down.
    pub async fn dequeue(&self) -> Option<String> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent enqueue cannot be missed
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        // Pass the wakeup on so other idle workers pick up the rest
                        self.inner.notify.notify_one();
                    }
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Mark processing of `key` complete, queueing it again if it went dirty
    pub fn done(&self, key: &str) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.to_string());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Clear the retry counter of `key`
    pub fn forget(&self, key: &str) {
        self.inner.limiter.forget(key);
    }

    /// Permanently give up on `key`
    pub fn drop_key(&self, key: &str) {
        self.inner.limiter.forget(key);
    }

    /// Re-add `key` after its backoff delay
    pub fn requeue(&self, key: &str) {
        let delay = self.inner.limiter.when(key);
        if self.is_shutting_down() {
            return;
        }
        trace!(
            queue = %self.inner.name,
            key = %key,
            delay_ms = delay.as_millis(),
            "Requeueing key after backoff"
        );
        let queue = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(key);
        });
    }

    #[must_use]
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.inner.limiter.num_requeues(key)
    }

    /// Number of keys waiting for a worker (excludes in-flight and delayed keys)
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out keys and wake every waiting worker
    pub fn shutdown(&self) {
        self.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }
}

/// Enqueue the work queue key of `resource`
pub fn enqueue_work<K: ManagedResource>(queue: &RetryQueue, resource: &K) {
    queue.enqueue(resource.key());
}

/// Split a `namespace/name` key
///
/// Returns `None` unless the key has exactly one `/` with non-empty parts.
#[must_use]
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    let (namespace, name) = key.split_once('/')?;
    if namespace.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some((namespace, name))
}
