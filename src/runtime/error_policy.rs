//! # Error Policy
//!
//! Reporting of reconcile failures and handling of watch stream errors.
//!
//! The worker decides what happens to a failed key; this module only makes
//! the decision visible. Watch errors are classified so that expected
//! conditions (expired resource versions, a CRD not yet installed) are
//! logged quietly while authentication and throttling errors back off.

use crate::controller::reconciler::ReconcileError;
use crate::observability::metrics;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

/// What the worker did with a key after a failed pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Put back with backoff; `attempt` is the retry count after requeueing
    Requeued { attempt: u32 },
    /// Permanent failure, not retried
    Rejected,
    /// Dropped after `max_retries` failed attempts
    Exhausted { max_retries: u32 },
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Requeued { attempt } => write!(f, "requeued (retry {attempt})"),
            Disposition::Rejected => f.write_str("rejected"),
            Disposition::Exhausted { max_retries } => {
                write!(f, "dropped after {max_retries} retries")
            }
        }
    }
}

/// Destination for reconcile failures
pub trait ErrorSink: Send + Sync + fmt::Debug {
    fn report(&self, queue: &str, key: &str, error: &ReconcileError, disposition: Disposition);
}

/// Logs every failure inside an error span
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, queue: &str, key: &str, error: &ReconcileError, disposition: Disposition) {
        let error_span = tracing::span!(
            tracing::Level::ERROR,
            "controller.reconcile_error",
            queue = queue,
            resource.key = key,
            reason = error.reason(),
        );
        let _error_guard = error_span.enter();

        match disposition {
            Disposition::Requeued { .. }
                if matches!(error, ReconcileError::ParentNotReady { .. }) =>
            {
                info!("Waiting on parent: {} ({})", error, disposition);
                metrics::increment_queue_requeues(queue);
            }
            Disposition::Requeued { .. } => {
                warn!("Reconcile of {} failed: {} ({})", key, error, disposition);
                metrics::increment_queue_requeues(queue);
            }
            Disposition::Rejected => {
                error!("Reconcile of {} failed permanently: {}", key, error);
                metrics::increment_queue_drops(queue);
            }
            Disposition::Exhausted { .. } => {
                error!("Giving up on {}: {} ({})", key, error, disposition);
                metrics::increment_queue_drops(queue);
            }
        }
    }
}

/// Discards every report
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ErrorSink for NoopSink {
    fn report(&self, _queue: &str, _key: &str, _error: &ReconcileError, _disposition: Disposition) {}
}

/// Broad class of a watch stream error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorClass {
    /// 401, RBAC revoked or token expired
    Unauthorized,
    /// 410, resource version too old; the watcher relists
    Expired,
    /// 429, API server throttling or storage reinitializing
    Throttled,
    /// 404, usually a CRD that is not installed yet
    NotFound,
    Other,
}

/// Classify a watch error from its debug rendering
///
/// Not-found is checked before 401 since a plain-text 404 body surfaces as a
/// deserialization error whose chain may mention other status codes.
#[must_use]
pub fn classify_watch_error(error_string: &str) -> WatchErrorClass {
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    if (error_string.contains("401") || error_string.contains("Unauthorized")) && !is_not_found {
        return WatchErrorClass::Unauthorized;
    }
    if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        return WatchErrorClass::Expired;
    }
    if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        return WatchErrorClass::Throttled;
    }
    if is_not_found {
        return WatchErrorClass::NotFound;
    }
    WatchErrorClass::Other
}

/// Log a watch stream error and sleep as its class requires
///
/// `backoff_ms` carries the throttling delay between calls; it doubles on
/// every 429 up to `max_backoff_ms` and is reset by the caller on success.
pub async fn handle_watch_stream_error(
    kind: &str,
    error_string: &str,
    backoff_ms: &AtomicU64,
    max_backoff_ms: u64,
    restart_delay: Duration,
) -> WatchErrorClass {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        resource.kind = kind,
        error = %error_string
    );
    metrics::increment_watch_errors(kind);

    let class = classify_watch_error(error_string);
    let pause = error_span.in_scope(|| match class {
        WatchErrorClass::Unauthorized => {
            error!(
                "Watch authentication failed (401 Unauthorized); check the controller ClusterRole, its binding and the ServiceAccount token"
            );
            warn!(
                "Waiting {}s before retrying watch (RBAC may need time to propagate)...",
                restart_delay.as_secs()
            );
            restart_delay
        }
        WatchErrorClass::Expired => {
            warn!("Watch resource version expired (410), watch will relist");
            Duration::ZERO
        }
        WatchErrorClass::Throttled => {
            let current = backoff_ms.load(Ordering::Relaxed);
            warn!(
                "API server throttling (429), backing off for {}ms...",
                current
            );
            backoff_ms.store(current.saturating_mul(2).min(max_backoff_ms), Ordering::Relaxed);
            Duration::from_millis(current)
        }
        WatchErrorClass::NotFound => {
            warn!(
                "{} resources not found (404); the CRD may not be installed. Error: {}",
                kind, error_string
            );
            restart_delay
        }
        WatchErrorClass::Other => {
            error!("Watch stream error: {}", error_string);
            restart_delay
        }
    });

    if !pause.is_zero() {
        tokio::time::sleep(pause).await;
    }
    class
}
