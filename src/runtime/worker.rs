//! # Worker
//!
//! Pulls keys off a [`RetryQueue`] and runs them through a [`Processor`].
//!
//! This is the only place that decides whether a failed key is retried,
//! rejected or dropped:
//!
//! - malformed key: forgotten, never retried
//! - `Ok(Done)`: retry counter cleared
//! - `Ok(Requeue)`: retry counter cleared, key queued again without delay
//! - permanent error: forgotten and reported
//! - transient error below `max_retries`: requeued with backoff
//! - transient error at `max_retries`: dropped, then surfaced on the resource

use crate::broker::BrokerConnector;
use crate::controller::queue::{split_key, RetryQueue};
use crate::controller::reconciler::{self, Action, Context, ReconcileError, Syncer};
use crate::observability::metrics;
use crate::runtime::error_policy::{Disposition, ErrorSink};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reconciles one kind of resource by key
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(
        &self,
        namespace: &str,
        name: &str,
        connector: &dyn BrokerConnector,
    ) -> Result<Action, ReconcileError>;

    /// Record on the resource that its key was dropped
    async fn surface_exhausted(
        &self,
        namespace: &str,
        name: &str,
        max_retries: u32,
        error: &ReconcileError,
    );
}

/// [`Processor`] backed by a [`Syncer`]
pub struct SyncProcessor<S> {
    syncer: S,
    ctx: Arc<Context>,
}

impl<S> SyncProcessor<S> {
    pub fn new(syncer: S, ctx: Arc<Context>) -> Self {
        Self { syncer, ctx }
    }
}

impl<S> fmt::Debug for SyncProcessor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncProcessor")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S: Syncer> Processor for SyncProcessor<S> {
    async fn process(
        &self,
        namespace: &str,
        name: &str,
        connector: &dyn BrokerConnector,
    ) -> Result<Action, ReconcileError> {
        reconciler::process(&self.syncer, &self.ctx, connector, namespace, name).await
    }

    async fn surface_exhausted(
        &self,
        namespace: &str,
        name: &str,
        max_retries: u32,
        error: &ReconcileError,
    ) {
        if let Err(e) = reconciler::surface_exhausted(
            &self.syncer,
            &self.ctx,
            namespace,
            name,
            max_retries,
            error,
        )
        .await
        {
            warn!(
                "Failed to mark {}/{} as RetriesExhausted: {}",
                namespace, name, e
            );
        }
    }
}

/// What happened to the key handled by one [`process_queue_next`] call
#[derive(Debug)]
pub enum QueueOutcome {
    /// The queue is shutting down, no key was handled
    Shutdown,
    Processed(Action),
    /// Failed and scheduled for another attempt
    Requeued,
    /// Failed permanently
    Rejected,
    /// Failed too often and dropped
    Exhausted {
        namespace: String,
        name: String,
        error: ReconcileError,
    },
    /// Not a `namespace/name` key
    Malformed,
}

/// Handle the next key of `queue`
///
/// Waits for a key unless the queue is shutting down.
pub async fn process_queue_next(
    queue: &RetryQueue,
    connector: &dyn BrokerConnector,
    sink: &dyn ErrorSink,
    processor: &dyn Processor,
) -> QueueOutcome {
    let Some(key) = queue.dequeue().await else {
        return QueueOutcome::Shutdown;
    };
    let outcome = handle_key(queue, &key, connector, sink, processor).await;
    queue.done(&key);
    outcome
}

async fn handle_key(
    queue: &RetryQueue,
    key: &str,
    connector: &dyn BrokerConnector,
    sink: &dyn ErrorSink,
    processor: &dyn Processor,
) -> QueueOutcome {
    let Some((namespace, name)) = split_key(key) else {
        warn!(queue = %queue.name(), "Dropping malformed key {:?}", key);
        queue.forget(key);
        queue.drop_key(key);
        return QueueOutcome::Malformed;
    };

    match processor.process(namespace, name, connector).await {
        Ok(Action::Done) => {
            queue.forget(key);
            QueueOutcome::Processed(Action::Done)
        }
        Ok(Action::Requeue) => {
            queue.forget(key);
            queue.enqueue(key);
            QueueOutcome::Processed(Action::Requeue)
        }
        Err(error) if !error.is_retriable() => {
            queue.forget(key);
            queue.drop_key(key);
            sink.report(queue.name(), key, &error, Disposition::Rejected);
            QueueOutcome::Rejected
        }
        Err(error) if queue.num_requeues(key) < queue.max_retries() => {
            queue.requeue(key);
            let attempt = queue.num_requeues(key);
            sink.report(queue.name(), key, &error, Disposition::Requeued { attempt });
            QueueOutcome::Requeued
        }
        Err(error) => {
            queue.drop_key(key);
            sink.report(
                queue.name(),
                key,
                &error,
                Disposition::Exhausted {
                    max_retries: queue.max_retries(),
                },
            );
            QueueOutcome::Exhausted {
                namespace: namespace.to_string(),
                name: name.to_string(),
                error,
            }
        }
    }
}

/// Process keys until the queue shuts down
///
/// The key being processed when shutdown starts is finished first.
pub async fn run_worker(
    id: usize,
    queue: RetryQueue,
    connector: Arc<dyn BrokerConnector>,
    sink: Arc<dyn ErrorSink>,
    processor: Arc<dyn Processor>,
) {
    debug!(queue = %queue.name(), worker = id, "Worker started");
    loop {
        let outcome =
            process_queue_next(&queue, connector.as_ref(), sink.as_ref(), processor.as_ref())
                .await;
        metrics::set_queue_depth(queue.name(), queue.len());
        match outcome {
            QueueOutcome::Shutdown => break,
            QueueOutcome::Exhausted {
                namespace,
                name,
                error,
            } => {
                processor
                    .surface_exhausted(&namespace, &name, queue.max_retries(), &error)
                    .await;
            }
            QueueOutcome::Processed(_)
            | QueueOutcome::Requeued
            | QueueOutcome::Rejected
            | QueueOutcome::Malformed => {}
        }
    }
    info!(queue = %queue.name(), worker = id, "Worker stopped");
}
