//! # Watch Loop
//!
//! Watches `Stream` and `Consumer` resources, keeps the reflector caches
//! current and turns every touched object into a work queue key.
//!
//! A touched `Stream` also enqueues the `Consumer`s that reference it, so a
//! consumer waiting on its parent is retried as soon as the parent changes.

use crate::controller::queue::{enqueue_work, RetryQueue};
use crate::crd::{Consumer, ManagedResource, Stream};
use crate::runtime::error_policy::handle_watch_stream_error;
use futures::{pin_mut, StreamExt};
use kube::api::Api;
use kube::ResourceExt;
use kube_runtime::reflector::{store::Writer, Store};
use kube_runtime::{reflector, watcher, WatchStreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

/// Backoff and restart settings shared by the watches
#[derive(Debug, Clone, Copy)]
pub struct WatchSettings {
    /// Initial delay after a throttling error (milliseconds)
    pub backoff_start_ms: u64,
    /// Ceiling of the throttling delay (milliseconds)
    pub backoff_max_ms: u64,
    /// Pause after authentication and unknown errors
    pub restart_delay: Duration,
}

/// Keys of the consumers in `stream`'s namespace that name it as their stream
#[must_use]
pub fn dependent_consumers(stream: &Stream, consumers: &[Arc<Consumer>]) -> Vec<String> {
    let namespace = stream.namespace();
    let name = stream.broker_name();
    consumers
        .iter()
        .filter(|consumer| consumer.namespace() == namespace && consumer.spec.stream_name == name)
        .map(|consumer| consumer.key())
        .collect()
}

/// Run one watch until its stream ends
///
/// `on_object` is called for every applied or deleted object after the
/// reflector cache has been updated.
pub async fn run_watch<K, F>(api: Api<K>, writer: Writer<K>, settings: WatchSettings, mut on_object: F)
where
    K: ManagedResource,
    F: FnMut(&K) + Send,
{
    let kind = K::KIND_LABEL;
    let watch_span = tracing::span!(tracing::Level::INFO, "controller.watch", resource.kind = kind);

    async move {
        info!("Starting {} watch", kind);

        let backoff_ms = AtomicU64::new(settings.backoff_start_ms);
        let events = reflector(writer, watcher(api, watcher::Config::default())).touched_objects();
        pin_mut!(events);

        while let Some(event) = events.next().await {
            match event {
                Ok(object) => {
                    backoff_ms.store(settings.backoff_start_ms, Ordering::Relaxed);
                    debug!("Observed {} {}", kind, object.key());
                    on_object(&object);
                }
                Err(e) => {
                    handle_watch_stream_error(
                        kind,
                        &format!("{e:?}"),
                        &backoff_ms,
                        settings.backoff_max_ms,
                        settings.restart_delay,
                    )
                    .await;
                }
            }
        }
        warn!("{} watch stream ended", kind);
    }
    .instrument(watch_span)
    .await;
}

/// Watch `Stream`s, enqueueing each stream and its dependent consumers
pub async fn watch_streams(
    api: Api<Stream>,
    writer: Writer<Stream>,
    settings: WatchSettings,
    streams: RetryQueue,
    consumers: RetryQueue,
    consumer_cache: Store<Consumer>,
) {
    run_watch(api, writer, settings, move |stream: &Stream| {
        enqueue_work(&streams, stream);
        for key in dependent_consumers(stream, &consumer_cache.state()) {
            consumers.enqueue(key);
        }
    })
    .await;
}

/// Watch `Consumer`s
pub async fn watch_consumers(
    api: Api<Consumer>,
    writer: Writer<Consumer>,
    settings: WatchSettings,
    consumers: RetryQueue,
) {
    run_watch(api, writer, settings, move |consumer: &Consumer| {
        enqueue_work(&consumers, consumer);
    })
    .await;
}
