//! # Initialization
//!
//! Controller start-up and shutdown: rustls setup, tracing, metrics, the
//! HTTP server, the Kubernetes client, watches and workers.

use crate::broker::{BrokerConnector, NatsConnector};
use crate::config::ControllerConfig;
use crate::constants::{CONSUMER_QUEUE_NAME, STREAM_QUEUE_NAME};
use crate::controller::queue::RetryQueue;
use crate::controller::reconciler::{ConsumerSyncer, Context, StreamSyncer};
use crate::controller::secrets::KubeSecretSource;
use crate::controller::server::{start_server, ServerState};
use crate::controller::store::KubeStore;
use crate::crd::{Consumer, Stream};
use crate::observability;
use crate::runtime::error_policy::{ErrorSink, TracingSink};
use crate::runtime::watch_loop::{watch_consumers, watch_streams, WatchSettings};
use crate::runtime::worker::{run_worker, Processor, SyncProcessor};
use anyhow::{Context as _, Result};
use kube::{Api, Client};
use kube_runtime::reflector::{self, store::Writer, Store};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Everything the controller needs once start-up has succeeded
pub struct Runtime {
    pub config: ControllerConfig,
    pub client: Client,
    pub server_state: Arc<ServerState>,
    pub stream_queue: RetryQueue,
    pub consumer_queue: RetryQueue,
    stream_cache: (Store<Stream>, Writer<Stream>),
    consumer_cache: (Store<Consumer>, Writer<Consumer>),
    ctx: Arc<Context>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("stream_queue", &self.stream_queue)
            .field("consumer_queue", &self.consumer_queue)
            .finish_non_exhaustive()
    }
}

/// Install the subscriber; `RUST_LOG` overrides the default filter
pub fn init_tracing() {
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jetstream_controller=info".into()),
        )
        .try_init()
    {
        eprintln!("Tracing subscriber already initialized: {e}");
    }
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - Reflector caches, stores and queues
pub async fn initialize(config: ControllerConfig) -> Result<Runtime> {
    // Must happen before any TLS connection is made
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }

    init_tracing();

    info!("Starting JetStream Controller");
    info!(
        "Build info: timestamp={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let server_port = config.metrics_port;
    let server = Arc::clone(&server_state);
    tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server).await {
            error!("HTTP server error: {}", e);
        }
    });

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let stream_cache = reflector::store::<Stream>();
    let consumer_cache = reflector::store::<Consumer>();

    let ctx = Arc::new(Context {
        streams: Arc::new(KubeStore::new(client.clone(), stream_cache.0.clone())),
        consumers: Arc::new(KubeStore::new(client.clone(), consumer_cache.0.clone())),
        secrets: Arc::new(KubeSecretSource::new(client.clone())),
        default_servers: config.nats_servers.clone(),
        broker_timeout: config.broker_timeout_duration(),
        condition_policy: config.condition_policy,
    });

    let new_queue = |name: &str| {
        RetryQueue::new(
            name,
            config.max_queue_retries,
            config.backoff_base_duration(),
            config.backoff_max_duration(),
        )
    };
    let stream_queue = new_queue(STREAM_QUEUE_NAME);
    let consumer_queue = new_queue(CONSUMER_QUEUE_NAME);

    match &config.watch_namespace {
        Some(namespace) => info!("Watching namespace {}", namespace),
        None => info!("Watching all namespaces"),
    }

    Ok(Runtime {
        config,
        client,
        server_state,
        stream_queue,
        consumer_queue,
        stream_cache,
        consumer_cache,
        ctx,
    })
}

impl Runtime {
    fn api<K: crate::crd::ManagedResource>(&self) -> Api<K> {
        match &self.config.watch_namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }

    /// Run watches and workers until Ctrl-C / SIGTERM
    ///
    /// On shutdown the server is marked not ready, the queues stop handing
    /// out keys and every worker finishes its current key before returning.
    pub async fn run(self) -> Result<()> {
        let settings = WatchSettings {
            backoff_start_ms: self.config.backoff_base_ms,
            backoff_max_ms: self.config.backoff_max_ms,
            restart_delay: self.config.watch_restart_delay_duration(),
        };
        let stream_api = self.api::<Stream>();
        let consumer_api = self.api::<Consumer>();
        let Runtime {
            config,
            server_state,
            stream_queue,
            consumer_queue,
            stream_cache: (stream_reader, stream_writer),
            consumer_cache: (consumer_reader, consumer_writer),
            ctx,
            ..
        } = self;

        let watches = [
            tokio::spawn(watch_streams(
                stream_api,
                stream_writer,
                settings,
                stream_queue.clone(),
                consumer_queue.clone(),
                consumer_reader.clone(),
            )),
            tokio::spawn(watch_consumers(
                consumer_api,
                consumer_writer,
                settings,
                consumer_queue.clone(),
            )),
        ];

        stream_reader
            .wait_until_ready()
            .await
            .context("Stream cache was dropped before it synced")?;
        consumer_reader
            .wait_until_ready()
            .await
            .context("Consumer cache was dropped before it synced")?;
        info!("Caches synced, starting {} workers per kind", config.workers);

        let connector: Arc<dyn BrokerConnector> =
            Arc::new(NatsConnector::new(config.broker_timeout_duration()));
        let sink: Arc<dyn ErrorSink> = Arc::new(TracingSink);
        let stream_processor: Arc<dyn Processor> =
            Arc::new(SyncProcessor::new(StreamSyncer, Arc::clone(&ctx)));
        let consumer_processor: Arc<dyn Processor> =
            Arc::new(SyncProcessor::new(ConsumerSyncer, Arc::clone(&ctx)));

        let mut workers: Vec<JoinHandle<()>> = Vec::new();
        for (queue, processor) in [
            (&stream_queue, &stream_processor),
            (&consumer_queue, &consumer_processor),
        ] {
            for id in 0..config.workers {
                workers.push(tokio::spawn(run_worker(
                    id,
                    queue.clone(),
                    Arc::clone(&connector),
                    Arc::clone(&sink),
                    Arc::clone(processor),
                )));
            }
        }

        server_state.set_ready(true);
        info!("Controller ready");

        shutdown_signal().await?;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");

        server_state.set_ready(false);
        stream_queue.shutdown();
        consumer_queue.shutdown();
        for watch in &watches {
            watch.abort();
        }

        info!("Waiting for in-flight reconciliations to complete...");
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Worker task failed: {}", e);
            }
        }

        info!("Controller stopped gracefully");
        Ok(())
    }
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    Ok(())
}
