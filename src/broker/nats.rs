//! # NATS JetStream Client
//!
//! [`BrokerConnector`] backed by `async-nats`.
//!
//! Configurations are converted to and from `async-nats` types through JSON:
//! both sides use the JetStream administrative API field names, which keeps
//! the controller's own types independent of the client crate's layout.

use crate::broker::{
    BrokerClient, BrokerConnector, BrokerError, ConnectOptions, ConsumerConfig, ConsumerInfo,
    StreamConfig, StreamInfo, StreamState,
};
use crate::constants::CONNECTION_NAME;
use async_nats::jetstream::context::{
    ConsumerInfoError, ConsumerInfoErrorKind, CreateStreamError, CreateStreamErrorKind,
    GetStreamError, GetStreamErrorKind,
};
use async_nats::jetstream::stream::{ConsumerError, ConsumerErrorKind};
use async_nats::jetstream::{self, consumer, stream, ErrorCode};
use async_trait::async_trait;
use futures::TryStreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Opens a fresh NATS connection per reconcile pass
#[derive(Debug, Clone)]
pub struct NatsConnector {
    connect_timeout: Duration,
}

impl NatsConnector {
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl BrokerConnector for NatsConnector {
    async fn connect(
        &self,
        options: &ConnectOptions<'_>,
    ) -> Result<Arc<dyn BrokerClient>, BrokerError> {
        let servers = options.servers.join(",");
        let connect_error = |message: String| BrokerError::Connect {
            servers: servers.clone(),
            message,
        };

        let mut nats_options = async_nats::ConnectOptions::new()
            .name(CONNECTION_NAME)
            .connection_timeout(self.connect_timeout);
        if let Some(credentials) = options.credentials {
            let credentials = std::str::from_utf8(credentials)
                .map_err(|e| connect_error(format!("credentials are not valid UTF-8: {e}")))?;
            nats_options = nats_options
                .credentials(credentials)
                .map_err(|e| connect_error(format!("invalid credentials: {e}")))?;
        }

        let client = nats_options
            .connect(servers.as_str())
            .await
            .map_err(|e| connect_error(e.to_string()))?;
        debug!("Connected to NATS at {}", servers);

        let session: Arc<dyn BrokerClient> = Arc::new(NatsClient {
            context: jetstream::new(client),
        });
        Ok(session)
    }
}

#[derive(Debug)]
struct NatsClient {
    context: jetstream::Context,
}

impl NatsClient {
    async fn stream(&self, name: &str) -> Result<stream::Stream, BrokerError> {
        self.context
            .get_stream(name)
            .await
            .map_err(|e| classify(&e, name, None))
    }
}

/// Which JetStream entity an API error reports as missing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Missing {
    Stream,
    Consumer,
}

fn missing_from_code(error: &jetstream::Error) -> Option<Missing> {
    match error.error_code() {
        ErrorCode::STREAM_NOT_FOUND => Some(Missing::Stream),
        ErrorCode::CONSUMER_NOT_FOUND => Some(Missing::Consumer),
        _ => None,
    }
}

/// Client errors that may carry a JetStream "not found" code
trait MissingEntity: Display {
    fn missing(&self) -> Option<Missing>;
}

impl MissingEntity for GetStreamError {
    fn missing(&self) -> Option<Missing> {
        match self.kind() {
            GetStreamErrorKind::JetStream(e) => missing_from_code(&e),
            _ => None,
        }
    }
}

impl MissingEntity for CreateStreamError {
    fn missing(&self) -> Option<Missing> {
        match self.kind() {
            CreateStreamErrorKind::NotFound => Some(Missing::Stream),
            CreateStreamErrorKind::JetStream(e) => missing_from_code(&e),
            _ => None,
        }
    }
}

impl MissingEntity for ConsumerInfoError {
    fn missing(&self) -> Option<Missing> {
        match self.kind() {
            ConsumerInfoErrorKind::NotFound => Some(Missing::Consumer),
            ConsumerInfoErrorKind::StreamNotFound => Some(Missing::Stream),
            ConsumerInfoErrorKind::JetStream(e) => missing_from_code(&e),
            _ => None,
        }
    }
}

impl MissingEntity for ConsumerError {
    fn missing(&self) -> Option<Missing> {
        match self.kind() {
            ConsumerErrorKind::JetStream(e) => missing_from_code(&e),
            _ => None,
        }
    }
}

/// Map a client error onto [`BrokerError`] by its JetStream error code
///
/// A missing stream is reported against `stream` even when a consumer call
/// failed, so callers can tell the two apart.
fn classify(error: &impl MissingEntity, stream: &str, consumer: Option<&str>) -> BrokerError {
    match error.missing() {
        Some(Missing::Stream) => BrokerError::NotFound {
            kind: "stream",
            name: stream.to_string(),
        },
        Some(Missing::Consumer) => BrokerError::NotFound {
            kind: "consumer",
            name: consumer.unwrap_or(stream).to_string(),
        },
        None => BrokerError::Request(error.to_string()),
    }
}

fn convert<T: Serialize, U: DeserializeOwned>(value: &T) -> Result<U, BrokerError> {
    serde_json::to_value(value)
        .and_then(serde_json::from_value)
        .map_err(|e| BrokerError::Config(e.to_string()))
}

fn stream_info(info: &stream::Info) -> Result<StreamInfo, BrokerError> {
    Ok(StreamInfo {
        config: convert(&info.config)?,
        state: StreamState {
            messages: info.state.messages,
            bytes: info.state.bytes,
            first_seq: info.state.first_sequence,
            last_seq: info.state.last_sequence,
            consumer_count: info.state.consumer_count as u64,
        },
    })
}

fn consumer_info(info: &consumer::Info) -> Result<ConsumerInfo, BrokerError> {
    Ok(ConsumerInfo {
        stream_name: info.stream_name.clone(),
        name: info.name.clone(),
        config: convert(&info.config)?,
        delivered_stream_seq: info.delivered.stream_sequence,
        num_pending: info.num_pending,
    })
}

#[async_trait]
impl BrokerClient for NatsClient {
    async fn list_streams(&self) -> Result<Vec<String>, BrokerError> {
        self.context
            .stream_names()
            .try_collect()
            .await
            .map_err(|e| BrokerError::Request(e.to_string()))
    }

    async fn get_stream(&self, name: &str) -> Result<StreamInfo, BrokerError> {
        let stream = self.stream(name).await?;
        stream_info(stream.cached_info())
    }

    async fn add_stream(&self, config: &StreamConfig) -> Result<StreamInfo, BrokerError> {
        let nats_config: stream::Config = convert(config)?;
        let stream = self
            .context
            .create_stream(nats_config)
            .await
            .map_err(|e| classify(&e, &config.name, None))?;
        stream_info(stream.cached_info())
    }

    async fn update_stream(&self, config: &StreamConfig) -> Result<StreamInfo, BrokerError> {
        let nats_config: stream::Config = convert(config)?;
        let info = self
            .context
            .update_stream(&nats_config)
            .await
            .map_err(|e| classify(&e, &config.name, None))?;
        stream_info(&info)
    }

    async fn delete_stream(&self, name: &str) -> Result<(), BrokerError> {
        self.context
            .delete_stream(name)
            .await
            .map(|_| ())
            .map_err(|e| classify(&e, name, None))
    }

    async fn list_consumers(&self, stream: &str) -> Result<Vec<String>, BrokerError> {
        self.stream(stream)
            .await?
            .consumer_names()
            .try_collect()
            .await
            .map_err(|e| BrokerError::Request(e.to_string()))
    }

    async fn get_consumer(&self, stream: &str, name: &str) -> Result<ConsumerInfo, BrokerError> {
        let info = self
            .stream(stream)
            .await?
            .consumer_info(name)
            .await
            .map_err(|e| classify(&e, stream, Some(name)))?;
        consumer_info(&info)
    }

    async fn add_consumer(
        &self,
        stream: &str,
        config: &ConsumerConfig,
    ) -> Result<ConsumerInfo, BrokerError> {
        let name = config.durable_name.clone().unwrap_or_default();
        let nats_config: consumer::Config = convert(config)?;
        let consumer = self
            .stream(stream)
            .await?
            .create_consumer(nats_config)
            .await
            .map_err(|e| classify(&e, stream, Some(&name)))?;
        consumer_info(consumer.cached_info())
    }

    /// Durable consumer creation is create-or-update on the server
    async fn update_consumer(
        &self,
        stream: &str,
        config: &ConsumerConfig,
    ) -> Result<ConsumerInfo, BrokerError> {
        self.add_consumer(stream, config).await
    }

    async fn delete_consumer(&self, stream: &str, name: &str) -> Result<(), BrokerError> {
        self.stream(stream)
            .await?
            .delete_consumer(name)
            .await
            .map(|_| ())
            .map_err(|e| classify(&e, stream, Some(name)))
    }
}
