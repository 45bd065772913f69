//! # Broker
//!
//! Administrative interface to the message broker.
//!
//! The reconciler only talks to the broker through [`BrokerConnector`] and
//! [`BrokerClient`]. Two implementations are provided:
//!
//! - [`NatsConnector`] - NATS JetStream through `async-nats`
//! - [`MemoryBroker`] - in-process broker used by tests and local runs

mod memory;
mod nats;
mod types;

pub use memory::MemoryBroker;
pub use nats::NatsConnector;
pub use types::{
    AckPolicy, ConsumerConfig, ConsumerInfo, DeliverPolicy, DiscardPolicy, ReplayPolicy,
    RetentionPolicy, StorageType, StreamConfig, StreamInfo, StreamState,
};

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// The stream or consumer does not exist on the broker
    #[error("{kind} {name:?} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("failed to connect to {servers}: {message}")]
    Connect { servers: String, message: String },

    #[error("broker request failed: {0}")]
    Request(String),

    /// A configuration could not be converted to or from the client's types
    #[error("invalid broker configuration: {0}")]
    Config(String),
}

impl BrokerError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, BrokerError::NotFound { .. })
    }

    /// Whether the missing entity is the stream itself
    #[must_use]
    pub fn is_stream_not_found(&self) -> bool {
        matches!(self, BrokerError::NotFound { kind: "stream", .. })
    }
}

/// Connection parameters for one reconcile pass
pub struct ConnectOptions<'a> {
    pub servers: &'a [String],
    /// Contents of a NATS credentials file
    pub credentials: Option<&'a [u8]>,
}

impl fmt::Debug for ConnectOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("servers", &self.servers)
            .field("credentials", &self.credentials.map(|_| "<redacted>"))
            .finish()
    }
}

/// Opens broker sessions
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(
        &self,
        options: &ConnectOptions<'_>,
    ) -> Result<Arc<dyn BrokerClient>, BrokerError>;
}

/// Stream and consumer administration on an open session
///
/// Every call goes to the broker; implementations must not answer from a cache.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn list_streams(&self) -> Result<Vec<String>, BrokerError>;
    async fn get_stream(&self, name: &str) -> Result<StreamInfo, BrokerError>;
    async fn add_stream(&self, config: &StreamConfig) -> Result<StreamInfo, BrokerError>;
    async fn update_stream(&self, config: &StreamConfig) -> Result<StreamInfo, BrokerError>;
    async fn delete_stream(&self, name: &str) -> Result<(), BrokerError>;

    async fn list_consumers(&self, stream: &str) -> Result<Vec<String>, BrokerError>;
    async fn get_consumer(&self, stream: &str, name: &str) -> Result<ConsumerInfo, BrokerError>;
    async fn add_consumer(
        &self,
        stream: &str,
        config: &ConsumerConfig,
    ) -> Result<ConsumerInfo, BrokerError>;
    async fn update_consumer(
        &self,
        stream: &str,
        config: &ConsumerConfig,
    ) -> Result<ConsumerInfo, BrokerError>;
    async fn delete_consumer(&self, stream: &str, name: &str) -> Result<(), BrokerError>;
}
