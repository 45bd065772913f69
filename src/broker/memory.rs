//! # In-Memory Broker
//!
//! A broker that keeps streams and consumers in process memory.
//!
//! Every call is recorded so tests can assert on exactly which administrative
//! operations a reconcile pass issued. Connections can be refused with
//! [`MemoryBroker::set_available`] to exercise failure paths.

use crate::broker::{
    BrokerClient, BrokerConnector, BrokerError, ConnectOptions, ConsumerConfig, ConsumerInfo,
    StreamConfig, StreamInfo, StreamState,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryStream {
    config: StreamConfig,
    consumers: BTreeMap<String, ConsumerConfig>,
}

#[derive(Debug)]
struct MemoryState {
    streams: BTreeMap<String, MemoryStream>,
    calls: Vec<String>,
    connects: usize,
    last_credentials: Option<usize>,
    available: bool,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            streams: BTreeMap::new(),
            calls: Vec::new(),
            connects: 0,
            last_credentials: None,
            available: true,
        }
    }
}

/// Shared in-process broker; clones see the same state
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // State stays consistent across panics: every mutation is a single insert/remove
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Refuse (`false`) or accept (`true`) new connections
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Administrative calls issued so far, e.g. `"add_stream ORDERS"`
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Number of successful connects
    #[must_use]
    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    /// Length of the credentials presented on the last connect, if any
    #[must_use]
    pub fn last_credentials_len(&self) -> Option<usize> {
        self.lock().last_credentials
    }

    #[must_use]
    pub fn stream_config(&self, name: &str) -> Option<StreamConfig> {
        self.lock().streams.get(name).map(|s| s.config.clone())
    }

    #[must_use]
    pub fn consumer_config(&self, stream: &str, name: &str) -> Option<ConsumerConfig> {
        self.lock()
            .streams
            .get(stream)
            .and_then(|s| s.consumers.get(name).cloned())
    }

    /// Create a stream directly, bypassing call recording
    pub fn insert_stream(&self, config: StreamConfig) {
        self.lock().streams.insert(
            config.name.clone(),
            MemoryStream {
                config,
                consumers: BTreeMap::new(),
            },
        );
    }

    fn record(state: &mut MemoryState, call: String) {
        state.calls.push(call);
    }
}

fn stream_not_found(name: &str) -> BrokerError {
    BrokerError::NotFound {
        kind: "stream",
        name: name.to_string(),
    }
}

fn consumer_not_found(name: &str) -> BrokerError {
    BrokerError::NotFound {
        kind: "consumer",
        name: name.to_string(),
    }
}

fn stream_info(stream: &MemoryStream) -> StreamInfo {
    StreamInfo {
        config: stream.config.clone(),
        state: StreamState {
            consumer_count: stream.consumers.len() as u64,
            ..StreamState::default()
        },
    }
}

fn consumer_info(stream: &str, name: &str, config: &ConsumerConfig) -> ConsumerInfo {
    ConsumerInfo {
        stream_name: stream.to_string(),
        name: name.to_string(),
        config: config.clone(),
        delivered_stream_seq: 0,
        num_pending: 0,
    }
}

fn consumer_name(config: &ConsumerConfig) -> Result<String, BrokerError> {
    config
        .durable_name
        .clone()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| BrokerError::Request("consumer requires a durable name".to_string()))
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    async fn connect(
        &self,
        options: &ConnectOptions<'_>,
    ) -> Result<Arc<dyn BrokerClient>, BrokerError> {
        let mut state = self.lock();
        if !state.available {
            return Err(BrokerError::Connect {
                servers: options.servers.join(","),
                message: "connection refused".to_string(),
            });
        }
        state.connects += 1;
        state.last_credentials = options.credentials.map(<[u8]>::len);
        drop(state);
        let client: Arc<dyn BrokerClient> = Arc::new(self.clone());
        Ok(client)
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    async fn list_streams(&self) -> Result<Vec<String>, BrokerError> {
        let mut state = self.lock();
        Self::record(&mut state, "list_streams".to_string());
        Ok(state.streams.keys().cloned().collect())
    }

    async fn get_stream(&self, name: &str) -> Result<StreamInfo, BrokerError> {
        let mut state = self.lock();
        Self::record(&mut state, format!("get_stream {name}"));
        state
            .streams
            .get(name)
            .map(stream_info)
            .ok_or_else(|| stream_not_found(name))
    }

    async fn add_stream(&self, config: &StreamConfig) -> Result<StreamInfo, BrokerError> {
        let mut state = self.lock();
        Self::record(&mut state, format!("add_stream {}", config.name));
        if state.streams.contains_key(&config.name) {
            return Err(BrokerError::Request(format!(
                "stream name {:?} already in use",
                config.name
            )));
        }
        let stream = MemoryStream {
            config: config.clone(),
            consumers: BTreeMap::new(),
        };
        let info = stream_info(&stream);
        state.streams.insert(config.name.clone(), stream);
        Ok(info)
    }

    async fn update_stream(&self, config: &StreamConfig) -> Result<StreamInfo, BrokerError> {
        let mut state = self.lock();
        Self::record(&mut state, format!("update_stream {}", config.name));
        let stream = state
            .streams
            .get_mut(&config.name)
            .ok_or_else(|| stream_not_found(&config.name))?;
        if stream.config.storage != config.storage {
            return Err(BrokerError::Request(
                "stream configuration update can not change storage type".to_string(),
            ));
        }
        stream.config = config.clone();
        Ok(stream_info(stream))
    }

    async fn delete_stream(&self, name: &str) -> Result<(), BrokerError> {
        let mut state = self.lock();
        Self::record(&mut state, format!("delete_stream {name}"));
        state
            .streams
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| stream_not_found(name))
    }

    async fn list_consumers(&self, stream: &str) -> Result<Vec<String>, BrokerError> {
        let mut state = self.lock();
        Self::record(&mut state, format!("list_consumers {stream}"));
        state
            .streams
            .get(stream)
            .map(|s| s.consumers.keys().cloned().collect())
            .ok_or_else(|| stream_not_found(stream))
    }

    async fn get_consumer(&self, stream: &str, name: &str) -> Result<ConsumerInfo, BrokerError> {
        let mut state = self.lock();
        Self::record(&mut state, format!("get_consumer {stream}/{name}"));
        let parent = state
            .streams
            .get(stream)
            .ok_or_else(|| stream_not_found(stream))?;
        parent
            .consumers
            .get(name)
            .map(|config| consumer_info(stream, name, config))
            .ok_or_else(|| consumer_not_found(name))
    }

    async fn add_consumer(
        &self,
        stream: &str,
        config: &ConsumerConfig,
    ) -> Result<ConsumerInfo, BrokerError> {
        let name = consumer_name(config)?;
        let mut state = self.lock();
        Self::record(&mut state, format!("add_consumer {stream}/{name}"));
        let parent = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| stream_not_found(stream))?;
        if parent.consumers.contains_key(&name) {
            return Err(BrokerError::Request(format!(
                "consumer {name:?} already exists"
            )));
        }
        parent.consumers.insert(name.clone(), config.clone());
        Ok(consumer_info(stream, &name, config))
    }

    async fn update_consumer(
        &self,
        stream: &str,
        config: &ConsumerConfig,
    ) -> Result<ConsumerInfo, BrokerError> {
        let name = consumer_name(config)?;
        let mut state = self.lock();
        Self::record(&mut state, format!("update_consumer {stream}/{name}"));
        let parent = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| stream_not_found(stream))?;
        let existing = parent
            .consumers
            .get_mut(&name)
            .ok_or_else(|| consumer_not_found(&name))?;
        *existing = config.clone();
        Ok(consumer_info(stream, &name, config))
    }

    async fn delete_consumer(&self, stream: &str, name: &str) -> Result<(), BrokerError> {
        let mut state = self.lock();
        Self::record(&mut state, format!("delete_consumer {stream}/{name}"));
        let parent = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| stream_not_found(stream))?;
        parent
            .consumers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| consumer_not_found(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> StreamConfig {
        StreamConfig {
            name: "ORDERS".to_string(),
            subjects: vec!["orders.>".to_string()],
            ..StreamConfig::default()
        }
    }

    #[tokio::test]
    async fn test_stream_lifecycle() {
        let broker = MemoryBroker::new();
        broker.add_stream(&orders()).await.unwrap();
        assert!(broker.add_stream(&orders()).await.is_err());
        assert_eq!(broker.list_streams().await.unwrap(), vec!["ORDERS"]);

        broker.delete_stream("ORDERS").await.unwrap();
        let err = broker.delete_stream("ORDERS").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(
            broker.calls(),
            vec![
                "add_stream ORDERS",
                "add_stream ORDERS",
                "list_streams",
                "delete_stream ORDERS",
                "delete_stream ORDERS",
            ]
        );
    }

    #[tokio::test]
    async fn test_consumer_on_missing_stream_reports_stream_not_found() {
        let broker = MemoryBroker::new();
        let err = broker.get_consumer("ORDERS", "PROCESSOR").await.unwrap_err();
        assert!(err.is_stream_not_found());

        broker.insert_stream(orders());
        let err = broker.get_consumer("ORDERS", "PROCESSOR").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_stream_not_found());
    }

    #[tokio::test]
    async fn test_unavailable_broker_refuses_connections() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        let servers = vec!["nats://localhost:4222".to_string()];
        let options = ConnectOptions {
            servers: &servers,
            credentials: None,
        };
        assert!(broker.connect(&options).await.is_err());
        assert_eq!(broker.connects(), 0);

        broker.set_available(true);
        assert!(broker.connect(&options).await.is_ok());
        assert_eq!(broker.connects(), 1);
    }
}
