//! Shared fixtures for integration tests
//!
//! Builds a reconcile [`Context`] on top of in-memory stores, an in-memory
//! broker and a fixed secret source.

#![allow(dead_code, reason = "not every test binary uses every fixture")]

use jetstream_controller::broker::MemoryBroker;
use jetstream_controller::controller::conditions::{
    find_condition, TransitionPolicy, CONDITION_READY,
};
use jetstream_controller::controller::reconciler::Context;
use jetstream_controller::controller::secrets::StaticSecretSource;
use jetstream_controller::controller::store::{MemoryStore, ObjectStore};
use jetstream_controller::crd::{
    Condition, Consumer, ConsumerSpec, ManagedResource, Stream, StreamSpec,
};
use std::sync::Arc;
use std::time::Duration;

pub const NAMESPACE: &str = "default";

pub struct Harness {
    pub streams: Arc<MemoryStore<Stream>>,
    pub consumers: Arc<MemoryStore<Consumer>>,
    pub broker: MemoryBroker,
    pub ctx: Arc<Context>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_secrets(StaticSecretSource::new())
    }

    pub fn with_secrets(secrets: StaticSecretSource) -> Self {
        let streams = Arc::new(MemoryStore::new());
        let consumers = Arc::new(MemoryStore::new());
        let ctx = Arc::new(Context {
            streams: Arc::clone(&streams) as _,
            consumers: Arc::clone(&consumers) as _,
            secrets: Arc::new(secrets),
            default_servers: vec!["nats://localhost:4222".to_string()],
            broker_timeout: Duration::from_secs(5),
            condition_policy: TransitionPolicy::default(),
        });
        Self {
            streams,
            consumers,
            broker: MemoryBroker::new(),
            ctx,
        }
    }
}

pub fn stream(name: &str, spec: StreamSpec) -> Stream {
    let mut stream = Stream::new(name, spec);
    stream.metadata.namespace = Some(NAMESPACE.to_string());
    stream
}

pub fn orders_spec() -> StreamSpec {
    StreamSpec {
        name: Some("ORDERS".to_string()),
        subjects: vec!["orders.*".to_string()],
        ..StreamSpec::default()
    }
}

pub fn consumer(name: &str, spec: ConsumerSpec) -> Consumer {
    let mut consumer = Consumer::new(name, spec);
    consumer.metadata.namespace = Some(NAMESPACE.to_string());
    consumer
}

/// The `Ready` condition of the stored object
pub async fn ready<K: ManagedResource>(
    store: &MemoryStore<K>,
    name: &str,
) -> Option<Condition> {
    let object = store.get(NAMESPACE, name).await.ok()??;
    let status = object.resource_status()?;
    find_condition(&status.conditions, CONDITION_READY).cloned()
}
