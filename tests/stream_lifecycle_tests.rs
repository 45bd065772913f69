//! # Stream Lifecycle Tests
//!
//! Drives a `Stream` resource through creation, a spec edit and deletion
//! against the in-memory store and broker.

mod common;

use common::{orders_spec, ready, stream, Harness, NAMESPACE};
use jetstream_controller::broker::{RetentionPolicy, StorageType, StreamConfig};
use jetstream_controller::controller::reconciler::{process, Action, ReconcileError, StreamSyncer};
use jetstream_controller::controller::secrets::StaticSecretSource;
use jetstream_controller::controller::store::ObjectStore;
use jetstream_controller::crd::{
    ConditionStatus, CredentialsSecretRef, StreamSpec, STREAM_FINALIZER,
};

async fn reconcile(harness: &Harness) -> Result<Action, ReconcileError> {
    process(&StreamSyncer, &harness.ctx, &harness.broker, NAMESPACE, "orders").await
}

#[tokio::test]
async fn test_stream_lifecycle() {
    let harness = Harness::new();
    harness.streams.apply(stream("orders", orders_spec()));

    // First pass only claims the resource
    assert_eq!(reconcile(&harness).await.unwrap(), Action::Requeue);
    assert!(harness.broker.calls().is_empty());
    assert_eq!(harness.broker.connects(), 0);
    let stored = harness.streams.get(NAMESPACE, "orders").await.unwrap().unwrap();
    assert_eq!(
        stored.metadata.finalizers,
        Some(vec![STREAM_FINALIZER.to_string()])
    );

    // Second pass creates the stream
    assert_eq!(reconcile(&harness).await.unwrap(), Action::Done);
    assert_eq!(
        harness.broker.calls(),
        vec!["get_stream ORDERS", "add_stream ORDERS"]
    );
    let condition = ready(&harness.streams, "orders").await.unwrap();
    assert_eq!(condition.status, ConditionStatus::True);
    assert_eq!(condition.reason, "Created");
    let stored = harness.streams.get(NAMESPACE, "orders").await.unwrap().unwrap();
    assert_eq!(stored.status.unwrap().observed_generation, Some(1));

    // A spec edit updates the stream in place
    harness.broker.clear_calls();
    harness.streams.apply(stream(
        "orders",
        StreamSpec {
            max_msgs: 100,
            ..orders_spec()
        },
    ));
    assert_eq!(reconcile(&harness).await.unwrap(), Action::Done);
    assert_eq!(
        harness.broker.calls(),
        vec!["get_stream ORDERS", "update_stream ORDERS"]
    );
    assert_eq!(harness.broker.stream_config("ORDERS").unwrap().max_msgs, 100);
    let condition = ready(&harness.streams, "orders").await.unwrap();
    assert_eq!(condition.status, ConditionStatus::True);
    assert_eq!(condition.reason, "Synced");
    let stored = harness.streams.get(NAMESPACE, "orders").await.unwrap().unwrap();
    assert_eq!(stored.status.unwrap().observed_generation, Some(2));

    // Deletion removes the stream, then the finalizer, then the object
    harness.broker.clear_calls();
    harness.streams.delete(NAMESPACE, "orders").unwrap();
    assert!(harness
        .streams
        .get(NAMESPACE, "orders")
        .await
        .unwrap()
        .is_some());
    assert_eq!(reconcile(&harness).await.unwrap(), Action::Done);
    assert_eq!(harness.broker.calls(), vec!["delete_stream ORDERS"]);
    assert!(harness.broker.stream_config("ORDERS").is_none());
    assert!(harness.streams.objects().is_empty());

    // Nothing left to do for a tombstone
    harness.broker.clear_calls();
    assert_eq!(reconcile(&harness).await.unwrap(), Action::Done);
    assert!(harness.broker.calls().is_empty());
}

#[tokio::test]
async fn test_in_sync_stream_skips_status_write() {
    let harness = Harness::new();
    harness.streams.apply(stream("orders", orders_spec()));
    reconcile(&harness).await.unwrap();
    reconcile(&harness).await.unwrap();
    // Created -> Synced is still a change
    reconcile(&harness).await.unwrap();
    assert_eq!(ready(&harness.streams, "orders").await.unwrap().reason, "Synced");
    let writes = harness.streams.writes().len();

    harness.broker.clear_calls();
    assert_eq!(reconcile(&harness).await.unwrap(), Action::Done);
    assert_eq!(harness.broker.calls(), vec!["get_stream ORDERS"]);
    assert_eq!(harness.streams.writes().len(), writes);
}

#[tokio::test]
async fn test_existing_stream_is_adopted() {
    let harness = Harness::new();
    harness.streams.apply(stream("orders", orders_spec()));
    reconcile(&harness).await.unwrap();

    // Created out of band with the same configuration
    harness.broker.insert_stream(StreamConfig {
        name: "ORDERS".to_string(),
        subjects: vec!["orders.*".to_string()],
        retention: RetentionPolicy::Limits,
        storage: StorageType::Memory,
        ..StreamConfig::default()
    });

    assert_eq!(reconcile(&harness).await.unwrap(), Action::Done);
    assert_eq!(harness.broker.calls(), vec!["get_stream ORDERS"]);
    assert_eq!(ready(&harness.streams, "orders").await.unwrap().reason, "Synced");
}

#[tokio::test]
async fn test_broker_failure_keeps_finalizer_and_reports_reason() {
    let harness = Harness::new();
    harness.streams.apply(stream("orders", orders_spec()));
    reconcile(&harness).await.unwrap();

    harness.broker.set_available(false);
    let error = reconcile(&harness).await.unwrap_err();
    assert!(matches!(error, ReconcileError::Connect(_)));
    assert!(error.is_retriable());

    let condition = ready(&harness.streams, "orders").await.unwrap();
    assert_eq!(condition.status, ConditionStatus::False);
    assert_eq!(condition.reason, "ConnectionFailed");
    let stored = harness.streams.get(NAMESPACE, "orders").await.unwrap().unwrap();
    assert_eq!(
        stored.metadata.finalizers,
        Some(vec![STREAM_FINALIZER.to_string()])
    );

    // Deletion cannot finish while the broker is unreachable
    harness.streams.delete(NAMESPACE, "orders").unwrap();
    assert!(reconcile(&harness).await.is_err());
    assert_eq!(
        ready(&harness.streams, "orders").await.unwrap().reason,
        "DeleteFailed"
    );
    assert_eq!(harness.streams.objects().len(), 1);

    harness.broker.set_available(true);
    assert_eq!(reconcile(&harness).await.unwrap(), Action::Done);
    assert!(harness.streams.objects().is_empty());
}

#[tokio::test]
async fn test_invalid_spec_never_contacts_broker() {
    let harness = Harness::new();
    harness.streams.apply(stream(
        "orders",
        StreamSpec {
            storage: "junk".to_string(),
            ..orders_spec()
        },
    ));
    reconcile(&harness).await.unwrap();

    let error = reconcile(&harness).await.unwrap_err();
    assert!(matches!(error, ReconcileError::InvalidSpec(_)));
    assert!(!error.is_retriable());
    assert_eq!(harness.broker.connects(), 0);

    let condition = ready(&harness.streams, "orders").await.unwrap();
    assert_eq!(condition.status, ConditionStatus::False);
    assert_eq!(condition.reason, "InvalidSpec");
    assert!(condition.message.contains("junk"));
}

#[tokio::test]
async fn test_credentials_are_loaded_from_secret() {
    let creds = b"-----BEGIN NATS USER JWT-----";
    let harness = Harness::with_secrets(StaticSecretSource::new().with_secret(
        NAMESPACE,
        "nats-creds",
        "nats.creds",
        creds,
    ));
    let mut spec = orders_spec();
    spec.connection.credentials_secret = Some(CredentialsSecretRef {
        name: "nats-creds".to_string(),
        key: "nats.creds".to_string(),
    });
    harness.streams.apply(stream("orders", spec.clone()));
    reconcile(&harness).await.unwrap();
    reconcile(&harness).await.unwrap();
    assert_eq!(harness.broker.last_credentials_len(), Some(creds.len()));

    // A missing secret fails before connecting
    spec.connection.credentials_secret = Some(CredentialsSecretRef {
        name: "missing".to_string(),
        key: "nats.creds".to_string(),
    });
    harness.streams.apply(stream("orders", spec));
    let connects = harness.broker.connects();
    let error = reconcile(&harness).await.unwrap_err();
    assert!(matches!(error, ReconcileError::Credentials(_)));
    assert_eq!(harness.broker.connects(), connects);
    assert_eq!(
        ready(&harness.streams, "orders").await.unwrap().reason,
        "CredentialsError"
    );
}

#[tokio::test]
async fn test_deleting_stream_held_by_other_finalizer_is_left_alone() {
    let harness = Harness::new();
    let mut held = stream("orders", orders_spec());
    held.metadata.finalizers = Some(vec!["other.io/x".to_string()]);
    harness.streams.apply(held);
    harness.streams.delete(NAMESPACE, "orders").unwrap();

    assert_eq!(reconcile(&harness).await.unwrap(), Action::Done);
    assert!(harness.broker.calls().is_empty());
    assert_eq!(harness.broker.connects(), 0);
    assert!(harness.streams.writes().is_empty());

    let stored = harness.streams.get(NAMESPACE, "orders").await.unwrap().unwrap();
    assert!(stored.metadata.deletion_timestamp.is_some());
    assert_eq!(
        stored.metadata.finalizers,
        Some(vec!["other.io/x".to_string()])
    );
}
