//! # Custom Resource Definitions
//!
//! CRD types for the JetStream controller.
//!
//! ## Module Structure
//!
//! - `stream.rs` - `Stream` resource (group `jetstream.nats.io`, version `v1`)
//! - `consumer.rs` - `Consumer` resource bound to a stream
//! - `connection.rs` - Broker connection settings shared by both kinds
//! - `status.rs` - Status types for tracking reconciliation state

mod connection;
mod consumer;
mod status;
mod stream;

use k8s_openapi::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

pub use connection::{ConnectionSpec, CredentialsSecretRef};
pub use consumer::{Consumer, ConsumerSpec};
pub use status::{BrokerState, Condition, ConditionStatus, ResourceStatus};
pub use stream::{Stream, StreamSpec};

/// Finalizer placed on `Stream` resources
pub const STREAM_FINALIZER: &str = "streamfinalizer.jetstream.nats.io";
/// Finalizer placed on `Consumer` resources
pub const CONSUMER_FINALIZER: &str = "consumerfinalizer.jetstream.nats.io";

/// Behaviour shared by every resource kind the controller reconciles
pub trait ManagedResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Kind label used in logs and metrics
    const KIND_LABEL: &'static str;
    /// Finalizer token guarding broker-side cleanup
    const FINALIZER: &'static str;

    /// Name of the corresponding entity on the broker
    fn broker_name(&self) -> String;
    fn connection(&self) -> &ConnectionSpec;
    fn resource_status(&self) -> Option<&ResourceStatus>;
    fn resource_status_mut(&mut self) -> &mut Option<ResourceStatus>;

    /// Work queue key, `namespace/name`
    fn key(&self) -> String {
        format!(
            "{}/{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }

    fn is_deleting(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }
}

impl ManagedResource for Stream {
    const KIND_LABEL: &'static str = "stream";
    const FINALIZER: &'static str = STREAM_FINALIZER;

    fn broker_name(&self) -> String {
        Stream::broker_name(self)
    }

    fn connection(&self) -> &ConnectionSpec {
        &self.spec.connection
    }

    fn resource_status(&self) -> Option<&ResourceStatus> {
        self.status.as_ref()
    }

    fn resource_status_mut(&mut self) -> &mut Option<ResourceStatus> {
        &mut self.status
    }
}

impl ManagedResource for Consumer {
    const KIND_LABEL: &'static str = "consumer";
    const FINALIZER: &'static str = CONSUMER_FINALIZER;

    fn broker_name(&self) -> String {
        Consumer::broker_name(self)
    }

    fn connection(&self) -> &ConnectionSpec {
        &self.spec.connection
    }

    fn resource_status(&self) -> Option<&ResourceStatus> {
        self.status.as_ref()
    }

    fn resource_status_mut(&mut self) -> &mut Option<ResourceStatus> {
        &mut self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_namespace_slash_name() {
        let mut stream = Stream::new("orders", StreamSpec::default());
        stream.metadata.namespace = Some("default".to_string());
        assert_eq!(stream.key(), "default/orders");
        assert!(!stream.is_deleting());
    }
}
