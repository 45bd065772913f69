//! # Stream
//!
//! Desired state of a JetStream stream.

use crate::crd::{ConnectionSpec, ResourceStatus};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "jetstream.nats.io",
    version = "v1",
    kind = "Stream",
    namespaced,
    shortname = "str",
    status = "ResourceStatus",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Reason", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StreamSpec {
    /// Broker-side stream name (defaults to metadata.name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Subjects bound to the stream
    #[serde(default)]
    pub subjects: Vec<String>,
    /// "limits", "interest" or "workqueue"
    #[serde(default = "default_retention")]
    pub retention: String,
    /// "memory" or "file"
    #[serde(default = "default_storage")]
    pub storage: String,
    #[serde(default = "unlimited")]
    pub max_consumers: i64,
    #[serde(default = "unlimited")]
    pub max_msgs: i64,
    #[serde(default = "unlimited")]
    pub max_bytes: i64,
    /// Maximum message age, e.g. "24h" or "1h30m"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<String>,
    #[serde(default = "unlimited")]
    pub max_msg_size: i64,
    #[serde(default = "default_replicas")]
    pub replicas: i64,
    #[serde(default)]
    pub no_ack: bool,
    /// "old" or "new"
    #[serde(default = "default_discard")]
    pub discard: String,
    /// Window for duplicate message tracking, e.g. "2m"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_window: Option<String>,
    #[serde(flatten)]
    pub connection: ConnectionSpec,
}

impl Default for StreamSpec {
    fn default() -> Self {
        Self {
            name: None,
            subjects: Vec::new(),
            retention: default_retention(),
            storage: default_storage(),
            max_consumers: unlimited(),
            max_msgs: unlimited(),
            max_bytes: unlimited(),
            max_age: None,
            max_msg_size: unlimited(),
            replicas: default_replicas(),
            no_ack: false,
            discard: default_discard(),
            duplicate_window: None,
            connection: ConnectionSpec::default(),
        }
    }
}

impl Stream {
    /// Name of the stream on the broker
    #[must_use]
    pub fn broker_name(&self) -> String {
        self.spec
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| self.metadata.name.clone())
            .unwrap_or_default()
    }
}

fn default_retention() -> String {
    "limits".to_string()
}

fn default_storage() -> String {
    "memory".to_string()
}

fn default_discard() -> String {
    "old".to_string()
}

fn default_replicas() -> i64 {
    1
}

pub(crate) fn unlimited() -> i64 {
    -1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_defaults_from_minimal_manifest() {
        let spec: StreamSpec = serde_json::from_value(serde_json::json!({
            "subjects": ["orders.>"]
        }))
        .unwrap();
        assert_eq!(spec.storage, "memory");
        assert_eq!(spec.retention, "limits");
        assert_eq!(spec.discard, "old");
        assert_eq!(spec.max_msgs, -1);
        assert_eq!(spec.replicas, 1);
        assert!(spec.connection.servers.is_empty());
    }

    #[test]
    fn test_broker_name_falls_back_to_metadata_name() {
        let stream = Stream::new("orders", StreamSpec::default());
        assert_eq!(stream.broker_name(), "orders");

        let named = Stream::new(
            "orders",
            StreamSpec {
                name: Some("ORDERS".to_string()),
                ..StreamSpec::default()
            },
        );
        assert_eq!(named.broker_name(), "ORDERS");
    }

    #[test]
    fn test_connection_fields_are_flattened() {
        let spec: StreamSpec = serde_json::from_value(serde_json::json!({
            "servers": ["nats://nats:4222"],
            "credentialsSecret": {"name": "nats-creds"}
        }))
        .unwrap();
        assert_eq!(spec.connection.servers, vec!["nats://nats:4222"]);
        let secret = spec.connection.credentials_secret.unwrap();
        assert_eq!(secret.name, "nats-creds");
        assert_eq!(secret.key, "nats.creds");
    }
}
