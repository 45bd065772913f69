//! # Consumer
//!
//! Desired state of a JetStream consumer bound to a stream.

use crate::crd::stream::unlimited;
use crate::crd::{ConnectionSpec, ResourceStatus};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "jetstream.nats.io",
    version = "v1",
    kind = "Consumer",
    namespaced,
    shortname = "con",
    status = "ResourceStatus",
    printcolumn = r#"{"name":"Stream", "type":"string", "jsonPath":".spec.streamName"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerSpec {
    /// Broker name of the parent stream
    pub stream_name: String,
    /// Durable consumer name (defaults to metadata.name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durable_name: Option<String>,
    /// Push subject; unset for pull consumers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliver_subject: Option<String>,
    /// "all", "last", "new", "byStartSequence" or "byStartTime"
    #[serde(default = "default_deliver_policy")]
    pub deliver_policy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opt_start_seq: Option<u64>,
    /// RFC3339 start time for "byStartTime"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opt_start_time: Option<String>,
    /// "none", "all" or "explicit"
    #[serde(default = "default_ack_policy")]
    pub ack_policy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_wait: Option<String>,
    #[serde(default = "unlimited")]
    pub max_deliver: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_subject: Option<String>,
    /// "instant" or "original"
    #[serde(default = "default_replay_policy")]
    pub replay_policy: String,
    /// Percentage of acks to sample, "0" to "100" with optional "%"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_freq: Option<String>,
    #[serde(default)]
    pub rate_limit_bps: u64,
    #[serde(flatten)]
    pub connection: ConnectionSpec,
}

impl ConsumerSpec {
    /// Spec for a pull consumer on `stream_name` with every other field defaulted
    #[must_use]
    pub fn for_stream(stream_name: &str) -> Self {
        Self {
            stream_name: stream_name.to_string(),
            durable_name: None,
            deliver_subject: None,
            deliver_policy: default_deliver_policy(),
            opt_start_seq: None,
            opt_start_time: None,
            ack_policy: default_ack_policy(),
            ack_wait: None,
            max_deliver: unlimited(),
            filter_subject: None,
            replay_policy: default_replay_policy(),
            sample_freq: None,
            rate_limit_bps: 0,
            connection: ConnectionSpec::default(),
        }
    }
}

impl Consumer {
    /// Durable name of the consumer on the broker
    #[must_use]
    pub fn broker_name(&self) -> String {
        self.spec
            .durable_name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| self.metadata.name.clone())
            .unwrap_or_default()
    }
}

fn default_deliver_policy() -> String {
    "all".to_string()
}

fn default_ack_policy() -> String {
    "none".to_string()
}

fn default_replay_policy() -> String {
    "instant".to_string()
}
