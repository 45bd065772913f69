//! # Resource Status
//!
//! Status types shared by the `Stream` and `Consumer` resources.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Observed state of a managed resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    /// Generation of the spec that was last reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Latest observations, at most one per condition type
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Counters reported by the broker on the last successful sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_state: Option<BrokerState>,
}

/// Broker-reported counters
///
/// Streams fill the message/sequence fields, consumers fill the delivery fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BrokerState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_stream_seq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_pending: Option<u64>,
}

/// A typed, timestamped status entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition, e.g. `Ready`
    pub r#type: String,
    pub status: ConditionStatus,
    /// RFC3339 timestamp of the last status change
    pub last_transition_time: String,
    /// Short machine-readable token, e.g. `Created`
    pub reason: String,
    /// Human-readable explanation
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}
