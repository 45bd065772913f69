//! # Broker Types
//!
//! Broker-side stream and consumer configuration.
//!
//! Field names follow the JetStream administrative API so the structs can be
//! exchanged with any client through JSON. Durations are nanoseconds, `0`
//! meaning "unset / server default".

use crate::controller::validation::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// Storage backend of a stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    File,
    Memory,
}

impl FromStr for StorageType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(StorageType::Memory),
            "file" => Ok(StorageType::File),
            other => Err(ValidationError::invalid_value("storage", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionPolicy {
    #[default]
    Limits,
    Interest,
    WorkQueue,
}

impl FromStr for RetentionPolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "limits" => Ok(RetentionPolicy::Limits),
            "interest" => Ok(RetentionPolicy::Interest),
            "workqueue" => Ok(RetentionPolicy::WorkQueue),
            other => Err(ValidationError::invalid_value("retention", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscardPolicy {
    #[default]
    Old,
    New,
}

impl FromStr for DiscardPolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "old" => Ok(DiscardPolicy::Old),
            "new" => Ok(DiscardPolicy::New),
            other => Err(ValidationError::invalid_value("discard", other)),
        }
    }
}

/// Where a consumer starts reading
///
/// Parsed from the resource spelling (`byStartSequence`), sent on the wire
/// in snake case (`by_start_sequence`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverPolicy {
    #[default]
    All,
    Last,
    New,
    ByStartSequence,
    ByStartTime,
    LastPerSubject,
}

impl FromStr for DeliverPolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(DeliverPolicy::All),
            "last" => Ok(DeliverPolicy::Last),
            "new" => Ok(DeliverPolicy::New),
            "byStartSequence" => Ok(DeliverPolicy::ByStartSequence),
            "byStartTime" => Ok(DeliverPolicy::ByStartTime),
            other => Err(ValidationError::invalid_value("deliverPolicy", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckPolicy {
    None,
    All,
    #[default]
    Explicit,
}

impl FromStr for AckPolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(AckPolicy::None),
            "all" => Ok(AckPolicy::All),
            "explicit" => Ok(AckPolicy::Explicit),
            other => Err(ValidationError::invalid_value("ackPolicy", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayPolicy {
    #[default]
    Instant,
    Original,
}

impl FromStr for ReplayPolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instant" => Ok(ReplayPolicy::Instant),
            "original" => Ok(ReplayPolicy::Original),
            other => Err(ValidationError::invalid_value("replayPolicy", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<String>,
    pub retention: RetentionPolicy,
    pub max_consumers: i64,
    pub max_msgs: i64,
    pub max_bytes: i64,
    pub max_age: u64,
    pub max_msg_size: i64,
    pub storage: StorageType,
    pub num_replicas: i64,
    pub no_ack: bool,
    pub discard: DiscardPolicy,
    #[serde(skip_serializing_if = "is_zero")]
    pub duplicate_window: u64,
}

impl StreamConfig {
    /// Whether `observed` already satisfies this desired configuration
    ///
    /// Unlimited limits (`0`/`-1`), unset durations and replicas `0`/`1` are
    /// treated as equivalent so server-side defaulting does not read as drift.
    #[must_use]
    pub fn matches(&self, observed: &StreamConfig) -> bool {
        let mut desired_subjects = self.subjects.clone();
        let mut observed_subjects = observed.subjects.clone();
        desired_subjects.sort();
        observed_subjects.sort();

        self.name == observed.name
            && desired_subjects == observed_subjects
            && self.retention == observed.retention
            && self.storage == observed.storage
            && limit(self.max_consumers) == limit(observed.max_consumers)
            && limit(self.max_msgs) == limit(observed.max_msgs)
            && limit(self.max_bytes) == limit(observed.max_bytes)
            && limit(self.max_msg_size) == limit(observed.max_msg_size)
            && self.max_age == observed.max_age
            && replicas(self.num_replicas) == replicas(observed.num_replicas)
            && self.no_ack == observed.no_ack
            && self.discard == observed.discard
            && duration_matches(self.duplicate_window, observed.duplicate_window)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub durable_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deliver_subject: Option<String>,
    pub deliver_policy: DeliverPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opt_start_seq: Option<u64>,
    /// RFC3339 timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opt_start_time: Option<String>,
    pub ack_policy: AckPolicy,
    #[serde(skip_serializing_if = "is_zero")]
    pub ack_wait: u64,
    pub max_deliver: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_subject: Option<String>,
    pub replay_policy: ReplayPolicy,
    #[serde(
        serialize_with = "serialize_sample_freq",
        deserialize_with = "deserialize_sample_freq",
        skip_serializing_if = "is_zero_u8"
    )]
    pub sample_freq: u8,
    #[serde(skip_serializing_if = "is_zero")]
    pub rate_limit_bps: u64,
}

impl ConsumerConfig {
    /// Whether `observed` already satisfies this desired configuration
    #[must_use]
    pub fn matches(&self, observed: &ConsumerConfig) -> bool {
        self.durable_name == observed.durable_name
            && non_empty(&self.deliver_subject) == non_empty(&observed.deliver_subject)
            && self.deliver_policy == observed.deliver_policy
            && (self.deliver_policy != DeliverPolicy::ByStartSequence
                || self.opt_start_seq == observed.opt_start_seq)
            && (self.deliver_policy != DeliverPolicy::ByStartTime
                || same_instant(&self.opt_start_time, &observed.opt_start_time))
            && self.ack_policy == observed.ack_policy
            && duration_matches(self.ack_wait, observed.ack_wait)
            && limit(self.max_deliver) == limit(observed.max_deliver)
            && non_empty(&self.filter_subject) == non_empty(&observed.filter_subject)
            && self.replay_policy == observed.replay_policy
            && self.sample_freq == observed.sample_freq
            && self.rate_limit_bps == observed.rate_limit_bps
    }
}

/// Stream counters reported by the broker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamState {
    pub messages: u64,
    pub bytes: u64,
    pub first_seq: u64,
    pub last_seq: u64,
    pub consumer_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub config: StreamConfig,
    pub state: StreamState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerInfo {
    pub stream_name: String,
    pub name: String,
    pub config: ConsumerConfig,
    pub delivered_stream_seq: u64,
    pub num_pending: u64,
}

fn limit(value: i64) -> i64 {
    if value <= 0 {
        -1
    } else {
        value
    }
}

fn replicas(value: i64) -> i64 {
    value.max(1)
}

/// An unset desired duration accepts whatever the server chose
fn duration_matches(desired: u64, observed: u64) -> bool {
    desired == 0 || desired == observed
}

/// Timestamps are equal when they name the same instant, whatever the spelling
fn same_instant(desired: &Option<String>, observed: &Option<String>) -> bool {
    let parse = |value: &Option<String>| {
        value
            .as_deref()
            .map(|v| DateTime::parse_from_rfc3339(v).map(|t| t.with_timezone(&Utc)))
    };
    match (parse(desired), parse(observed)) {
        (Some(Ok(a)), Some(Ok(b))) => a == b,
        _ => desired == observed,
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

#[allow(clippy::trivially_copy_pass_by_ref, reason = "serde skip_serializing_if signature")]
fn is_zero(value: &u64) -> bool {
    *value == 0
}

#[allow(clippy::trivially_copy_pass_by_ref, reason = "serde skip_serializing_if signature")]
fn is_zero_u8(value: &u8) -> bool {
    *value == 0
}

#[allow(clippy::trivially_copy_pass_by_ref, reason = "serde serialize_with signature")]
fn serialize_sample_freq<S: Serializer>(value: &u8, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

/// Servers report the frequency as `"50%"` or `"50"`; older ones as a number
fn deserialize_sample_freq<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u8),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => {
            let trimmed = s.trim().trim_end_matches('%');
            if trimmed.is_empty() {
                return Ok(0);
            }
            trimmed.parse().map_err(serde::de::Error::custom)
        }
    }
}
