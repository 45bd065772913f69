//! # Stream Syncer
//!
//! Maps a `Stream` resource onto a JetStream stream.

use crate::broker::{StreamConfig, StreamInfo};
use crate::controller::reconciler::sync::{Change, Session, SyncOutcome, Syncer};
use crate::controller::reconciler::types::{Context, ReconcileError};
use crate::controller::store::ObjectStore;
use crate::controller::validation::{
    parse_optional_duration_nanos, validate_broker_name, validate_replicas, ValidationError,
};
use crate::crd::{BrokerState, Stream};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, Default)]
pub struct StreamSyncer;

/// Limits accept `-1` for unlimited or any non-negative value
fn validate_limit(field: &'static str, value: i64) -> Result<i64, ValidationError> {
    if value < -1 {
        return Err(ValidationError::OutOfRange {
            field,
            value: value.to_string(),
            expected: "-1 (unlimited) or greater",
        });
    }
    Ok(value)
}

fn broker_state(info: &StreamInfo) -> BrokerState {
    BrokerState {
        messages: Some(info.state.messages),
        bytes: Some(info.state.bytes),
        first_seq: Some(info.state.first_seq),
        last_seq: Some(info.state.last_seq),
        consumer_count: Some(info.state.consumer_count),
        ..BrokerState::default()
    }
}

#[async_trait]
impl Syncer for StreamSyncer {
    type Resource = Stream;
    type Desired = StreamConfig;

    fn store<'a>(&self, ctx: &'a Context) -> &'a dyn ObjectStore<Stream> {
        ctx.streams.as_ref()
    }

    fn desired(&self, stream: &Stream) -> Result<StreamConfig, ValidationError> {
        let spec = &stream.spec;
        Ok(StreamConfig {
            name: validate_broker_name("name", &stream.broker_name())?,
            subjects: spec.subjects.clone(),
            retention: spec.retention.parse()?,
            max_consumers: validate_limit("maxConsumers", spec.max_consumers)?,
            max_msgs: validate_limit("maxMsgs", spec.max_msgs)?,
            max_bytes: validate_limit("maxBytes", spec.max_bytes)?,
            max_age: parse_optional_duration_nanos("maxAge", spec.max_age.as_deref())?,
            max_msg_size: validate_limit("maxMsgSize", spec.max_msg_size)?,
            storage: spec.storage.parse()?,
            num_replicas: validate_replicas(spec.replicas)?,
            no_ack: spec.no_ack,
            discard: spec.discard.parse()?,
            duplicate_window: parse_optional_duration_nanos(
                "duplicateWindow",
                spec.duplicate_window.as_deref(),
            )?,
        })
    }

    async fn apply(
        &self,
        session: &Session,
        desired: &StreamConfig,
    ) -> Result<SyncOutcome, ReconcileError> {
        let client = session.client();
        let observed = match session.call("get_stream", client.get_stream(&desired.name)).await {
            Ok(info) => info,
            Err(ReconcileError::Broker(e)) if e.is_not_found() => {
                let info = session.call("add_stream", client.add_stream(desired)).await?;
                return Ok(SyncOutcome {
                    change: Change::Created,
                    state: broker_state(&info),
                });
            }
            Err(e) => return Err(e),
        };

        if desired.matches(&observed.config) {
            return Ok(SyncOutcome {
                change: Change::Unchanged,
                state: broker_state(&observed),
            });
        }

        let info = session
            .call("update_stream", client.update_stream(desired))
            .await?;
        Ok(SyncOutcome {
            change: Change::Updated,
            state: broker_state(&info),
        })
    }

    async fn cleanup(&self, session: &Session, stream: &Stream) -> Result<(), ReconcileError> {
        let name = stream.broker_name();
        match session
            .call("delete_stream", session.client().delete_stream(&name))
            .await
        {
            Err(ReconcileError::Broker(e)) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{RetentionPolicy, StorageType};
    use crate::crd::StreamSpec;

    fn stream(spec: StreamSpec) -> Stream {
        let mut stream = Stream::new("orders", spec);
        stream.metadata.namespace = Some("default".to_string());
        stream
    }

    #[test]
    fn test_desired_from_defaults() {
        let desired = StreamSyncer.desired(&stream(StreamSpec::default())).unwrap();
        assert_eq!(desired.name, "orders");
        assert_eq!(desired.storage, StorageType::Memory);
        assert_eq!(desired.retention, RetentionPolicy::Limits);
        assert_eq!(desired.num_replicas, 1);
        assert_eq!(desired.max_age, 0);
    }

    #[test]
    fn test_desired_parses_durations() {
        let desired = StreamSyncer
            .desired(&stream(StreamSpec {
                max_age: Some("1h30m".to_string()),
                duplicate_window: Some("2m".to_string()),
                ..StreamSpec::default()
            }))
            .unwrap();
        assert_eq!(desired.max_age, 5_400_000_000_000);
        assert_eq!(desired.duplicate_window, 120_000_000_000);
    }

    #[test]
    fn test_desired_rejects_invalid_values() {
        let cases = [
            StreamSpec {
                storage: "junk".to_string(),
                ..StreamSpec::default()
            },
            StreamSpec {
                retention: "forever".to_string(),
                ..StreamSpec::default()
            },
            StreamSpec {
                discard: "oldest".to_string(),
                ..StreamSpec::default()
            },
            StreamSpec {
                replicas: 7,
                ..StreamSpec::default()
            },
            StreamSpec {
                max_msgs: -2,
                ..StreamSpec::default()
            },
            StreamSpec {
                max_age: Some("soon".to_string()),
                ..StreamSpec::default()
            },
            StreamSpec {
                name: Some("orders.v2".to_string()),
                ..StreamSpec::default()
            },
        ];
        for spec in cases {
            assert!(StreamSyncer.desired(&stream(spec.clone())).is_err(), "{spec:?}");
        }
    }
}
