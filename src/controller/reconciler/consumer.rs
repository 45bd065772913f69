//! # Consumer Syncer
//!
//! Maps a `Consumer` resource onto a durable JetStream consumer.
//!
//! A consumer is only synced once its parent `Stream` resource (same
//! namespace, broker name equal to `streamName`) reports `Ready=True`.
//! Until then the pass fails with `ParentNotReady`, which is retried.

use crate::broker::{ConsumerConfig, ConsumerInfo, DeliverPolicy};
use crate::controller::conditions::is_ready;
use crate::controller::reconciler::sync::{Change, Session, SyncOutcome, Syncer};
use crate::controller::reconciler::types::{Context, ReconcileError};
use crate::controller::store::ObjectStore;
use crate::controller::validation::{
    parse_optional_duration_nanos, parse_sample_freq, validate_broker_name, validate_rfc3339,
    ValidationError,
};
use crate::crd::{BrokerState, Consumer, ManagedResource};
use async_trait::async_trait;
use kube::ResourceExt;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsumerSyncer;

/// Validated consumer configuration and the stream it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerTarget {
    pub stream: String,
    pub config: ConsumerConfig,
}

impl ConsumerTarget {
    fn name(&self) -> &str {
        self.config.durable_name.as_deref().unwrap_or_default()
    }
}

fn broker_state(info: &ConsumerInfo) -> BrokerState {
    BrokerState {
        delivered_stream_seq: Some(info.delivered_stream_seq),
        num_pending: Some(info.num_pending),
        ..BrokerState::default()
    }
}

fn parent_not_ready(target: &ConsumerTarget) -> ReconcileError {
    ReconcileError::ParentNotReady {
        stream: target.stream.clone(),
    }
}

#[async_trait]
impl Syncer for ConsumerSyncer {
    type Resource = Consumer;
    type Desired = ConsumerTarget;

    fn store<'a>(&self, ctx: &'a Context) -> &'a dyn ObjectStore<Consumer> {
        ctx.consumers.as_ref()
    }

    fn desired(&self, consumer: &Consumer) -> Result<ConsumerTarget, ValidationError> {
        let spec = &consumer.spec;
        let deliver_policy: DeliverPolicy = spec.deliver_policy.parse()?;

        let opt_start_seq = match deliver_policy {
            DeliverPolicy::ByStartSequence => Some(spec.opt_start_seq.ok_or(ValidationError::Missing {
                field: "optStartSeq",
                condition: "deliverPolicy is byStartSequence",
            })?),
            _ => None,
        };
        let opt_start_time = match deliver_policy {
            DeliverPolicy::ByStartTime => {
                let time = spec.opt_start_time.as_deref().ok_or(ValidationError::Missing {
                    field: "optStartTime",
                    condition: "deliverPolicy is byStartTime",
                })?;
                Some(validate_rfc3339("optStartTime", time)?)
            }
            _ => None,
        };

        if spec.max_deliver < -1 || spec.max_deliver == 0 {
            return Err(ValidationError::OutOfRange {
                field: "maxDeliver",
                value: spec.max_deliver.to_string(),
                expected: "-1 (unlimited) or greater than 0",
            });
        }

        let config = ConsumerConfig {
            durable_name: Some(validate_broker_name("durableName", &consumer.broker_name())?),
            deliver_subject: spec.deliver_subject.clone().filter(|s| !s.is_empty()),
            deliver_policy,
            opt_start_seq,
            opt_start_time,
            ack_policy: spec.ack_policy.parse()?,
            ack_wait: parse_optional_duration_nanos("ackWait", spec.ack_wait.as_deref())?,
            max_deliver: spec.max_deliver,
            filter_subject: spec.filter_subject.clone().filter(|s| !s.is_empty()),
            replay_policy: spec.replay_policy.parse()?,
            sample_freq: spec
                .sample_freq
                .as_deref()
                .map(parse_sample_freq)
                .transpose()?
                .unwrap_or(0),
            rate_limit_bps: spec.rate_limit_bps,
        };

        Ok(ConsumerTarget {
            stream: validate_broker_name("streamName", &spec.stream_name)?,
            config,
        })
    }

    async fn preflight(
        &self,
        ctx: &Context,
        consumer: &Consumer,
        target: &ConsumerTarget,
    ) -> Result<(), ReconcileError> {
        let namespace = consumer.namespace().unwrap_or_default();
        let streams = ctx.streams.list(&namespace).await?;
        let parent = streams
            .iter()
            .find(|stream| stream.broker_name() == target.stream && !stream.is_deleting());

        match parent {
            Some(stream) if is_ready(stream.resource_status()) => Ok(()),
            Some(_) => {
                debug!("Parent stream {} exists but is not ready", target.stream);
                Err(parent_not_ready(target))
            }
            None => {
                debug!("No Stream resource for {} in {}", target.stream, namespace);
                Err(parent_not_ready(target))
            }
        }
    }

    async fn apply(
        &self,
        session: &Session,
        target: &ConsumerTarget,
    ) -> Result<SyncOutcome, ReconcileError> {
        let client = session.client();
        let observed = match session
            .call("get_consumer", client.get_consumer(&target.stream, target.name()))
            .await
        {
            Ok(info) => info,
            Err(ReconcileError::Broker(e)) if e.is_stream_not_found() => {
                return Err(parent_not_ready(target));
            }
            Err(ReconcileError::Broker(e)) if e.is_not_found() => {
                let info = session
                    .call("add_consumer", client.add_consumer(&target.stream, &target.config))
                    .await?;
                return Ok(SyncOutcome {
                    change: Change::Created,
                    state: broker_state(&info),
                });
            }
            Err(e) => return Err(e),
        };

        if target.config.matches(&observed.config) {
            return Ok(SyncOutcome {
                change: Change::Unchanged,
                state: broker_state(&observed),
            });
        }

        let info = session
            .call(
                "update_consumer",
                client.update_consumer(&target.stream, &target.config),
            )
            .await?;
        Ok(SyncOutcome {
            change: Change::Updated,
            state: broker_state(&info),
        })
    }

    fn may_exist_on_broker(&self, consumer: &Consumer) -> bool {
        validate_broker_name("streamName", &consumer.spec.stream_name).is_ok()
            && validate_broker_name("durableName", &consumer.broker_name()).is_ok()
    }

    /// Missing consumer or missing stream both mean there is nothing to delete
    async fn cleanup(&self, session: &Session, consumer: &Consumer) -> Result<(), ReconcileError> {
        let name = consumer.broker_name();
        match session
            .call(
                "delete_consumer",
                session
                    .client()
                    .delete_consumer(&consumer.spec.stream_name, &name),
            )
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
    use crate::broker::{AckPolicy, ReplayPolicy};
    use crate::crd::ConsumerSpec;

    fn consumer(spec: ConsumerSpec) -> Consumer {
        let mut consumer = Consumer::new("processor", spec);
        consumer.metadata.namespace = Some("default".to_string());
        consumer
    }

    #[test]
    fn test_desired_from_defaults() {
        let target = ConsumerSyncer
            .desired(&consumer(ConsumerSpec::for_stream("ORDERS")))
            .unwrap();
        assert_eq!(target.stream, "ORDERS");
        assert_eq!(target.name(), "processor");
        assert_eq!(target.config.ack_policy, AckPolicy::None);
        assert_eq!(target.config.replay_policy, ReplayPolicy::Instant);
        assert_eq!(target.config.deliver_policy, DeliverPolicy::All);
        assert_eq!(target.config.max_deliver, -1);
    }

    #[test]
    fn test_start_sequence_required_for_by_start_sequence() {
        let mut spec = ConsumerSpec::for_stream("ORDERS");
        spec.deliver_policy = "byStartSequence".to_string();
        assert!(matches!(
            ConsumerSyncer.desired(&consumer(spec.clone())),
            Err(ValidationError::Missing { .. })
        ));

        spec.opt_start_seq = Some(42);
        let target = ConsumerSyncer.desired(&consumer(spec)).unwrap();
        assert_eq!(target.config.opt_start_seq, Some(42));
    }

    #[test]
    fn test_start_time_must_be_rfc3339() {
        let mut spec = ConsumerSpec::for_stream("ORDERS");
        spec.deliver_policy = "byStartTime".to_string();
        spec.opt_start_time = Some("last tuesday".to_string());
        assert!(ConsumerSyncer.desired(&consumer(spec.clone())).is_err());

        spec.opt_start_time = Some("2024-01-01T01:00:00.000+01:00".to_string());
        let target = ConsumerSyncer.desired(&consumer(spec)).unwrap();
        assert_eq!(
            target.config.opt_start_time.as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_desired_rejects_invalid_values() {
        let invalid = [
            ConsumerSpec {
                ack_policy: "sometimes".to_string(),
                ..ConsumerSpec::for_stream("ORDERS")
            },
            ConsumerSpec {
                replay_policy: "fast".to_string(),
                ..ConsumerSpec::for_stream("ORDERS")
            },
            ConsumerSpec {
                sample_freq: Some("150".to_string()),
                ..ConsumerSpec::for_stream("ORDERS")
            },
            ConsumerSpec {
                ack_wait: Some("30".to_string()),
                ..ConsumerSpec::for_stream("ORDERS")
            },
            ConsumerSpec {
                max_deliver: 0,
                ..ConsumerSpec::for_stream("ORDERS")
            },
            ConsumerSpec::for_stream(""),
        ];
        for spec in invalid {
            assert!(ConsumerSyncer.desired(&consumer(spec.clone())).is_err(), "{spec:?}");
        }
    }
}
